//! Length-prefixed socket transport.
//!
//! [`SocketListener`] accepts connections on a background thread and hands
//! each one to a [`ConnectionHandler`] on its own thread. The daemon installs
//! [`FramedDispatchHandler`], which serves exactly one request frame per
//! connection.

mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionStream, FramedDispatchHandler};
pub use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::{CountingHandler, wait_until};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
