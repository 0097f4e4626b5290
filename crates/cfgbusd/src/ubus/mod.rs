//! ubus transport: one registered object per module, served by forked
//! worker processes.

mod blob;
mod client;
mod listener;
mod multipart;
mod notifier;
mod wire;
mod worker;

use std::io;

use nix::errno::Errno;
use thiserror::Error;

pub use self::client::UbusClient;
pub use self::listener::{UbusListener, UbusWorkers};
pub use self::multipart::{Feed, MultipartAssembler};
pub use self::notifier::UbusNotifier;

pub(crate) const UBUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ubus");

/// Prefix of every object this daemon registers.
pub const OBJECT_PREFIX: &str = "cfgbus-";

/// Object path serving `module`.
#[must_use]
pub fn object_name(module: &str) -> String {
    format!("{OBJECT_PREFIX}{module}")
}

/// Errors raised by the ubus client and its workers.
#[derive(Debug, Error)]
pub enum UbusError {
    /// Connecting to ubusd failed.
    #[error("failed to connect to ubus socket '{path}': {source}")]
    Connect {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Socket IO failed.
    #[error("ubus socket error: {0}")]
    Io(#[from] io::Error),
    /// ubusd closed the connection.
    #[error("ubus connection closed")]
    Closed,
    /// ubusd did not answer in time.
    #[error("timed out waiting for ubusd")]
    Timeout,
    /// A message or blob attribute could not be decoded.
    #[error("malformed ubus message: {0}")]
    Malformed(&'static str),
    /// A required attribute was absent.
    #[error("ubus message lacks attribute {0}")]
    MissingAttribute(u8),
    /// ubusd answered out of protocol.
    #[error("unexpected ubus message: {0}")]
    Unexpected(&'static str),
    /// ubusd reported a non-zero status.
    #[error("ubus request failed with status {0}")]
    Status(u32),
    /// Forking a worker failed.
    #[error("failed to fork ubus worker: {0}")]
    Fork(#[source] Errno),
    /// Installing the worker's signal handling failed.
    #[error("failed to prepare ubus worker signals: {0}")]
    Signal(#[source] io::Error),
}
