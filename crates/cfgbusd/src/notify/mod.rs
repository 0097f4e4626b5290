//! Best-effort notification fan-out.
//!
//! Handlers publish through a [`NotificationSender`]; a dedicated queue thread
//! forwards each envelope to the transport's [`Notifier`]. Nothing waits for
//! delivery and failures are only logged.

mod queue;
mod socket;

use std::io;

use cfgbus_types::Envelope;
use cfgbus_types::frame::FrameError;
use thiserror::Error;

use crate::mqtt::PubSubError;
use crate::ubus::UbusError;

pub use self::queue::{NotificationQueue, NotificationSender};
pub use self::socket::SocketNotifier;

const NOTIFY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::notify");

/// Transport-specific broadcaster of notification envelopes.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send {
    /// Delivers one notification.
    fn notify(&mut self, envelope: &Envelope) -> Result<(), NotifyError>;

    /// Drops and reopens the underlying connection.
    fn reset(&mut self) -> Result<(), NotifyError>;
}

/// Errors raised while delivering notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to connect to notification endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write notification frame")]
    Frame(#[from] FrameError),
    #[error("failed to send ubus event")]
    Ubus(#[from] UbusError),
    #[error("failed to publish notification")]
    Publish(#[from] PubSubError),
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to start notification thread: {0}")]
    Thread(#[source] io::Error),
}
