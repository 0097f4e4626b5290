//! MQTT transport: one broker connection serving request topics.

mod listener;
mod notifier;
mod topics;

use std::io;

use thiserror::Error;

pub use self::listener::{MqttHandle, MqttSession, handle_publish};
pub use self::notifier::MqttNotifier;
pub use self::topics::Topics;

pub(crate) const MQTT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mqtt");

/// Errors raised by the MQTT transport.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The client request queue rejected a request.
    #[error("failed to queue MQTT request: {0}")]
    Client(#[from] rumqttc::ClientError),
    /// Spawning the event loop thread failed.
    #[error("failed to spawn MQTT event loop: {source}")]
    Thread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The event loop thread panicked.
    #[error("MQTT event loop panicked")]
    ThreadPanic,
}
