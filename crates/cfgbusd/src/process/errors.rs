//! Unified error surface for daemon launch and supervision.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::mqtt::PubSubError;
use crate::notify::NotifyError;
use crate::transport::ListenerError;
use crate::ubus::UbusError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the daemon failed.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The socket listener failed to start or stop.
    #[error("daemon socket listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// The notification queue could not start.
    #[error("notification queue failed: {source}")]
    Notify {
        /// Underlying notifier error.
        #[source]
        source: NotifyError,
    },
    /// Forking the ubus workers failed.
    #[error("ubus listener failed: {source}")]
    Ubus {
        /// Underlying ubus error.
        #[source]
        source: UbusError,
    },
    /// The MQTT event loop failed.
    #[error("MQTT listener failed: {source}")]
    PubSub {
        /// Underlying broker client error.
        #[source]
        source: PubSubError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}

impl From<NotifyError> for LaunchError {
    fn from(source: NotifyError) -> Self {
        Self::Notify { source }
    }
}

impl From<UbusError> for LaunchError {
    fn from(source: UbusError) -> Self {
        Self::Ubus { source }
    }
}

impl From<PubSubError> for LaunchError {
    fn from(source: PubSubError) -> Self {
        Self::PubSub { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
