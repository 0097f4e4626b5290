//! Message bus selection and the lock backend it implies.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Transport binding the daemon listens on.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BusKind {
    /// Length-prefixed JSON over a local stream socket.
    #[default]
    #[strum(to_string = "unix_socket", serialize = "unix-socket")]
    UnixSocket,
    /// ubus RPC objects, one per module.
    Ubus,
    /// MQTT request/reply topics on a broker.
    Mqtt,
}

impl BusKind {
    /// Returns the lock backend matching the worker layout of this bus.
    ///
    /// The ubus binding forks one worker process per module, so configuration
    /// access must be serialised with process-shared primitives. The other
    /// bindings keep every worker inside a single process.
    #[must_use]
    pub const fn lock_backend(self) -> LockBackend {
        match self {
            Self::Ubus => LockBackend::Process,
            Self::UnixSocket | Self::Mqtt => LockBackend::Thread,
        }
    }
}

/// Primitive family backing the configuration reader/writer lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LockBackend {
    /// Mutexes and condition variables private to one process.
    Thread,
    /// Primitives placed in shared memory and usable across `fork`.
    Process,
}

/// Errors encountered while parsing a [`BusKind`] from text.
pub type BusKindParseError = strum::ParseError;
