//! Shared configuration for the cfgbus daemon.
//!
//! [`Config`] is loaded once at startup through `ortho_config`, layering
//! defaults, an optional configuration file, `CFGBUS_*` environment variables
//! and command-line flags (highest precedence). The resulting value is
//! immutable; the daemon hands references to it to every component that needs
//! a setting instead of keeping process-wide globals.

mod bus;
mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use bus::{BusKind, BusKindParseError, LockBackend};
pub use defaults::{
    DEFAULT_CONTROLLER_ID, DEFAULT_LOG_FILTER, DEFAULT_MQTT_HOST, DEFAULT_MQTT_PORT,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROCESS_BUFFER, DEFAULT_UBUS_SOCKET, default_bus,
    default_controller_id, default_daemon_socket, default_log_filter, default_log_format,
    default_mqtt_host, default_mqtt_port, default_notification_socket, default_poll_interval_ms,
    default_process_buffer, default_ubus_socket,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Daemon configuration resolved from defaults, files, environment and CLI.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CFGBUS")]
pub struct Config {
    /// Transport binding used to receive requests.
    #[serde(default = "default_bus")]
    pub bus: BusKind,
    /// Request socket for the unix-socket bus.
    #[serde(default = "default_daemon_socket")]
    pub daemon_socket: SocketEndpoint,
    /// Socket that receives notification frames on the unix-socket bus.
    #[serde(default = "default_notification_socket")]
    pub notification_socket: SocketEndpoint,
    /// ubusd socket path.
    #[serde(default = "default_ubus_socket")]
    pub ubus_socket: Utf8PathBuf,
    /// Serve every module from a single ubus worker process.
    #[serde(default)]
    pub ubus_single: bool,
    /// MQTT broker host.
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    /// MQTT broker port.
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    /// Namespace segment of every MQTT topic owned by this daemon.
    #[serde(default = "default_controller_id")]
    pub mqtt_controller_id: String,
    /// Comma-separated allow-list of module names; all modules when unset.
    #[serde(default)]
    pub modules: Option<String>,
    /// Root prefix prepended to absolute command paths.
    #[serde(default)]
    pub cmdline_root: Option<Utf8PathBuf>,
    /// Capacity of each async process store.
    #[serde(default = "default_process_buffer")]
    pub process_buffer: usize,
    /// Poll interval of the ubus and MQTT event loops, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `tracing_subscriber::EnvFilter` expression.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Output format of the log stream.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            daemon_socket: default_daemon_socket(),
            notification_socket: default_notification_socket(),
            ubus_socket: default_ubus_socket(),
            ubus_single: false,
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_controller_id: default_controller_id(),
            modules: None,
            cmdline_root: None,
            process_buffer: default_process_buffer(),
            poll_interval_ms: default_poll_interval_ms(),
            log_filter: default_log_filter(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Transport binding used to receive requests.
    #[must_use]
    pub const fn bus(&self) -> BusKind {
        self.bus
    }

    /// Lock backend implied by the configured bus.
    #[must_use]
    pub const fn lock_backend(&self) -> LockBackend {
        self.bus.lock_backend()
    }

    /// Request socket for the unix-socket bus.
    #[must_use]
    pub const fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Socket that receives notification frames.
    #[must_use]
    pub const fn notification_socket(&self) -> &SocketEndpoint {
        &self.notification_socket
    }

    /// ubusd socket path.
    #[must_use]
    pub fn ubus_socket(&self) -> &Utf8Path {
        self.ubus_socket.as_path()
    }

    /// Whether all modules share a single ubus worker.
    #[must_use]
    pub const fn ubus_single(&self) -> bool {
        self.ubus_single
    }

    /// MQTT broker host.
    #[must_use]
    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    /// MQTT broker port.
    #[must_use]
    pub const fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    /// MQTT controller id.
    #[must_use]
    pub fn mqtt_controller_id(&self) -> &str {
        &self.mqtt_controller_id
    }

    /// Module names the daemon is restricted to. Empty means every module.
    #[must_use]
    pub fn module_filter(&self) -> Vec<String> {
        self.modules
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Root prefix for absolute command paths.
    #[must_use]
    pub fn cmdline_root(&self) -> Option<&Utf8Path> {
        self.cmdline_root.as_deref()
    }

    /// Capacity of each async process store, never below one.
    #[must_use]
    pub fn process_buffer(&self) -> usize {
        self.process_buffer.max(1)
    }

    /// Poll interval of the ubus and MQTT event loops.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `tracing_subscriber::EnvFilter` expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format of the log stream.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
