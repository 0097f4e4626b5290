use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::bus::BusKind;
use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default ubusd socket location on OpenWrt systems.
pub const DEFAULT_UBUS_SOCKET: &str = "/var/run/ubus.sock";

/// Default MQTT broker host.
pub const DEFAULT_MQTT_HOST: &str = "127.0.0.1";

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default controller id used in MQTT topic names.
pub const DEFAULT_CONTROLLER_ID: &str = "local";

/// Default number of records retained by each async process store.
pub const DEFAULT_PROCESS_BUFFER: usize = 20;

/// Default poll interval of the RPC and pub/sub event loops.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default message bus.
pub const fn default_bus() -> BusKind {
    BusKind::UnixSocket
}

/// Default ubusd socket path.
pub fn default_ubus_socket() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_UBUS_SOCKET)
}

/// Default MQTT broker host.
pub fn default_mqtt_host() -> String {
    DEFAULT_MQTT_HOST.to_owned()
}

/// Default MQTT broker port.
pub const fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

/// Default MQTT controller id.
pub fn default_controller_id() -> String {
    DEFAULT_CONTROLLER_ID.to_owned()
}

/// Default async process store capacity.
pub const fn default_process_buffer() -> usize {
    DEFAULT_PROCESS_BUFFER
}

/// Default event loop poll interval in milliseconds.
pub const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Computes the default request socket for the daemon.
pub fn default_daemon_socket() -> SocketEndpoint {
    SocketEndpoint::unix(runtime_socket_dir().join("cfgbusd.sock"))
}

/// Computes the default socket that receives notification frames.
pub fn default_notification_socket() -> SocketEndpoint {
    SocketEndpoint::unix(runtime_socket_dir().join("notifications.sock"))
}

#[cfg(unix)]
fn runtime_socket_dir() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("cfgbus");
    if apply_namespace {
        base.push(user_namespace());
    }
    base
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(not(unix))]
fn runtime_socket_dir() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push("cfgbus");
    base
}
