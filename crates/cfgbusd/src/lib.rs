//! Configuration message router daemon.
//!
//! `cfgbusd` receives request envelopes over one of three buses (a
//! length-prefixed unix or TCP socket, ubus, or MQTT), validates them,
//! dispatches each to a registered module action and returns exactly one
//! reply. Module actions may publish notifications, which are forwarded
//! best-effort over the same bus.
//!
//! Startup runs in two phases. [`bootstrap_with`] loads the [`cfgbus_config::Config`],
//! installs telemetry, prepares socket directories, creates the configuration
//! lock and builds the [`router::ModuleRegistry`]. [`run_daemon`] then starts
//! the listener for the configured bus and blocks until a termination signal
//! arrives.

mod bootstrap;
mod health;
pub mod modules;
pub mod mqtt;
pub mod notify;
mod process;
pub mod router;
pub mod supervisor;
pub mod sync;
mod telemetry;
pub mod transport;
pub mod ubus;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
