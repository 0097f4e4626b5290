//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use cfgbus_config::{BusKind, Config};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer of lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener for `bus` accepts requests.
    fn listener_ready(&self, bus: BusKind, modules: usize);

    /// Invoked after the listener for `bus` has been torn down.
    fn listener_stopped(&self, bus: BusKind);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_ready(&self, bus: BusKind, modules: usize) {
        (**self).listener_ready(bus, modules);
    }

    fn listener_stopped(&self, bus: BusKind) {
        (**self).listener_stopped(bus);
    }
}

/// Reporter that records lifecycle events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            bus = %config.bus(),
            lock_backend = %config.lock_backend(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn listener_ready(&self, bus: BusKind, modules: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            bus = %bus,
            modules,
            "listener ready"
        );
    }

    fn listener_stopped(&self, bus: BusKind) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_stopped",
            bus = %bus,
            "listener stopped"
        );
    }
}
