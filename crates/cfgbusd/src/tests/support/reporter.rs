//! [`HealthReporter`] double that records lifecycle events for assertions.

use std::sync::Mutex;

use cfgbus_config::{BusKind, Config};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;

/// Lifecycle events observed during a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerReady { bus: BusKind, modules: usize },
    ListenerStopped(BusKind),
}

/// Records health events in arrival order.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Copies the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Returns `true` once the listener has reported ready.
    pub fn listener_ready(&self) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, HealthEvent::ListenerReady { .. }))
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_ready(&self, bus: BusKind, modules: usize) {
        self.record(HealthEvent::ListenerReady { bus, modules });
    }

    fn listener_stopped(&self, bus: BusKind) {
        self.record(HealthEvent::ListenerStopped(bus));
    }
}
