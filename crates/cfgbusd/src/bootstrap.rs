//! Daemon bootstrap orchestration.

use std::sync::Arc;

use cfgbus_config::{BusKind, Config, SocketPreparationError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::health::HealthReporter;
use crate::router::{ModuleDeps, ModuleFactory, ModuleRegistry};
use crate::sync::{LockError, RwLock};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Source of the daemon configuration.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that reads CLI flags, `CFGBUS_*` variables and config files.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The configuration lock could not be created.
    #[error("failed to create configuration lock: {source}")]
    Lock {
        /// Underlying lock error.
        #[source]
        source: LockError,
    },
}

/// A bootstrapped daemon, ready to start its listener.
pub struct Daemon {
    config: Arc<Config>,
    registry: ModuleRegistry,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Modules registered for this run.
    #[must_use]
    pub const fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Telemetry handle, mostly useful in tests.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Lifecycle reporter.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }
}

/// Loads configuration, installs telemetry, prepares the socket directories
/// and builds the module registry from `factories`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    factories: &[ModuleFactory],
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    match prepare(loader, factories) {
        Ok((config, registry, telemetry)) => {
            reporter.bootstrap_succeeded(&config);
            Ok(Daemon {
                config,
                registry,
                telemetry,
                reporter,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn prepare(
    loader: &dyn ConfigLoader,
    factories: &[ModuleFactory],
) -> Result<(Arc<Config>, ModuleRegistry, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    if config.bus() == BusKind::UnixSocket {
        for endpoint in [config.daemon_socket(), config.notification_socket()] {
            endpoint
                .prepare_filesystem()
                .map_err(|source| BootstrapError::Socket { source })?;
        }
    }
    // The process-shared mapping must exist before ubus workers fork.
    let lock = RwLock::new(config.lock_backend()).map_err(|source| BootstrapError::Lock { source })?;
    let config = Arc::new(config);
    let deps = ModuleDeps {
        config: Arc::clone(&config),
        lock,
    };
    let registry = ModuleRegistry::build(factories, &deps);
    Ok((config, registry, telemetry))
}
