//! Starts the configured listener and tears it down on shutdown.

use std::sync::Arc;

use cfgbus_config::BusKind;
use tracing::info;

use crate::bootstrap::{ConfigLoader, Daemon, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::modules::BUILTIN;
use crate::mqtt::{MqttHandle, MqttSession};
use crate::notify::{NotificationQueue, SocketNotifier};
use crate::router::{ModuleFactory, Router};
use crate::transport::{FramedDispatchHandler, ListenerHandle, SocketListener};
use crate::ubus::{UbusListener, UbusWorkers};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to launch the daemon.
pub(crate) struct LaunchPlan<'a, L, S> {
    pub(crate) loader: L,
    pub(crate) shutdown: S,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) factories: &'a [ModuleFactory],
}

/// Runs the daemon with the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        shutdown: SystemShutdownSignal::new(),
        reporter: Arc::new(StructuredHealthReporter::new()),
        factories: BUILTIN,
    })
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<'_, L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        shutdown,
        reporter,
        factories,
    } = plan;
    let daemon = bootstrap_with(&loader, reporter, factories)?;
    let bus = daemon.config().bus();
    info!(target: PROCESS_TARGET, %bus, modules = ?daemon.registry(), "starting listener");

    let running = Running::start(&daemon)?;
    daemon.reporter().listener_ready(bus, daemon.registry().len());
    let waited = shutdown.wait();
    running.stop()?;
    daemon.reporter().listener_stopped(bus);
    waited?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

/// The active listener and the notification queue feeding its transport.
enum Running {
    Socket {
        listener: ListenerHandle,
        queue: NotificationQueue,
    },
    Ubus {
        workers: UbusWorkers,
    },
    Mqtt {
        session: MqttHandle,
        queue: NotificationQueue,
    },
}

impl Running {
    fn start(daemon: &Daemon) -> Result<Self, LaunchError> {
        let config = daemon.config();
        let registry = daemon.registry().clone();
        match config.bus() {
            BusKind::UnixSocket => {
                let listener = SocketListener::bind(config.daemon_socket())?;
                let notifier = SocketNotifier::new(config.notification_socket().clone());
                let queue = NotificationQueue::start(Box::new(notifier))?;
                let router = Arc::new(Router::new(registry, queue.sender()));
                let listener = listener.start(Arc::new(FramedDispatchHandler::new(router)))?;
                Ok(Self::Socket { listener, queue })
            }
            BusKind::Ubus => {
                let workers = UbusListener::new(config).spawn(&registry)?;
                Ok(Self::Ubus { workers })
            }
            BusKind::Mqtt => {
                let session = MqttSession::open(config);
                let queue = NotificationQueue::start(Box::new(session.notifier()))?;
                let router = Arc::new(Router::new(registry, queue.sender()));
                let session = session.start(router)?;
                Ok(Self::Mqtt { session, queue })
            }
        }
    }

    fn stop(self) -> Result<(), LaunchError> {
        match self {
            Self::Socket { listener, queue } => {
                listener.shutdown();
                let joined = listener.join();
                queue.shutdown();
                Ok(joined?)
            }
            Self::Ubus { mut workers } => {
                workers.shutdown();
                workers.join();
                Ok(())
            }
            Self::Mqtt { session, queue } => {
                session.shutdown();
                let joined = session.join();
                queue.shutdown();
                Ok(joined?)
            }
        }
    }
}
