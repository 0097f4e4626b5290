//! Forks and reaps the ubus worker processes.

use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use camino::Utf8PathBuf;
use cfgbus_config::Config;
use nix::sys::prctl;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use thiserror::Error;
use tracing::{error, info, warn};

use super::notifier::UbusNotifier;
use super::worker::serve;
use super::{UBUS_TARGET, UbusClient, UbusError};
use crate::notify::{NotificationQueue, NotifyError};
use crate::router::{ModuleRegistry, Router};

const AGGREGATE_WORKER: &str = "all-in-one";

#[derive(Debug, Error)]
enum WorkerError {
    #[error(transparent)]
    Ubus(#[from] UbusError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Settings shared by every ubus worker.
#[derive(Debug, Clone)]
pub struct UbusListener {
    socket: Utf8PathBuf,
    single: bool,
    poll_interval: Duration,
}

impl UbusListener {
    /// Reads the ubus settings from `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            socket: config.ubus_socket().to_owned(),
            single: config.ubus_single(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Forks one worker per module, or one aggregate worker.
    ///
    /// Must be called before the calling process starts any thread: each
    /// child builds its own notification queue and router after the fork.
    pub fn spawn(&self, registry: &ModuleRegistry) -> Result<UbusWorkers, UbusError> {
        let mut workers = UbusWorkers::default();
        for (name, modules) in worker_plan(registry, self.single) {
            // SAFETY: the daemon forks its ubus workers before spawning any
            // thread, so the child starts from a single-threaded image.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    info!(target: UBUS_TARGET, worker = %name, pid = child.as_raw(), "ubus worker started");
                    workers.children.push((name, child));
                }
                Ok(ForkResult::Child) => process::exit(self.run_worker(&name, modules)),
                Err(errno) => {
                    workers.shutdown();
                    workers.join();
                    return Err(UbusError::Fork(errno));
                }
            }
        }
        Ok(workers)
    }

    fn run_worker(&self, name: &str, modules: ModuleRegistry) -> i32 {
        match self.serve_worker(modules) {
            Ok(()) => 0,
            Err(error) => {
                error!(target: UBUS_TARGET, worker = name, %error, "ubus worker failed");
                1
            }
        }
    }

    fn serve_worker(&self, modules: ModuleRegistry) -> Result<(), WorkerError> {
        prctl::set_pdeathsig(Signal::SIGKILL).map_err(|errno| UbusError::Signal(errno.into()))?;
        let stop = Arc::new(AtomicBool::new(false));
        for signal in [SIGTERM, SIGINT, SIGQUIT, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(UbusError::Signal)?;
        }
        let queue = NotificationQueue::start(Box::new(UbusNotifier::new(self.socket.clone())))?;
        let router = Router::new(modules, queue.sender());
        let mut client = UbusClient::connect(&self.socket)?;
        let served = serve(&mut client, &router, self.poll_interval, &stop);
        queue.shutdown();
        served.map_err(WorkerError::from)
    }
}

/// Groups the registry into worker processes.
fn worker_plan(registry: &ModuleRegistry, single: bool) -> Vec<(String, ModuleRegistry)> {
    if single {
        return vec![(AGGREGATE_WORKER.to_owned(), registry.clone())];
    }
    registry
        .module_names()
        .map(|name| (name.to_owned(), registry.only(name)))
        .collect()
}

/// Handles to the forked workers.
#[derive(Debug, Default)]
pub struct UbusWorkers {
    children: Vec<(String, Pid)>,
}

impl UbusWorkers {
    /// Number of live workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether no worker was started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Asks every worker to stop.
    pub fn shutdown(&self) {
        for (name, pid) in &self.children {
            if let Err(errno) = kill(*pid, Signal::SIGTERM) {
                warn!(target: UBUS_TARGET, worker = %name, %errno, "failed to signal ubus worker");
            }
        }
    }

    /// Reaps every worker, logging how each one ended.
    pub fn join(&mut self) {
        for (name, pid) in self.children.drain(..) {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, 0)) => {
                    info!(target: UBUS_TARGET, worker = %name, "ubus worker exited");
                }
                Ok(status) => {
                    warn!(target: UBUS_TARGET, worker = %name, ?status, "ubus worker ended abnormally");
                }
                Err(errno) => {
                    warn!(target: UBUS_TARGET, worker = %name, %errno, "failed to reap ubus worker");
                }
            }
        }
    }
}
