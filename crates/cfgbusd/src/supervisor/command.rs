//! Supervision of a single long-running command with line-oriented output.

use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::errors::SupervisorError;
use super::spawn::{build_command, wait_with_deadline};
use super::store::{ProcessRecord, ProcessSnapshot, ProcessStore};
use super::{ExitHandler, ReconnectHook, SUPERVISOR_TARGET};

type LineCallback = Box<dyn Fn(&Captures<'_>, &ProcessRecord) + Send>;

/// Pattern anchored at the start of an output line, paired with its callback.
pub struct LineHandler {
    pattern: Regex,
    callback: LineCallback,
}

impl LineHandler {
    /// Compiles `pattern` so it only matches at the start of a line.
    pub fn new(
        pattern: &str,
        callback: impl Fn(&Captures<'_>, &ProcessRecord) + Send + 'static,
    ) -> Result<Self, SupervisorError> {
        let anchored = format!("^(?:{pattern})");
        let pattern = Regex::new(&anchored).map_err(|source| SupervisorError::Pattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            pattern,
            callback: Box::new(callback),
        })
    }

    fn dispatch(&self, line: &str, record: &ProcessRecord) {
        if let Some(captures) = self.pattern.captures(line) {
            (self.callback)(&captures, record);
        }
    }
}

impl std::fmt::Debug for LineHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineHandler")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// Everything needed to start one supervised command.
#[derive(Default)]
pub struct CommandLaunch {
    args: Vec<String>,
    handlers: Vec<LineHandler>,
    on_exit: Option<ExitHandler>,
    reconnect: Option<ReconnectHook>,
    timeout: Option<Duration>,
}

impl CommandLaunch {
    /// Starts a launch description for `args` (program first).
    #[must_use]
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a line handler; every matching handler fires, in order.
    #[must_use]
    pub fn line_handler(mut self, handler: LineHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Sets the callback invoked once after the command exits.
    #[must_use]
    pub fn on_exit(mut self, handler: impl FnOnce(&ProcessRecord) + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(handler));
        self
    }

    /// Sets the hook run by the worker before spawning.
    #[must_use]
    pub fn reconnect(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.reconnect = Some(Box::new(hook));
        self
    }

    /// Kills the command once `timeout` elapses.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Starts commands on worker threads and tracks them in a bounded store.
#[derive(Debug, Clone)]
pub struct AsyncCommand {
    store: Arc<ProcessStore>,
    root: Option<Utf8PathBuf>,
}

impl AsyncCommand {
    /// Creates a supervisor keeping at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, root: Option<Utf8PathBuf>) -> Self {
        Self {
            store: Arc::new(ProcessStore::new(capacity)),
            root,
        }
    }

    /// Starts the command and returns its record id once it is running.
    ///
    /// The call returns after the worker has spawned the child, not after the
    /// child exits.
    pub fn start(&self, launch: CommandLaunch) -> Result<String, SupervisorError> {
        let CommandLaunch {
            args,
            handlers,
            on_exit,
            reconnect,
            timeout,
        } = launch;
        let (program, command) = build_command(self.root.as_deref(), &args)?;
        let record = Arc::new(ProcessRecord::new());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let worker_record = Arc::clone(&record);
        let worker = Worker {
            program,
            command,
            handlers,
            on_exit,
            reconnect,
            timeout,
        };
        thread::Builder::new()
            .name(format!("async-{}", short_id(record.id())))
            .spawn(move || worker.run(&worker_record, &ready_tx))
            .map_err(|source| SupervisorError::Worker { source })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.store.insert(Arc::clone(&record));
                Ok(record.id().to_owned())
            }
            Ok(Err(error)) => Err(error),
            Err(mpsc::RecvError) => Err(SupervisorError::WorkerLost),
        }
    }

    /// Returns the current state of the command with `id`.
    #[must_use]
    pub fn poll(&self, id: &str) -> Option<ProcessSnapshot> {
        self.store.poll(id)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

struct Worker {
    program: String,
    command: std::process::Command,
    handlers: Vec<LineHandler>,
    on_exit: Option<ExitHandler>,
    reconnect: Option<ReconnectHook>,
    timeout: Option<Duration>,
}

impl Worker {
    fn run(
        self,
        record: &Arc<ProcessRecord>,
        ready: &mpsc::SyncSender<Result<(), SupervisorError>>,
    ) {
        let Self {
            program,
            mut command,
            handlers,
            on_exit,
            reconnect,
            timeout,
        } = self;

        if let Some(hook) = reconnect {
            hook();
        }

        let (reader, writer) = match os_pipe::pipe() {
            Ok(pair) => pair,
            Err(source) => {
                notify_ready(ready, Err(SupervisorError::Pipe { source }));
                return;
            }
        };
        let stderr_writer = match writer.try_clone() {
            Ok(clone) => clone,
            Err(source) => {
                notify_ready(ready, Err(SupervisorError::Pipe { source }));
                return;
            }
        };
        command.stdout(writer).stderr(stderr_writer);

        let spawned = command.spawn();
        // The command holds the write ends; dropping it lets the reader see EOF.
        drop(command);
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                notify_ready(ready, Err(SupervisorError::Spawn { program, source }));
                return;
            }
        };
        debug!(target: SUPERVISOR_TARGET, program, id = record.id(), "monitored command started");
        notify_ready(ready, Ok(()));

        let line_record = Arc::clone(record);
        let output = thread::spawn(move || read_lines(reader, &handlers, &line_record));

        let retval = match wait_with_deadline(&mut child, &program, timeout) {
            Ok(exit) => exit.code,
            Err(error) => {
                warn!(target: SUPERVISOR_TARGET, program, %error, "failed to wait for command");
                -1
            }
        };
        if output.join().is_err() {
            warn!(target: SUPERVISOR_TARGET, program, "line handler panicked");
        }

        record.finish(retval);
        debug!(target: SUPERVISOR_TARGET, program, id = record.id(), retval, "monitored command finished");
        if let Some(handler) = on_exit {
            handler(record);
        }
    }
}

fn notify_ready(
    ready: &mpsc::SyncSender<Result<(), SupervisorError>>,
    outcome: Result<(), SupervisorError>,
) {
    if ready.send(outcome).is_err() {
        debug!(target: SUPERVISOR_TARGET, "caller stopped waiting for the command to start");
    }
}

fn read_lines(reader: os_pipe::PipeReader, handlers: &[LineHandler], record: &ProcessRecord) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                if buffer.last() == Some(&b'\n') {
                    buffer.pop();
                }
                let line = String::from_utf8_lossy(&buffer);
                for handler in handlers {
                    handler.dispatch(&line, record);
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(error) => {
                warn!(target: SUPERVISOR_TARGET, %error, "failed to read command output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use serde_json::json;

    use super::*;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn sh(script: &str) -> CommandLaunch {
        CommandLaunch::new(["sh", "-c", script])
    }

    fn record_every_line() -> LineHandler {
        LineHandler::new(".*", |captures, record| {
            record.append(json!({"line": &captures[0]}));
        })
        .expect("pattern compiles")
    }

    #[test]
    fn records_one_entry_per_output_line() {
        let supervisor = AsyncCommand::new(20, None);
        let id = supervisor
            .start(sh("echo one; echo two >&2; echo three").line_handler(record_every_line()))
            .expect("start");

        assert!(wait_until(|| supervisor.poll(&id).is_some_and(|s| s.exited)));
        let snapshot = supervisor.poll(&id).expect("snapshot");
        assert_eq!(snapshot.records.len(), 3);
        assert_eq!(snapshot.retval, 0);
    }

    #[test]
    fn exited_stays_false_while_running() {
        let supervisor = AsyncCommand::new(20, None);
        let id = supervisor.start(sh("sleep 0.3; exit 4")).expect("start");
        let running = supervisor.poll(&id).expect("snapshot");
        assert!(!running.exited);

        assert!(wait_until(|| supervisor.poll(&id).is_some_and(|s| s.exited)));
        assert_eq!(supervisor.poll(&id).expect("snapshot").retval, 4);
    }

    #[test]
    fn every_matching_handler_fires_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let order = Arc::clone(&order);
            LineHandler::new("ready", move |_, _| order.lock().expect("order").push("first"))
                .expect("pattern")
        };
        let second = {
            let order = Arc::clone(&order);
            LineHandler::new("rea", move |_, _| order.lock().expect("order").push("second"))
                .expect("pattern")
        };
        let unanchored = {
            let order = Arc::clone(&order);
            LineHandler::new("dy", move |_, _| order.lock().expect("order").push("never"))
                .expect("pattern")
        };
        let supervisor = AsyncCommand::new(20, None);
        let id = supervisor
            .start(
                sh("echo ready")
                    .line_handler(first)
                    .line_handler(second)
                    .line_handler(unanchored),
            )
            .expect("start");
        assert!(wait_until(|| supervisor.poll(&id).is_some_and(|s| s.exited)));
        assert_eq!(*order.lock().expect("order"), ["first", "second"]);
    }

    #[test]
    fn exit_handler_runs_once_after_finish() {
        let calls = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(None));
        let supervisor = AsyncCommand::new(20, None);
        let launch = {
            let calls = Arc::clone(&calls);
            let observed = Arc::clone(&observed);
            sh("exit 2").on_exit(move |record| {
                calls.fetch_add(1, Ordering::SeqCst);
                *observed.lock().expect("observed") = Some(record.snapshot());
            })
        };
        supervisor.start(launch).expect("start");

        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));
        let snapshot = observed.lock().expect("observed").clone().expect("snapshot");
        assert!(snapshot.exited);
        assert_eq!(snapshot.retval, 2);
    }

    #[test]
    fn timeout_reports_kill_status() {
        let supervisor = AsyncCommand::new(20, None);
        let id = supervisor
            .start(sh("sleep 5").timeout(Duration::from_millis(100)))
            .expect("start");
        assert!(wait_until(|| supervisor.poll(&id).is_some_and(|s| s.exited)));
        assert_eq!(supervisor.poll(&id).expect("snapshot").retval, 137);
    }

    #[test]
    fn timeout_finishes_record_while_grandchild_holds_output() {
        let supervisor = AsyncCommand::new(20, None);
        let id = supervisor
            .start(sh("sleep 3; echo x").timeout(Duration::from_millis(100)))
            .expect("start");
        let started = Instant::now();
        assert!(wait_until(|| supervisor.poll(&id).is_some_and(|s| s.exited)));
        assert!(started.elapsed() < Duration::from_secs(2));
        let snapshot = supervisor.poll(&id).expect("snapshot");
        assert_eq!(snapshot.retval, 137);
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn ready_signal_tolerates_departed_caller() {
        let (ready, waiting) = mpsc::sync_channel(1);
        drop(waiting);
        notify_ready(&ready, Ok(()));
        notify_ready(&ready, Err(SupervisorError::EmptyCommand));
    }

    #[test]
    fn spawn_failure_stores_nothing() {
        let supervisor = AsyncCommand::new(20, None);
        let error = supervisor
            .start(CommandLaunch::new(["/nonexistent/cfgbus-command"]))
            .expect_err("spawn should fail");
        assert!(matches!(error, SupervisorError::Spawn { .. }));
        assert!(supervisor.store.is_empty());
    }

    #[test]
    fn reconnect_hook_runs_before_start() {
        let ran = Arc::new(AtomicUsize::new(0));
        let supervisor = AsyncCommand::new(20, None);
        let hook_ran = Arc::clone(&ran);
        supervisor
            .start(sh("true").reconnect(move || {
                hook_ran.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("start");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
