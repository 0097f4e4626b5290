//! Supervision of several independent commands as one logical unit.
//!
//! Each command's complete standard output is parsed as a single JSON
//! document once that command has exited with status zero. The unit is done
//! when every command has exited; its return value is the largest exit code.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::Value;
use tracing::{debug, warn};

use super::errors::SupervisorError;
use super::spawn::{build_command, exit_code};
use super::store::{ProcessRecord, ProcessSnapshot, ProcessStore};
use super::{ExitHandler, ReconnectHook, SUPERVISOR_TARGET};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type ResultHandler = Box<dyn Fn(&ProcessRecord, usize, Value) + Send>;

/// Launch description for a group of commands.
pub struct MultipleLaunch {
    commands: Vec<Vec<String>>,
    on_result: ResultHandler,
    on_exit: Option<ExitHandler>,
    reconnect: Option<ReconnectHook>,
}

impl MultipleLaunch {
    /// Describes `commands`, delivering each parsed output to `on_result`.
    ///
    /// The handler receives the shared record, the index of the command in
    /// `commands`, and the parsed document.
    #[must_use]
    pub fn new(
        commands: Vec<Vec<String>>,
        on_result: impl Fn(&ProcessRecord, usize, Value) + Send + 'static,
    ) -> Self {
        Self {
            commands,
            on_result: Box::new(on_result),
            on_exit: None,
            reconnect: None,
        }
    }

    /// Sets the callback invoked once after every command has exited.
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
}

/// Starts command groups on worker threads and tracks them in a bounded store.
#[derive(Debug, Clone)]
pub struct AsyncMultipleCommands {
    store: Arc<ProcessStore>,
    root: Option<Utf8PathBuf>,
}

impl AsyncMultipleCommands {
    /// Creates a supervisor keeping at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, root: Option<Utf8PathBuf>) -> Self {
        Self {
            store: Arc::new(ProcessStore::new(capacity)),
            root,
        }
    }

    /// Starts every command and returns the group's record id.
    pub fn start(&self, launch: MultipleLaunch) -> Result<String, SupervisorError> {
        let MultipleLaunch {
            commands,
            on_result,
            on_exit,
            reconnect,
        } = launch;
        let mut prepared = Vec::with_capacity(commands.len());
        for args in &commands {
            prepared.push(build_command(self.root.as_deref(), args)?);
        }
        if prepared.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }

        let record = Arc::new(ProcessRecord::new());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker_record = Arc::clone(&record);
        thread::Builder::new()
            .name("async-multiple".to_owned())
            .spawn(move || {
                if let Some(hook) = reconnect {
                    hook();
                }
                let (children, started) = match spawn_all(prepared) {
                    Ok(children) => (children, Ok(())),
                    Err(error) => (Vec::new(), Err(error)),
                };
                let failed = started.is_err();
                if ready_tx.send(started).is_err() {
                    debug!(target: SUPERVISOR_TARGET, "caller stopped waiting for the commands to start");
                }
                if failed {
                    return;
                }
                supervise(children, &worker_record, &on_result);
                if let Some(handler) = on_exit {
                    handler(&worker_record);
                }
            })
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

    /// Returns the current state of the group with `id`.
    #[must_use]
    pub fn poll(&self, id: &str) -> Option<ProcessSnapshot> {
        self.store.poll(id)
    }
}

struct Supervised {
    program: String,
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    exit: Option<i32>,
}

fn spawn_all(prepared: Vec<(String, Command)>) -> Result<Vec<Supervised>, SupervisorError> {
    let mut children: Vec<Supervised> = Vec::with_capacity(prepared.len());
    for (program, mut command) in prepared {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match command.spawn() {
            Ok(mut child) => {
                let stdout = child.stdout.take().map(collect);
                let stderr = child.stderr.take().map(collect);
                debug!(target: SUPERVISOR_TARGET, program, "monitored command started");
                children.push(Supervised {
                    program,
                    child,
                    stdout,
                    stderr,
                    exit: None,
                });
            }
            Err(source) => {
                for started in &mut children {
                    if let Err(error) = started.child.kill().and_then(|()| started.child.wait().map(drop)) {
                        warn!(target: SUPERVISOR_TARGET, program = started.program, %error, "failed to stop sibling command");
                    }
                }
                return Err(SupervisorError::Spawn { program, source });
            }
        }
    }
    Ok(children)
}

fn collect(mut stream: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(error) = stream.read_to_end(&mut buffer) {
            warn!(target: SUPERVISOR_TARGET, %error, "failed to read command output");
        }
        buffer
    })
}

fn supervise(mut children: Vec<Supervised>, record: &ProcessRecord, on_result: &ResultHandler) {
    while children.iter().any(|child| child.exit.is_none()) {
        for (index, supervised) in children.iter_mut().enumerate() {
            if supervised.exit.is_some() {
                continue;
            }
            match supervised.child.try_wait() {
                Ok(Some(status)) => {
                    let code = exit_code(status);
                    supervised.exit = Some(code);
                    deliver(index, supervised, code, record, on_result);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        program = supervised.program,
                        %error,
                        "failed to wait for command"
                    );
                    supervised.exit = Some(-1);
                }
            }
        }
        if children.iter().any(|child| child.exit.is_none()) {
            thread::sleep(POLL_INTERVAL);
        }
    }

    let retval = children
        .iter()
        .filter_map(|child| child.exit)
        .max()
        .unwrap_or_default();
    record.finish(retval);
}

fn deliver(
    index: usize,
    supervised: &mut Supervised,
    code: i32,
    record: &ProcessRecord,
    on_result: &ResultHandler,
) {
    let program = supervised.program.as_str();
    if code != 0 {
        let stderr = join_output(supervised.stderr.take());
        warn!(
            target: SUPERVISOR_TARGET,
            program,
            code,
            stderr = %String::from_utf8_lossy(&stderr).trim(),
            "monitored command failed"
        );
        return;
    }

    let stdout = join_output(supervised.stdout.take());
    let parsed = if stdout.iter().all(u8::is_ascii_whitespace) {
        Ok(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_slice(&stdout)
    };
    match parsed {
        Ok(value) => on_result(record, index, value),
        Err(error) => warn!(
            target: SUPERVISOR_TARGET,
            program,
            %error,
            "command output is not valid JSON"
        ),
    }
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
