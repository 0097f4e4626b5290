//! Synchronous command helpers used by module handlers.

use std::io::Read;
use std::process::Stdio;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use super::SUPERVISOR_TARGET;
use super::errors::{CommandError, SupervisorError};
use super::spawn::{build_command, wait_with_deadline};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `128 + signal` when killed by a signal.
    pub retval: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Runs commands to completion with the configured root prefix.
#[derive(Debug, Clone, Default)]
pub struct CmdLine {
    root: Option<Utf8PathBuf>,
}

impl CmdLine {
    /// Creates a runner injecting `root` into absolute program paths.
    #[must_use]
    pub const fn new(root: Option<Utf8PathBuf>) -> Self {
        Self { root }
    }

    /// Runs `args` and captures its output, killing it after `timeout`.
    pub fn run_command(
        &self,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        let (program, mut command) = build_command(self.root.as_deref(), args)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(target: SUPERVISOR_TARGET, program, "command starting");
        let mut child = command
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);
        let exit = wait_with_deadline(&mut child, &program, timeout).map_err(|source| {
            CommandError::Wait {
                program: program.clone(),
                source,
            }
        })?;
        let output = CommandOutput {
            retval: exit.code,
            stdout: joined(stdout),
            stderr: joined(stderr),
        };
        debug!(
            target: SUPERVISOR_TARGET,
            program,
            retval = output.retval,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "command finished"
        );
        Ok(output)
    }

    /// Runs `args` and fails unless it exits with `expected`.
    pub fn run_command_checked(
        &self,
        args: &[String],
        expected: i32,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        let output = self.run_command(args, timeout)?;
        if output.retval != expected {
            return Err(CommandError::UnexpectedStatus {
                program: program_name(args),
                expected,
                actual: output.retval,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Runs `args`, requires success, and returns the first capture group of
    /// `pattern` searched in multi-line mode over standard output.
    pub fn trigger_and_parse(&self, args: &[String], pattern: &str) -> Result<String, CommandError> {
        let output = self.run_command_checked(args, 0, None)?;
        let parse_error = || CommandError::ParseOutput {
            program: program_name(args),
            pattern: pattern.to_owned(),
        };
        let regex: Regex = RegexBuilder::new(pattern)
            .multi_line(true)
            .build()
            .map_err(|_| parse_error())?;
        regex
            .captures(&output.stdout)
            .and_then(|captures| captures.get(1))
            .map(|group| group.as_str().to_owned())
            .ok_or_else(parse_error)
    }
}

fn program_name(args: &[String]) -> String {
    args.first().cloned().unwrap_or_default()
}

fn capture(mut stream: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(error) = stream.read_to_end(&mut buffer) {
            warn!(target: SUPERVISOR_TARGET, %error, "failed to read command output");
        }
        buffer
    })
}

fn joined(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
