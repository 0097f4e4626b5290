//! Error types for supervised and synchronous command execution.

use std::io;

use thiserror::Error;

/// Errors raised while starting a supervised command.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No program was given.
    #[error("command line is empty")]
    EmptyCommand,
    /// A line pattern failed to compile.
    #[error("invalid output pattern '{pattern}': {source}")]
    Pattern {
        /// Pattern as supplied by the caller.
        pattern: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },
    /// The output pipe could not be created.
    #[error("failed to create output pipe: {source}")]
    Pipe {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The operating system refused to start the program.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program after root injection.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The worker thread could not be created.
    #[error("failed to start supervisor worker: {source}")]
    Worker {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The worker exited before reporting whether the command started.
    #[error("supervisor worker exited before the command started")]
    WorkerLost,
}

/// Errors raised by the synchronous command helpers.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not be started.
    #[error(transparent)]
    Spawn(#[from] SupervisorError),
    /// Waiting on the child failed.
    #[error("failed to wait for '{program}': {source}")]
    Wait {
        /// Program after root injection.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The command exited with a status other than the expected one.
    #[error("'{program}' exited with {actual}, expected {expected}")]
    UnexpectedStatus {
        /// Program after root injection.
        program: String,
        /// Expected exit status.
        expected: i32,
        /// Observed exit status.
        actual: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// The command output did not match the requested pattern.
    #[error("output of '{program}' does not match '{pattern}'")]
    ParseOutput {
        /// Program after root injection.
        program: String,
        /// Pattern that failed to match.
        pattern: String,
    },
}
