//! Error types for request dispatch.
//!
//! [`DispatchError`] classifies why a request did not produce a successful
//! reply; [`DispatchError::to_error_record`] renders it into the single
//! `errors` entry carried back to the caller. Protocol and schema failures
//! share one description so a caller cannot tell which part was wrong.

use std::error::Error as StdError;
use std::fmt::Write as _;

use cfgbus_types::{ErrorRecord, INCORRECT_INPUT, WRONG_KIND};
use thiserror::Error;

use crate::supervisor::{CommandError, SupervisorError};

use super::validator::ValidationError;

/// Errors surfaced while dispatching one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The envelope, request data or reply data failed validation.
    #[error("invalid input: {source}")]
    InvalidInput {
        #[source]
        source: ValidationError,
    },

    /// The envelope is well formed but is not a request.
    #[error("wrong message kind '{kind}'")]
    WrongKind { kind: String },

    /// No module or action is registered under the requested names.
    #[error("no handler registered for {module}.{action}")]
    UnknownRoute { module: String, action: String },

    /// The handler returned an error.
    #[error("handler failed: {message}")]
    Handler { message: String, trace: String },

    /// The handler panicked.
    #[error("handler panicked: {message}")]
    HandlerPanic { message: String, trace: String },
}

impl DispatchError {
    /// Creates an unknown route error.
    pub fn unknown_route(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self::UnknownRoute {
            module: module.into(),
            action: action.into(),
        }
    }

    /// Wraps a handler error, keeping its source chain as the trace.
    pub fn handler(error: &HandlerError) -> Self {
        Self::Handler {
            message: error.to_string(),
            trace: format_chain(error),
        }
    }

    /// Renders the error as the reply's error record.
    #[must_use]
    pub fn to_error_record(&self) -> ErrorRecord {
        match self {
            Self::InvalidInput { source } => ErrorRecord::new(INCORRECT_INPUT, source.to_string()),
            Self::WrongKind { .. } => ErrorRecord::new(WRONG_KIND, ""),
            Self::UnknownRoute { .. } => {
                ErrorRecord::new(INCORRECT_INPUT, "request does not match any registered action")
            }
            Self::Handler { message, trace } | Self::HandlerPanic { message, trace } => {
                ErrorRecord::new(message.clone(), trace.clone())
            }
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(source: ValidationError) -> Self {
        Self::InvalidInput { source }
    }
}

/// Errors returned by module handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic refused the request.
    #[error("{0}")]
    Failed(String),

    /// The request data is valid JSON but unusable.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A synchronous helper command failed.
    #[error("backend command failed")]
    Command(#[from] CommandError),

    /// A supervised command could not be started.
    #[error("failed to start supervised command")]
    Supervisor(#[from] SupervisorError),
}

impl HandlerError {
    /// Creates a failure with a free-form message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }
}

/// Formats an error and its `source()` chain, one cause per line.
pub(crate) fn format_chain(error: &dyn StdError) -> String {
    let mut rendered = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        let _ = write!(rendered, "\n  caused by: {cause}");
        current = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;

    use super::*;

    #[test]
    fn handler_trace_includes_source_chain() {
        let error = HandlerError::from(SupervisorError::Spawn {
            program: "/usr/bin/missing".to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        });
        let record = DispatchError::handler(&error).to_error_record();
        assert_eq!(record.description, "failed to start supervised command");
        assert!(record.stacktrace.contains("caused by: failed to spawn '/usr/bin/missing'"));
        assert!(record.stacktrace.contains("caused by: no such file"));
    }

    #[rstest]
    #[case::unknown(DispatchError::unknown_route("dns", "nope"), INCORRECT_INPUT)]
    #[case::kind(DispatchError::WrongKind { kind: "reply".to_owned() }, WRONG_KIND)]
    fn protocol_errors_use_fixed_descriptions(
        #[case] error: DispatchError,
        #[case] description: &str,
    ) {
        assert_eq!(error.to_error_record().description, description);
    }

    #[test]
    fn wrong_kind_has_empty_trace() {
        let record = DispatchError::WrongKind {
            kind: "notification".to_owned(),
        }
        .to_error_record();
        assert!(record.stacktrace.is_empty());
    }
}
