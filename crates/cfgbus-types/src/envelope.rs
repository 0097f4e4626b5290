use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description shared by every protocol and schema failure.
pub const INCORRECT_INPUT: &str = "Incorrect input.";

/// Description of the reply sent for any inbound message that is not a request.
pub const WRONG_KIND: &str = "Wrong message kind (only request are allowed).";

/// Description of the reply sent when a multipart assembly cannot be used.
pub const MULTIPART_PARSE_FAILURE: &str = "failed to parse multipart";

/// Direction of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Client to daemon.
    Request,
    /// Daemon to client, answering one request.
    Reply,
    /// Daemon to every subscriber.
    Notification,
}

impl MessageKind {
    /// Returns the wire spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Reply => "reply",
            Self::Notification => "notification",
        }
    }
}

/// One entry of a failed reply's `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Human-readable summary.
    pub description: String,
    /// Diagnostic detail: validator output or a formatted trace.
    pub stacktrace: String,
}

impl ErrorRecord {
    /// Builds an error record.
    #[must_use]
    pub fn new(description: impl Into<String>, stacktrace: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            stacktrace: stacktrace.into(),
        }
    }
}

/// Module/action/kind wrapper carried by every bus.
///
/// A reply holds either `data` or `errors`, never both; the constructors are
/// the only way this crate builds replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target or originating module.
    pub module: String,
    /// Action within the module.
    pub action: String,
    /// Message direction.
    pub kind: MessageKind,
    /// Payload object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure details of an error reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorRecord>>,
}

impl Envelope {
    /// Builds a request envelope.
    #[must_use]
    pub fn request(module: impl Into<String>, action: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            kind: MessageKind::Request,
            data,
            errors: None,
        }
    }

    /// Builds a successful reply.
    #[must_use]
    pub fn reply(module: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            kind: MessageKind::Reply,
            data: Some(data),
            errors: None,
        }
    }

    /// Builds a failed reply carrying a single error record.
    #[must_use]
    pub fn error_reply(
        module: impl Into<String>,
        action: impl Into<String>,
        error: ErrorRecord,
    ) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            kind: MessageKind::Reply,
            data: None,
            errors: Some(vec![error]),
        }
    }

    /// Builds a notification broadcast.
    #[must_use]
    pub fn notification(
        module: impl Into<String>,
        action: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            kind: MessageKind::Notification,
            data,
            errors: None,
        }
    }

    /// Returns `true` when the envelope is a failed reply.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.errors.is_some()
    }

    /// Returns the first error description, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&ErrorRecord> {
        self.errors.as_ref().and_then(|errors| errors.first())
    }

    /// Serialises the envelope to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
