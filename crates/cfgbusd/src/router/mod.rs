//! Request routing.
//!
//! The [`Router`] turns one request envelope into one reply envelope. It never
//! fails: every error, including handler panics, is folded into the reply's
//! `errors` list while `module` and `action` are echoed back unchanged.

mod errors;
mod panic;
mod registry;
mod validator;

use cfgbus_types::{Envelope, ErrorRecord, INCORRECT_INPUT, MessageKind};
use serde_json::Value;
use tracing::{debug, warn};

use crate::notify::NotificationSender;

pub use self::errors::{DispatchError, HandlerError};
pub use self::registry::{
    ActionContext, ActionSpec, DataShape, Module, ModuleDeps, ModuleFactory, ModuleNotifier,
    ModuleRegistry,
};
pub use self::validator::{EnvelopeValidator, SchemaValidator, ValidationError};

const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

/// Dispatches request envelopes to registered modules.
pub struct Router {
    registry: ModuleRegistry,
    validator: Box<dyn SchemaValidator>,
    notifications: NotificationSender,
}

impl Router {
    /// Creates a router using the default [`EnvelopeValidator`].
    #[must_use]
    pub fn new(registry: ModuleRegistry, notifications: NotificationSender) -> Self {
        Self::with_validator(registry, Box::new(EnvelopeValidator), notifications)
    }

    /// Creates a router with a custom validator.
    #[must_use]
    pub fn with_validator(
        registry: ModuleRegistry,
        validator: Box<dyn SchemaValidator>,
        notifications: NotificationSender,
    ) -> Self {
        Self {
            registry,
            validator,
            notifications,
        }
    }

    /// Registered modules.
    #[must_use]
    pub const fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Dispatches a decoded envelope and returns the reply.
    #[must_use]
    pub fn dispatch(&self, envelope: &Value) -> Envelope {
        let module = echoed(envelope, "module");
        let action = echoed(envelope, "action");
        match self.try_dispatch(envelope, module, action) {
            Ok(data) => {
                debug!(target: ROUTER_TARGET, module, action, "request handled");
                Envelope::reply(module, action, data)
            }
            Err(error) => {
                warn!(target: ROUTER_TARGET, module, action, %error, "request failed");
                Envelope::error_reply(module, action, error.to_error_record())
            }
        }
    }

    /// Decodes `payload`, dispatches it and encodes the reply.
    #[must_use]
    pub fn dispatch_bytes(&self, payload: &[u8]) -> Vec<u8> {
        let reply = match serde_json::from_slice::<Value>(payload) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(error) => {
                warn!(target: ROUTER_TARGET, %error, "request is not valid JSON");
                Envelope::error_reply("", "", ErrorRecord::new(INCORRECT_INPUT, error.to_string()))
            }
        };
        encode(&reply)
    }

    fn try_dispatch(
        &self,
        envelope: &Value,
        module: &str,
        action: &str,
    ) -> Result<Value, DispatchError> {
        self.validator.validate_envelope(envelope)?;
        let kind = echoed(envelope, "kind");
        if kind != MessageKind::Request.as_str() {
            return Err(DispatchError::WrongKind {
                kind: kind.to_owned(),
            });
        }
        let (handler, spec) = self
            .registry
            .resolve(module, action)
            .ok_or_else(|| DispatchError::unknown_route(module, action))?;
        let data = envelope.get("data");
        self.validator.validate_request(spec, data)?;

        let ctx = ActionContext::new(handler.name(), self.notifications.clone());
        let result = panic::catch(|| handler.handle(action, data.cloned(), &ctx))
            .map_err(|report| DispatchError::HandlerPanic {
                message: report.message,
                trace: report.trace,
            })?
            .map_err(|error| DispatchError::handler(&error))?;

        self.validator.validate_reply(spec, &result)?;
        if spec.mutating {
            ctx.publish_pending();
        } else {
            let dropped = ctx.take_pending().len();
            if dropped > 0 {
                debug!(target: ROUTER_TARGET, module, action, dropped, "read-only action raised notifications");
            }
        }
        Ok(result)
    }
}

fn echoed<'a>(envelope: &'a Value, key: &str) -> &'a str {
    envelope.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Serialises a reply envelope.
#[must_use]
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    serde_json::to_vec(envelope).unwrap_or_else(|error| {
        warn!(target: ROUTER_TARGET, %error, "reply could not be encoded");
        let fallback = Envelope::error_reply(
            envelope.module.clone(),
            envelope.action.clone(),
            ErrorRecord::new(error.to_string(), ""),
        );
        serde_json::to_vec(&fallback).unwrap_or_default()
    })
}
