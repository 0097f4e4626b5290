//! Echoes request messages back; used to exercise large and chunked payloads.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::router::{ActionContext, ActionSpec, DataShape, HandlerError, Module, ModuleDeps};

const ACTIONS: &[ActionSpec] = &[ActionSpec {
    name: "echo",
    mutating: false,
    request: Some(DataShape::new(&["request_msg"], &[])),
    reply: DataShape::new(&["reply_msg"], &[]),
}];

/// The `echo` module.
#[derive(Debug, Default)]
pub struct Echo;

/// Registers [`Echo`].
pub fn factory(_deps: &ModuleDeps) -> Arc<dyn Module> {
    Arc::new(Echo)
}

impl Module for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn actions(&self) -> &'static [ActionSpec] {
        ACTIONS
    }

    fn handle(
        &self,
        _action: &str,
        data: Option<Value>,
        _ctx: &ActionContext,
    ) -> Result<Value, HandlerError> {
        let message = data
            .and_then(|mut data| data.get_mut("request_msg").map(Value::take))
            .ok_or_else(|| HandlerError::invalid_data("request_msg is missing"))?;
        Ok(json!({ "reply_msg": message }))
    }
}
