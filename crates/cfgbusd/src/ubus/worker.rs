//! Per-process serve loop of a ubus worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cfgbus_types::{Envelope, ErrorRecord, INCORRECT_INPUT, MULTIPART_PARSE_FAILURE, MultipartParams};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::client::UbusClient;
use super::multipart::{Feed, MultipartAssembler};
use super::{UBUS_TARGET, UbusError, object_name};
use crate::router::{Router, encode};

/// Largest reply chunk carried by one DATA message.
pub(crate) const CHUNK_BYTES: usize = 512 * 1024;

const STATUS_OK: u32 = 0;
const STATUS_NOT_FOUND: u32 = 4;

/// Registers every module of `router` and answers calls until `stop` is set.
pub(crate) fn serve(
    client: &mut UbusClient,
    router: &Router,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> Result<(), UbusError> {
    client.set_poll_interval(poll_interval)?;
    let registry = router.registry();
    let mut objects = HashMap::new();
    for module in registry.module_names() {
        let object = client.add_object(&object_name(module), &registry.action_names(module))?;
        objects.insert(object, module);
    }
    info!(target: UBUS_TARGET, modules = ?registry, "ubus worker ready");

    let mut assembler = MultipartAssembler::new();
    while !stop.load(Ordering::SeqCst) {
        let Some(call) = client.poll()? else {
            continue;
        };
        let Some(module) = objects.get(&call.object).copied() else {
            warn!(target: UBUS_TARGET, object = call.object, "call for unknown object");
            client.reply(&call, &[], STATUS_NOT_FOUND)?;
            continue;
        };
        debug!(target: UBUS_TARGET, module, action = %call.method, "handling call");
        let payloads = handle_call(router, &mut assembler, module, &call.method, call.data.clone())
            .map(|reply| reply_payloads(&reply))
            .unwrap_or_default();
        client.reply(&call, &payloads, STATUS_OK)?;
    }
    info!(target: UBUS_TARGET, "ubus worker stopping");
    Ok(())
}

/// Turns one method call into a reply. Returns `None` while a multipart
/// assembly is still collecting chunks.
pub(crate) fn handle_call(
    router: &Router,
    assembler: &mut MultipartAssembler,
    module: &str,
    action: &str,
    params: Map<String, Value>,
) -> Option<Envelope> {
    let params: MultipartParams = match serde_json::from_value(Value::Object(params)) {
        Ok(params) => params,
        Err(error) => {
            return Some(Envelope::error_reply(
                module,
                action,
                ErrorRecord::new(INCORRECT_INPUT, error.to_string()),
            ));
        }
    };
    let data = if params.is_multipart() {
        let chunk = params.multipart_data.as_deref().unwrap_or_default();
        match assembler.feed(params.request_id.as_deref(), chunk, params.final_) {
            Feed::Pending => return None,
            Feed::Complete(data) => Some(data),
            Feed::Failed => {
                warn!(
                    target: UBUS_TARGET,
                    module,
                    action,
                    request_id = params.request_id.as_deref().unwrap_or_default(),
                    "multipart assembly failed"
                );
                return Some(Envelope::error_reply(
                    module,
                    action,
                    ErrorRecord::new(MULTIPART_PARSE_FAILURE, ""),
                ));
            }
        }
    } else {
        params.payload().cloned()
    };
    Some(router.dispatch(&Envelope::request(module, action, data).to_value()))
}

fn reply_payloads(reply: &Envelope) -> Vec<Map<String, Value>> {
    let text = String::from_utf8_lossy(&encode(reply)).into_owned();
    split_chunks(&text, CHUNK_BYTES)
        .into_iter()
        .filter_map(|chunk| match json!({ "data": chunk }) {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Splits `text` into pieces of at most `limit` bytes on char boundaries.
pub(crate) fn split_chunks(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let cut = (1..=limit)
            .rev()
            .find(|index| rest.is_char_boundary(*index))
            .unwrap_or_else(|| rest.chars().next().map_or(rest.len(), char::len_utf8));
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}
