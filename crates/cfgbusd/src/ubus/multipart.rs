//! Reassembly of chunked ubus calls.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    /// More chunks are expected; the call gets no reply.
    Pending,
    /// The assembly closed and parsed into this payload.
    Complete(Value),
    /// The assembly is unusable and has been discarded.
    Failed,
}

/// Collects chunk strings per request id until the final chunk arrives.
///
/// Ids are single use: once an assembly closes, whether it parsed or not,
/// any later chunk naming the same id fails for the lifetime of the
/// assembler.
#[derive(Debug, Default)]
pub struct MultipartAssembler {
    live: HashMap<String, String>,
    retired: HashSet<String>,
}

impl MultipartAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the assembly named `request_id`.
    pub fn feed(&mut self, request_id: Option<&str>, chunk: &str, last: bool) -> Feed {
        let Some(id) = request_id.filter(|id| !id.is_empty()) else {
            return Feed::Failed;
        };
        if self.retired.contains(id) {
            return Feed::Failed;
        }
        let assembly = self.live.entry(id.to_owned()).or_default();
        assembly.push_str(chunk);
        if !last {
            return Feed::Pending;
        }
        let assembly = self.live.remove(id).unwrap_or_default();
        self.retired.insert(id.to_owned());
        match serde_json::from_str::<Value>(&assembly) {
            Ok(value) if value.is_object() => Feed::Complete(value),
            _ => Feed::Failed,
        }
    }

    /// Number of assemblies still collecting chunks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.live.len()
    }
}
