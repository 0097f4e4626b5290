use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters of an RPC-object method call.
///
/// A plain call carries only `data`. A chunked call sets `multipart`, names
/// the assembly with `request_id` and sends one `multipart_data` chunk per
/// call; the call carrying `final` closes the assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultipartParams {
    /// Request payload of a plain call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Marks the last chunk of an assembly.
    #[serde(default, rename = "final")]
    pub final_: bool,
    /// Marks the call as part of a chunked submission.
    #[serde(default)]
    pub multipart: bool,
    /// Assembly key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Chunk carried by this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart_data: Option<String>,
}

impl MultipartParams {
    /// Returns `true` when the call belongs to a chunked submission.
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        self.multipart
    }

    /// Request payload of a plain call, treating an empty object as absent.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.data
            .as_ref()
            .filter(|value| !value.as_object().is_some_and(serde_json::Map::is_empty))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn final_flag_uses_reserved_name() {
        let params: MultipartParams = serde_json::from_value(json!({
            "multipart": true,
            "final": true,
            "request_id": "abc",
            "multipart_data": "{}"
        }))
        .expect("params parse");
        assert!(params.final_);
        assert!(params.is_multipart());
        assert_eq!(params.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn empty_data_is_treated_as_absent() {
        let params = MultipartParams {
            data: Some(json!({})),
            ..MultipartParams::default()
        };
        assert!(params.payload().is_none());
    }

    #[test]
    fn populated_data_is_forwarded() {
        let params = MultipartParams {
            data: Some(json!({"request_msg": "hi"})),
            ..MultipartParams::default()
        };
        assert_eq!(params.payload(), Some(&json!({"request_msg": "hi"})));
    }
}
