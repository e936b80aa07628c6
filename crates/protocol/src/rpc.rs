//! JSON-RPC 2.0 envelope: requests, responses, errors, and the code table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-RPC 2.0 and application error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Missing or invalid credential.
    pub const UNAUTHORIZED: i64 = -32001;
    /// `tasks/cancel` on a task already in a terminal state.
    pub const TASK_NOT_CANCELABLE: i64 = -32002;
    /// Recursive agent call back into an agent already on the call stack.
    pub const CIRCULAR_CALL: i64 = -32003;
    /// Unknown task id (also returned for cross-tenant ids).
    pub const TASK_NOT_FOUND: i64 = -32004;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC request id: number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
            id: Some(RequestId::Number(id)),
        }
    }

    /// Structural validity per JSON-RPC 2.0: version marker and a method.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A JSON-RPC response carrying exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn ok(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Decoded body of a JSON-RPC HTTP request: a single call or a batch.
#[derive(Debug, Clone)]
pub enum RpcPayload {
    Single(Value),
    Batch(Vec<Value>),
}

impl RpcPayload {
    /// Split raw bytes into single/batch without committing to the request
    /// shape yet — per-element validation happens at dispatch so a batch
    /// with one bad element still answers the others.
    pub fn from_slice(body: &[u8]) -> Result<Self, JsonRpcError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| JsonRpcError::new(codes::PARSE_ERROR, format!("parse error: {e}")))?;
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(JsonRpcError::new(
                        codes::INVALID_REQUEST,
                        "empty batch",
                    ));
                }
                Ok(RpcPayload::Batch(items))
            }
            other => Ok(RpcPayload::Single(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip_with_numeric_id() {
        let req = JsonRpcRequest::new(7, "tasks/get", json!({ "id": "t-1" }));
        let back: JsonRpcRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert!(back.is_valid());
        assert_eq!(back.id, Some(RequestId::Number(7)));
        assert_eq!(back.method, "tasks/get");
    }

    #[test]
    fn string_ids_accepted() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0", "method": "tasks/get", "id": "abc"
        }))
        .unwrap();
        assert_eq!(req.id, Some(RequestId::String("abc".into())));
    }

    #[test]
    fn wrong_version_is_invalid() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "1.0", "method": "tasks/get"
        }))
        .unwrap();
        assert!(!req.is_valid());
    }

    #[test]
    fn response_has_result_xor_error() {
        let ok = JsonRpcResponse::ok(Some(RequestId::Number(1)), json!({ "kind": "task" }));
        let wire = serde_json::to_value(&ok).unwrap();
        assert!(wire.get("result").is_some());
        assert!(wire.get("error").is_none());

        let err = JsonRpcResponse::err(
            None,
            JsonRpcError::new(codes::TASK_NOT_FOUND, "task not found"),
        );
        let wire = serde_json::to_value(&err).unwrap();
        assert!(wire.get("result").is_none());
        assert_eq!(wire["error"]["code"], codes::TASK_NOT_FOUND);
    }

    #[test]
    fn payload_single_vs_batch() {
        let single = RpcPayload::from_slice(br#"{"jsonrpc":"2.0","method":"m"}"#).unwrap();
        assert!(matches!(single, RpcPayload::Single(_)));

        let batch = RpcPayload::from_slice(br#"[{"a":1},{"b":2}]"#).unwrap();
        match batch {
            RpcPayload::Batch(items) => assert_eq!(items.len(), 2),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let err = RpcPayload::from_slice(b"{not json").unwrap_err();
        assert_eq!(err.code, codes::PARSE_ERROR);
    }

    #[test]
    fn empty_batch_is_invalid_request() {
        let err = RpcPayload::from_slice(b"[]").unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
    }
}
