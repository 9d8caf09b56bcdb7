//! HTTP JSON-RPC envelope
//!
//! Wire format:
//!
//! Client → Server:
//!   { "id": "req-1", "method": "chat.send", "params": { "session": "abc", "message": "Hola" } }
//!
//! Server → Client:
//!   { "id": "req-1", "result": { "reply": "..." } }
//!   { "id": "req-1", "error": { "code": -32001, "message": "session busy: abc" } }

use crate::error::Error;
use serde::{Deserialize, Serialize};

pub const INVALID_PARAMS: i32 = -32602;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;
/// The turn ended in FAILED; `message` carries the fallback text.
pub const TURN_FAILED: i32 = -32000;
pub const SESSION_BUSY: i32 = -32001;
pub const TURN_CANCELLED: i32 = -32002;

/// RPC request from client.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// RPC response to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn method_not_found(id: impl Into<String>, method: &str) -> Self {
        Self::err(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }
}

/// RPC error detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl From<&Error> for RpcError {
    fn from(err: &Error) -> Self {
        let code = match err {
            Error::Busy(_) => SESSION_BUSY,
            Error::Cancelled => TURN_CANCELLED,
            e if e.is_user_visible() => TURN_FAILED,
            _ => INTERNAL_ERROR,
        };
        Self {
            code,
            message: err.user_message(),
        }
    }
}
