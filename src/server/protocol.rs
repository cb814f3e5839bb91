//! JSON-RPC 2.0 envelopes and method dispatch of the MCP surface.

use crate::error::Error;
use crate::tools::{catalog, Tools};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Inbound request or notification.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": INTERNAL_ERROR, "message": Error::TransportInternalError(e.to_string()).to_string() },
            })
        })
    }
}

/// Decode an inbound body, a malformed one yields the error envelope to answer with.
pub fn parse_request(body: &[u8]) -> Result<RpcRequest, RpcResponse> {
    serde_json::from_slice(body).map_err(|e| {
        RpcResponse::failure(
            Value::Null,
            INTERNAL_ERROR,
            Error::TransportParseError(e.to_string()).to_string(),
        )
    })
}

/// Handle one message. Notifications produce no response.
pub async fn handle(tools: &Tools, request: RpcRequest) -> Option<RpcResponse> {
    let Some(id) = request.id else {
        debug!(target: "server", "notification `{}`", request.method);
        return None;
    };

    let response = match request.method.as_str() {
        "initialize" => {
            let version = request.params["protocolVersion"]
                .as_str()
                .unwrap_or(PROTOCOL_VERSION);
            RpcResponse::success(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "dapmux", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
        }
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => RpcResponse::success(id, json!({ "tools": catalog() })),
        "tools/call" => {
            let Some(name) = request.params["name"].as_str() else {
                return Some(RpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    "missing tool name",
                ));
            };
            let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
            let result = tools.call(name, arguments).await;
            match serde_json::to_value(result) {
                Ok(result) => RpcResponse::success(id, result),
                Err(e) => RpcResponse::failure(
                    id,
                    INTERNAL_ERROR,
                    Error::TransportInternalError(e.to_string()).to_string(),
                ),
            }
        }
        other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("method `{other}` not found")),
    };
    Some(response)
}
