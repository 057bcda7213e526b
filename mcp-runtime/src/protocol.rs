//! JSON-RPC 2.0 envelopes as used over the MCP stdio transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "mcp-google-sheets";

pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    /// Tool execution failure (server-defined range).
    pub const EXECUTION_FAILED: i64 = -32000;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Opaque; echoed back with its JSON type intact. Absent reads as `null`.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A response carries exactly one of `result` or `error`; the enum makes
/// the other shape unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self::from_outcome(id, Ok(result))
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self::from_outcome(id, Err(error))
    }

    pub fn from_outcome(id: Value, outcome: Result<Value, RpcError>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: match outcome {
                Ok(result) => Outcome::Result(result),
                Err(error) => Outcome::Error(error),
            },
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(result) => Some(result),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(error) => Some(error),
        }
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: codes::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self {
            code: codes::METHOD_NOT_FOUND,
            message: format!("Tool not found: {name}"),
            data: None,
        }
    }

    /// The decode error travels in `data`; the message is fixed.
    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self {
            code: codes::INVALID_PARAMS,
            message: "Invalid params".to_string(),
            data: Some(Value::String(detail.to_string())),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self {
            code: codes::EXECUTION_FAILED,
            message: message.into(),
            data: None,
        }
    }
}
