//! JSON-RPC 2.0 message types for MCP over stdio.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Must be "2.0"
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Request parameters (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request ID; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Notifications carry no id and get no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC request ID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID
    Number(i64),
    /// String ID
    String(String),
    /// Null ID, used when the request could not be parsed
    Null,
}

/// A JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Must be "2.0"
    pub jsonrpc: String,
    /// Result (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Request ID that this response corresponds to
    pub id: RequestId,
}

impl Response {
    /// Create a successful response
    pub fn success(id: RequestId, result: Value) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response from RpcError
    pub fn from_error(id: RequestId, err: RpcError) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(err.into()),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
}

impl From<RpcError> for ErrorObject {
    fn from(err: RpcError) -> Self {
        ErrorObject {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Standard JSON-RPC 2.0 errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RpcError {
    /// Get the error code
    pub fn code(&self) -> i32 {
        match self {
            RpcError::ParseError(_) => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::InternalError(_) => -32603,
        }
    }
}

/// Parse a JSON-RPC request from a string
pub fn parse_request_str(text: &str) -> Result<Request, RpcError> {
    let request: Request =
        serde_json::from_str(text).map_err(|e| RpcError::ParseError(e.to_string()))?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcError::InvalidRequest(format!(
            "Expected jsonrpc version '{}', got '{}'",
            JSONRPC_VERSION, request.jsonrpc
        )));
    }

    Ok(request)
}

/// Serialize a response to a JSON string
pub fn serialize_response_string(response: &Response) -> Result<String, RpcError> {
    serde_json::to_string(response).map_err(|e| RpcError::InternalError(e.to_string()))
}
