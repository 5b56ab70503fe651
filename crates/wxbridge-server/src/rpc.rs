use serde::{Deserialize, Serialize};
use serde_json::Value;

use wxbridge_core::errors::HANDLER_ERROR;
use wxbridge_core::BridgeError;

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// JSON-RPC 2.0 request. A request without an `id` is a notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            params: Some(params),
            id: Some(id.into()),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response carrying exactly one of `result` or `error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(msg: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {msg}"))
    }
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self::from_error(id, RpcError::new(code, message))
    }

    pub fn from_error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::from_error(id, RpcError::method_not_found(method))
    }

    pub fn handler_error(id: Value, msg: impl Into<String>) -> Self {
        Self::error(id, HANDLER_ERROR, msg)
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::error(Value::Null, PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(id: Value) -> Self {
        Self::error(id, INVALID_REQUEST, "Invalid Request")
    }
}

/// One decoded inbound frame.
#[derive(Clone, Debug)]
pub enum Envelope {
    Request(RpcRequest),
    Notification(RpcRequest),
    Response(RpcResponse),
}

/// Why an inbound frame could not be turned into an [`Envelope`].
#[derive(Debug)]
pub enum FrameError {
    /// Not valid JSON at all.
    Parse(serde_json::Error),
    /// Valid JSON that is neither request, notification nor response.
    Invalid { id: Value },
}

impl FrameError {
    /// Error reply owed to the peer for this frame.
    pub fn to_response(&self) -> RpcResponse {
        match self {
            Self::Parse(e) => RpcResponse::parse_error(e),
            Self::Invalid { id } => RpcResponse::invalid_request(id.clone()),
        }
    }

    pub fn to_error(&self) -> BridgeError {
        match self {
            Self::Parse(e) => BridgeError::Protocol(format!("unparseable frame: {e}")),
            Self::Invalid { .. } => {
                BridgeError::Protocol("frame is not a JSON-RPC 2.0 envelope".to_string())
            }
        }
    }
}

impl Envelope {
    /// Classify a text frame: a `method` makes it a request (or a
    /// notification when `id` is absent); an `id` with `result` or `error`
    /// makes it a response.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Parse)?;
        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let Value::Object(map) = &value else {
            return Err(FrameError::Invalid { id });
        };

        if map.get("method").is_some_and(Value::is_string) {
            let request: RpcRequest =
                serde_json::from_value(value).map_err(|_| FrameError::Invalid { id })?;
            return Ok(if request.is_notification() {
                Self::Notification(request)
            } else {
                Self::Request(request)
            });
        }

        if map.contains_key("id") && (map.contains_key("result") || map.contains_key("error")) {
            let response: RpcResponse =
                serde_json::from_value(value).map_err(|_| FrameError::Invalid { id })?;
            return Ok(Self::Response(response));
        }

        Err(FrameError::Invalid { id })
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
