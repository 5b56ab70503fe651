use std::time::Duration;

/// Typed error hierarchy for bridge operations.
/// Classifies errors by who caused them.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // Protocol: the peer sent something we cannot act on
    #[error("protocol error: {0}")]
    Protocol(String),

    // Application: a command was understood but could not be carried out
    #[error("{0}")]
    Application(String),
    #[error("{0}")]
    Backend(#[from] BackendError),

    // Transport
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    // Resource / setup
    #[error("resource error: {0}")]
    Resource(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON-RPC code used for any failure raised while a handler runs.
pub const HANDLER_ERROR: i64 = -32000;

impl BridgeError {
    /// Errors that should stop the bridge instead of being reported to the peer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Code used when the error is surfaced to the gateway.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Remote { code, .. } => *code,
            _ => HANDLER_ERROR,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Application(_) => "application",
            Self::Backend(_) => "backend",
            Self::Transport(_) => "transport",
            Self::ConnectionLost => "connection_lost",
            Self::Timeout(_) => "timeout",
            Self::Remote { .. } => "remote",
            Self::Resource(_) => "resource",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Failure reported by a messaging backend. The message reaches the gateway verbatim.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
