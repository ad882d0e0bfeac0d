//! Error types for the code-generation MCP server

use std::io;

use thiserror::Error;

/// Result type alias for the server
pub type Result<T> = std::result::Result<T, Error>;

/// Server errors, one variant per error kind the routing core distinguishes
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration field; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Expired token or missing key; provider is marked unauthenticated and skipped
    #[error("Authentication error: {0}")]
    Auth(String),

    /// HTTP failure or timeout talking to a provider
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider responded but content was empty or malformed
    #[error("Content error: {0}")]
    Content(String),

    /// Post-generation syntax check failed and no fix was applied
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad tool arguments or an unknown JSON-RPC method
    #[error("Client error: {0}")]
    Client(String),

    /// Request was cancelled (shutdown in progress); never counted as a failure
    #[error("Cancelled")]
    Cancelled,

    /// No provider in the attempt list produced a result
    #[error("All providers failed: {0}")]
    AllProvidersFailed(String),

    /// Provider type has no registered factory
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// JSON-RPC protocol-level error (malformed envelope)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A structured JSON-RPC error to echo back verbatim
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a JSON-RPC error variant
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Map this error to a JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::Client(_) | Self::UnknownProviderType(_) => -1,
            Self::Transport(_) | Self::Content(_) | Self::AllProvidersFailed(_) => -32000,
            Self::Auth(_) => -32001,
            Self::Validation(_) => -32002,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Whether this failure should count against a provider's health and trigger fallback
    #[must_use]
    pub fn is_retryable_provider_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Content(_) | Self::Auth(_))
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
}
