//! MCP-specific error types.
//!
//! Every error exposes a machine-readable [`ErrorKind`] plus the structured
//! fields (server id, tool, offending argument fields, failure reason) a
//! presentation layer needs to render an actionable message.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::schema::SchemaViolation;
use crate::session::SessionState;

/// Why a transport or session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Connection refused or process could not be spawned.
    Refused,
    /// Open, handshake or keepalive did not complete in time.
    Timeout,
    /// The peer spoke something other than the expected protocol.
    Protocol,
    /// The channel closed underneath a live session.
    ConnectionLost,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "refused"),
            Self::Timeout => write!(f, "timeout"),
            Self::Protocol => write!(f, "protocol"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),

    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Opening or the handshake took too long.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn refused(msg: impl Into<String>) -> Self {
        Self::Refused(msg.into())
    }

    /// Classify this error for session bookkeeping.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Refused(_) | Self::SpawnFailed(_) => FailureReason::Refused,
            Self::Timeout(_) => FailureReason::Timeout,
            Self::Protocol(_) => FailureReason::Protocol,
            Self::WriteError(_) | Self::ReadError(_) | Self::ConnectionClosed | Self::NotConnected => {
                FailureReason::ConnectionLost
            }
        }
    }
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    NotConnected,
    UnknownTool,
    UnknownPrompt,
    Unsupported,
    InvalidArguments,
    Timeout,
    ConnectionLost,
    NotFound,
    Cancelled,
    ServerError,
    Protocol,
    Catalog,
    Store,
    Json,
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error while opening or handshaking.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No session for the server, or the session is not connected.
    #[error("server '{server_id}' is not connected ({})", state_label(.state))]
    NotConnected {
        server_id: String,
        state: Option<SessionState>,
    },

    /// Tool not declared by the server at handshake.
    #[error("unknown tool '{tool}' on server '{server_id}'")]
    UnknownTool { server_id: String, tool: String },

    /// Prompt not declared by the server at handshake.
    #[error("unknown prompt '{prompt}' on server '{server_id}'")]
    UnknownPrompt { server_id: String, prompt: String },

    /// The server did not negotiate the capability.
    #[error("server '{server_id}' does not support {capability}")]
    Unsupported {
        server_id: String,
        capability: &'static str,
    },

    /// Arguments do not satisfy the declared schema. Nothing was sent.
    #[error("invalid arguments for '{target}': {}", join_violations(.violations))]
    InvalidArguments {
        target: String,
        violations: Vec<SchemaViolation>,
    },

    /// No response within the per-call timeout.
    #[error("request '{method}' timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },

    /// The channel closed while the call was in flight.
    #[error("connection to server '{server_id}' lost")]
    ConnectionLost { server_id: String },

    /// Marketplace entry not found.
    #[error("marketplace entry not found: {0}")]
    NotFound(String),

    /// The caller cancelled the call.
    #[error("request '{method}' was cancelled")]
    Cancelled { method: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i64, message: String },

    /// Protocol-level error (malformed messages, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Marketplace catalog could not be loaded.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Persistence collaborator failed.
    #[error("store error: {0}")]
    Store(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn state_label(state: &Option<SessionState>) -> String {
    match state {
        Some(state) => format!("state: {}", state),
        None => "no session".to_string(),
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl McpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    pub fn not_connected(server_id: impl Into<String>, state: Option<SessionState>) -> Self {
        Self::NotConnected {
            server_id: server_id.into(),
            state,
        }
    }

    pub fn connection_lost(server_id: impl Into<String>) -> Self {
        Self::ConnectionLost {
            server_id: server_id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::NotConnected { .. } => ErrorKind::NotConnected,
            Self::UnknownTool { .. } => ErrorKind::UnknownTool,
            Self::UnknownPrompt { .. } => ErrorKind::UnknownPrompt,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Catalog(_) => ErrorKind::Catalog,
            Self::Store(_) => ErrorKind::Store,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// Caller mistakes: surfaced immediately, never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::UnknownTool { .. }
                | Self::UnknownPrompt { .. }
                | Self::Unsupported { .. }
                | Self::InvalidArguments { .. }
        )
    }

    /// Transport failure reason, if this error came from the transport.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Transport(e) => Some(e.reason()),
            Self::ConnectionLost { .. } => Some(FailureReason::ConnectionLost),
            _ => None,
        }
    }

    /// Offending argument fields for `InvalidArguments`, empty otherwise.
    pub fn invalid_fields(&self) -> Vec<&str> {
        match self {
            Self::InvalidArguments { violations, .. } => {
                violations.iter().map(|v| v.field.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<toolhub_core::Error> for McpError {
    fn from(e: toolhub_core::Error) -> Self {
        McpError::Store(e.to_string())
    }
}

impl From<McpError> for toolhub_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::NotFound(id) => toolhub_core::Error::NotFound(id),
            McpError::InvalidArguments { .. } => toolhub_core::Error::Validation(e.to_string()),
            other => toolhub_core::Error::Mcp(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ViolationKind;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");
        assert_eq!(err.reason(), FailureReason::ConnectionLost);
    }

    #[test]
    fn test_transport_error_reasons() {
        assert_eq!(TransportError::refused("nope").reason(), FailureReason::Refused);
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(10)).reason(),
            FailureReason::Timeout
        );
        assert_eq!(TransportError::protocol("bad").reason(), FailureReason::Protocol);
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::server_error(-32600, "Invalid request");
        assert_eq!(err.to_string(), "server error (code -32600): Invalid request");

        let err = McpError::not_connected("slack", None);
        assert_eq!(err.to_string(), "server 'slack' is not connected (no session)");

        let err = McpError::not_connected("slack", Some(SessionState::Connecting));
        assert_eq!(err.to_string(), "server 'slack' is not connected (state: connecting)");
    }

    #[test]
    fn test_invalid_arguments_names_fields() {
        let err = McpError::InvalidArguments {
            target: "echo".to_string(),
            violations: vec![SchemaViolation::new("text", ViolationKind::Missing)],
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(err.invalid_fields(), vec!["text"]);
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn test_timeout_is_not_caller_error() {
        let err = McpError::Timeout {
            method: "tools/call".to_string(),
            after: Duration::from_millis(250),
        };
        assert!(!err.is_caller_error());
        assert_eq!(err.to_string(), "request 'tools/call' timed out after 250ms");
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let core_err: toolhub_core::Error = McpError::NotFound("slack".to_string()).into();
        assert!(matches!(core_err, toolhub_core::Error::NotFound(_)));

        let core_err: toolhub_core::Error = McpError::protocol("bad").into();
        assert!(matches!(core_err, toolhub_core::Error::Mcp(_)));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ConnectionLost).unwrap();
        assert_eq!(json, "\"connection_lost\"");
    }
}
