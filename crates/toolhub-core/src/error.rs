//! Error types for toolhub.
//!
//! Library crates keep their own structured errors (`McpError`,
//! `StoreError`); this is the top-level error they convert into, with
//! recovery suggestions for the presentation layer.

use thiserror::Error;

/// Result type alias using the toolhub [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for toolhub.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// MCP registry or gateway error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/toolhub/config.toml"),
            Error::Mcp(_) => Some("Use 'toolhub servers inspect <id>' to check the server"),
            Error::Store(_) => Some("Check that the data directory is writable"),
            Error::NotFound(_) => Some("Use 'toolhub servers list' to see configured servers"),
            Error::Validation(_) => Some("Fix the reported field and try again"),
            _ => None,
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_has_suggestion() {
        let err = Error::NotFound("slack".to_string());
        assert_eq!(err.to_string(), "Not found: slack");
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Config("bad value".to_string());
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.starts_with("Configuration error: bad value"));
        assert!(formatted.contains("Suggestion:"));
    }

    #[test]
    fn test_internal_has_no_suggestion() {
        let err = Error::Internal("boom".to_string());
        assert!(err.recovery_suggestion().is_none());
        assert_eq!(format_error_with_suggestion(&err), "Internal error: boom");
    }
}
