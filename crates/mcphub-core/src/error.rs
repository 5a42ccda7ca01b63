//! Error types for mcphub.
//!
//! This module provides the top-level error type shared by the mcphub
//! crates, with recovery suggestions for the errors a user can act on.

use thiserror::Error;

/// Result type alias using the mcphub [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcphub.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

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
            Error::Config(_) => Some("Check your config file at ~/.config/mcphub/config.toml"),
            Error::Validation(_) => {
                Some("Fix the listed fields in ~/.config/mcphub/config.toml or the MCPHUB_ environment")
            }
            Error::NotFound(_) => Some("Use 'mcphub servers' to see configured servers"),
            Error::Mcp(msg) if msg.contains("timed out") => {
                Some("The server may be overloaded; raise limits.request_timeout_secs if needed")
            }
            Error::Mcp(msg) if msg.contains("not connected") => {
                Some("Check the server status with 'mcphub servers'")
            }
            _ => None,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(e.to_string())
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
    fn test_config_error_has_suggestion() {
        let err = Error::Config("bad value".to_string());
        assert!(err.to_string().contains("bad value"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_mcp_timeout_suggestion() {
        let err = Error::Mcp("request 'tools/call' timed out after 60 seconds".to_string());
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.contains("Suggestion:"));
        assert!(formatted.contains("request_timeout_secs"));
    }

    #[test]
    fn test_internal_error_has_no_suggestion() {
        let err = Error::Internal("oops".to_string());
        assert!(err.recovery_suggestion().is_none());
        assert_eq!(format_error_with_suggestion(&err), "Internal error: oops");
    }
}
