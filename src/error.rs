//! Error types for the integration tester

use std::io;

use thiserror::Error;

/// Result type alias for the integration tester
pub type Result<T> = std::result::Result<T, Error>;

/// Integration tester errors
///
/// Resolution failures (`MissingParameter`, `UnresolvedPlaceholder`,
/// `InvalidParameter`, `AuthRequired`) are always produced before any
/// network call is attempted.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown integration key or endpoint id
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required parameter or configuration field has no value
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// A `{name}` placeholder had no value to substitute
    #[error("Unresolved placeholder: {{{0}}}")]
    UnresolvedPlaceholder(String),

    /// A parameter value does not match its declared type
    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Credential absent or incomplete for the integration's auth scheme
    #[error("Authentication required for integration '{0}'")]
    AuthRequired(String),

    /// Another OAuth flow is already pending
    #[error("Authentication already in progress for '{0}'")]
    Conflict(String),

    /// An execution is already in flight
    #[error("A request is already in flight")]
    Busy,

    /// Configuration or catalog error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error (network failure, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid parameter error
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code used when the error crosses the proxy API
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::MissingParameter(_)
            | Self::UnresolvedPlaceholder(_)
            | Self::InvalidParameter { .. }
            | Self::Json(_) => 400,
            Self::AuthRequired(_) => 401,
            Self::Conflict(_) | Self::Busy => 409,
            Self::Transport(_) => 502,
            _ => 500,
        }
    }

    /// Stable machine-readable error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::MissingParameter(_) => "missing_parameter",
            Self::UnresolvedPlaceholder(_) => "unresolved_placeholder",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::AuthRequired(_) => "auth_required",
            Self::Conflict(_) => "conflict",
            Self::Busy => "busy",
            Self::Config(_) => "config",
            Self::Transport(_) => "transport",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::MissingParameter("id".into()).status_code(), 400);
        assert_eq!(Error::AuthRequired("box".into()).status_code(), 401);
        assert_eq!(Error::Conflict("box".into()).status_code(), 409);
        assert_eq!(Error::Busy.status_code(), 409);
        assert_eq!(Error::Transport("down".into()).status_code(), 502);
        assert_eq!(Error::Internal("bug".into()).status_code(), 500);
    }

    #[test]
    fn test_from_conversions() {
        let io_err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(io_err.kind(), "io");
        assert_eq!(io_err.status_code(), 500);

        let json_err: Error = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert_eq!(json_err.kind(), "json");
        assert_eq!(json_err.status_code(), 400);
    }

    #[test]
    fn test_placeholder_message_keeps_braces() {
        let err = Error::UnresolvedPlaceholder("fileId".into());
        assert_eq!(err.to_string(), "Unresolved placeholder: {fileId}");
    }
}
