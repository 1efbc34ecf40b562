//! Centralized error types for the Menagerie core library.
//!
//! Playback operations never panic across the API boundary; everything
//! user-visible is a [`ServerError`] value that the external API layer
//! translates into its own responses.

use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the playback core.
#[derive(Debug, Error, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ServerError {
    /// A creature, animation, playlist, or universe binding is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed animation payload or stream fragment (track counts,
    /// frame sizes, channel offsets out of range).
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Presented API key is not valid. Only produced on behalf of
    /// external collaborators; the core itself does no authentication.
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    /// Operation not permitted (e.g. unwritable cache directory).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Socket failure, encoder failure, cache I/O failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidData(_) => "invalid_data",
            Self::InvalidApiKey(_) => "invalid_api_key",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Internal error from any displayable cause.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Convenient Result alias for core operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_returns_correct_code() {
        let err = ServerError::NotFound("creature abc".into());
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn invalid_data_returns_correct_code() {
        let err = ServerError::InvalidData("offset out of range".into());
        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn io_errors_map_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket gone");
        let err: ServerError = io.into();
        assert_eq!(err.code(), "internal_error");
        assert!(err.to_string().contains("socket gone"));
    }

    #[test]
    fn errors_serialize_with_type_tag() {
        let err = ServerError::Forbidden("cache dir".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "Forbidden");
        assert_eq!(json["details"], "cache dir");
    }
}
