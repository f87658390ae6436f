//! Error types for the portage runtime.

use thiserror::Error;

/// Result type alias using portage's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for portage operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Required canonical fields missing from a client submission.
    /// Rejected synchronously, never retried.
    #[error("The following fields are missing: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// Malformed nested metadata encoding (bad base64 or JSON).
    /// Callers treat the affected field as absent.
    #[error("Encoding error for key '{key}': {message}")]
    Encoding { key: String, message: String },

    /// A field-mapping step failed (unparseable value, bad template).
    /// The field is skipped and mapping continues.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Transient backend failure. Triggers a postponed queue retry.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Queue store error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_lists_every_field() {
        let err = Error::MissingFields(vec!["parentid".into(), "userid".into()]);
        assert_eq!(
            err.to_string(),
            "The following fields are missing: parentid, userid"
        );
    }

    #[test]
    fn test_encoding_error_names_key() {
        let err = Error::Encoding {
            key: "subjects".into(),
            message: "invalid base64".into(),
        };
        assert!(err.to_string().contains("subjects"));
        assert!(err.to_string().contains("invalid base64"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_backend_error_display() {
        let err = Error::Backend("connection refused".to_string());
        assert_eq!(err.to_string(), "Backend error: connection refused");
    }
}
