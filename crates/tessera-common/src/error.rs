//! Error types for tessera

use serde_json::{json, Value as JsonValue};
use thiserror::Error;

/// Result type alias for tessera operations
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Unified error type for all tessera operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TesseraError {
    /// Resource model misdeclaration. Raised while building tables, models or
    /// the registry; never caused by a request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed or unsupported request parameter.
    #[error("Invalid argument '{parameter}': {message}")]
    InvalidArgument { parameter: String, message: String },

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource exists but the access predicate excludes it.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection pool or statement timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Shorthand for an [`TesseraError::InvalidArgument`].
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        TesseraError::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`TesseraError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        TesseraError::Configuration(message.into())
    }

    /// HTTP status code the surrounding web layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            TesseraError::InvalidArgument { .. } => 400,
            TesseraError::Forbidden(_) => 403,
            TesseraError::NotFound(_) => 404,
            TesseraError::Connection(_) | TesseraError::Timeout(_) => 503,
            _ => 500,
        }
    }

    /// Returns true if the client can fix the request and retry
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Short human-readable title for the JSON:API error object.
    pub fn title(&self) -> String {
        match self {
            TesseraError::InvalidArgument { message, .. } => message.clone(),
            TesseraError::NotFound(msg) | TesseraError::Forbidden(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Renders the error as a JSON:API error document.
    pub fn to_document(&self) -> JsonValue {
        let mut error = json!({
            "title": self.title(),
            "status": self.status().to_string(),
        });
        if let TesseraError::InvalidArgument { parameter, .. } = self {
            error["source"] = json!({ "parameter": parameter });
        }
        json!({ "errors": [error] })
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}

// PostgreSQL-specific error conversions (when postgres-errors feature is enabled)
#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for TesseraError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => TesseraError::Connection(err.to_string()),
            Error::Database(db_err) => {
                // See: https://www.postgresql.org/docs/current/errcodes-appendix.html
                if let Some(code) = db_err.code() {
                    let code_str: &str = &code;
                    match code_str {
                        // Query canceled (statement_timeout)
                        "57014" => return TesseraError::Timeout(err.to_string()),
                        code if code.starts_with("08") => {
                            return TesseraError::Connection(err.to_string())
                        }
                        "57P01" | "57P02" | "57P03" => {
                            return TesseraError::Connection(err.to_string())
                        }
                        _ => {}
                    }
                }
                TesseraError::Database(err.to_string())
            }
            Error::Io(_) => TesseraError::Connection(err.to_string()),
            Error::Tls(_) => TesseraError::Connection(err.to_string()),
            Error::Protocol(_) => TesseraError::Connection(err.to_string()),
            Error::RowNotFound => TesseraError::Database("Row not found".to_string()),
            Error::TypeNotFound { .. } => TesseraError::Deserialization(err.to_string()),
            Error::ColumnIndexOutOfBounds { .. } => TesseraError::Database(err.to_string()),
            Error::ColumnNotFound(_) => TesseraError::Database(err.to_string()),
            Error::ColumnDecode { .. } => TesseraError::Deserialization(err.to_string()),
            Error::Decode(_) => TesseraError::Deserialization(err.to_string()),
            Error::PoolTimedOut => TesseraError::Timeout("Connection pool timed out".to_string()),
            Error::PoolClosed => TesseraError::Connection("Connection pool closed".to_string()),
            Error::WorkerCrashed => TesseraError::Internal("Worker thread crashed".to_string()),
            _ => TesseraError::Database(err.to_string()),
        }
    }
}
