//! Error types for the ingestion engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing keys, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials rejected by a collaborator
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Text extraction failed
    #[error("Failed to extract text from '{filename}': {message}")]
    Extraction { filename: String, message: String },

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Source file missing from the intake folder
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Embedding error
    #[error("Embedding generation failed: {message}")]
    Embedding { message: String, retryable: bool },

    /// Metadata generation error
    #[error("Metadata generation failed: {0}")]
    Annotation(String),

    /// Vector store error
    #[error("Vector store error: {message}")]
    VectorStore { message: String, retryable: bool },

    /// Status document error
    #[error("Status store error: {0}")]
    StatusStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed request to the HTTP surface
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Operation conflicts with a run in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error
    pub fn extraction(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a retryable embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create an embedding error that retrying cannot fix
    pub fn embedding_rejected(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a retryable vector store error
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a vector store error that retrying cannot fix
    pub fn vector_store_rejected(message: impl Into<String>) -> Self {
        Self::VectorStore {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a retry of the failed call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Embedding { retryable, .. } | Error::VectorStore { retryable, .. } => *retryable,
            Error::Http(err) => !err.is_builder() && !err.is_decode(),
            Error::Io(_) | Error::Annotation(_) | Error::Internal(_) => true,
            Error::Config(_)
            | Error::Auth(_)
            | Error::Extraction { .. }
            | Error::UnsupportedFileType(_)
            | Error::FileNotFound(_)
            | Error::StatusStore(_)
            | Error::BadRequest(_)
            | Error::Conflict(_)
            | Error::Json(_)
            | Error::Toml(_) => false,
        }
    }

    /// Whether the error must abort the current file instead of skipping a unit
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Config(_))
    }

    /// Short machine-readable kind, recorded alongside status messages
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Auth(_) => "auth_error",
            Error::Extraction { .. } => "extraction_error",
            Error::UnsupportedFileType(_) => "unsupported_type",
            Error::FileNotFound(_) => "not_found",
            Error::Embedding { .. } => "embedding_error",
            Error::Annotation(_) => "annotation_error",
            Error::VectorStore { .. } => "vector_store_error",
            Error::StatusStore(_) => "status_store_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Toml(_) => "config_parse_error",
            Error::Http(_) => "http_error",
            Error::BadRequest(_) => "bad_request",
            Error::Conflict(_) => "conflict",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_)
            | Error::UnsupportedFileType(_)
            | Error::BadRequest(_)
            | Error::Json(_)
            | Error::Toml(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::FileNotFound(_) => StatusCode::NOT_FOUND,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Embedding { .. } | Error::VectorStore { .. } | Error::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Annotation(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::StatusStore(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::embedding("timeout").is_retryable());
        assert!(!Error::embedding_rejected("bad input").is_retryable());
        assert!(Error::vector_store("503").is_retryable());
        assert!(!Error::Auth("invalid key".into()).is_retryable());
        assert!(!Error::Config("missing key".into()).is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::Auth("401".into()).is_fatal());
        assert!(Error::Config("no key".into()).is_fatal());
        assert!(!Error::embedding("timeout").is_fatal());
        assert!(!Error::vector_store("503").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::extraction("book.epub", "zip archive is corrupt");
        assert_eq!(
            err.to_string(),
            "Failed to extract text from 'book.epub': zip archive is corrupt"
        );
        assert_eq!(err.kind(), "extraction_error");
    }
}
