//! Error types for podgraph-core

use thiserror::Error;

/// Result type alias using [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A subject, predicate or graph is not an absolute IRI
    #[error("Invalid IRI for {position}: '{iri}'")]
    InvalidIri { position: &'static str, iri: String },

    /// Change request violates a structural invariant
    #[error("Invalid change request: {0}")]
    InvalidRequest(String),

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

impl CoreError {
    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        CoreError::InvalidRequest(msg.into())
    }

    /// Create an invalid cursor error
    pub fn invalid_cursor(msg: impl Into<String>) -> Self {
        CoreError::InvalidCursor(msg.into())
    }
}
