//! Change pipeline error types

use podgraph_core::{ChangeStatusCode, CoreError};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors raised while processing a change request
#[derive(Error, Debug)]
pub enum ChangeError {
    /// Record model or request invariant violated
    #[error("{0}")]
    Core(#[from] CoreError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A precondition assertion was not met
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// Request content cannot be turned into records
    #[error("Validation error: {0}")]
    Validation(String),

    /// Records do not conform to the slice schema
    #[error("Conformance violation: {message}")]
    Conformance { message: String, report: JsonValue },

    /// The `with` query matched nothing while templates depend on it
    #[error("No matches: {0}")]
    NoMatches(String),

    /// Template expansion produced more maps than allowed
    #[error("Too many matches: {count} results exceed the limit of {limit}")]
    TooManyMatches { count: usize, limit: usize },

    /// Query capability reported errors or failed to execute
    #[error("Query error: {0}")]
    Query(String),

    /// Template rendering failed
    #[error("Template error: {0}")]
    Template(String),

    /// External reference could not be resolved or loaded
    #[error("Reference error: {0}")]
    Reference(String),

    /// A storage backend failed
    #[error("Storage error in backend '{backend}': {message}")]
    Storage { backend: String, message: String },

    /// Audit log or outbox failure
    #[error("Audit error: {0}")]
    Audit(String),

    /// Pipeline configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChangeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChangeError::Validation(msg.into())
    }

    pub fn reference(msg: impl Into<String>) -> Self {
        ChangeError::Reference(msg.into())
    }

    pub fn storage(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        ChangeError::Storage {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ChangeError::Config(msg.into())
    }

    /// Terminal report status for this failure
    pub fn status(&self) -> ChangeStatusCode {
        match self {
            ChangeError::AssertionFailed(_) => ChangeStatusCode::AssertionFailed,
            ChangeError::NoMatches(_) => ChangeStatusCode::NoMatches,
            ChangeError::TooManyMatches { .. } => ChangeStatusCode::TooManyMatches,
            ChangeError::Core(_)
            | ChangeError::Json(_)
            | ChangeError::Validation(_)
            | ChangeError::Conformance { .. }
            | ChangeError::Query(_)
            | ChangeError::Template(_) => ChangeStatusCode::ValidationError,
            ChangeError::Reference(_)
            | ChangeError::Storage { .. }
            | ChangeError::Audit(_)
            | ChangeError::Config(_)
            | ChangeError::Internal(_) => ChangeStatusCode::InternalError,
        }
    }

    /// Structured conformance report, if any
    pub fn validation_report(&self) -> Option<&JsonValue> {
        match self {
            ChangeError::Conformance { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ChangeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ChangeError::AssertionFailed("x".into()).status(),
            ChangeStatusCode::AssertionFailed
        );
        assert_eq!(
            ChangeError::Query("bad".into()).status(),
            ChangeStatusCode::ValidationError
        );
        assert_eq!(
            ChangeError::reference("no loader").status(),
            ChangeStatusCode::InternalError
        );
        assert_eq!(
            ChangeError::Core(CoreError::invalid_request("x")).status(),
            ChangeStatusCode::ValidationError
        );
        assert_eq!(
            ChangeError::TooManyMatches { count: 5, limit: 2 }.status(),
            ChangeStatusCode::TooManyMatches
        );
    }

    #[test]
    fn test_conformance_carries_report() {
        let err = ChangeError::Conformance {
            message: "1 violation".into(),
            report: json!({"conforms": false}),
        };
        assert_eq!(err.status(), ChangeStatusCode::ValidationError);
        assert_eq!(err.validation_report().unwrap()["conforms"], false);
    }
}
