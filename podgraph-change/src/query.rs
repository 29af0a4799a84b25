//! Query capability consumed by the pipeline
//!
//! The query engine itself lives outside this crate. Stages only see the
//! [`QueryEngine`] trait: assertions and `with` clauses are executed through
//! it, read-only, with the request's context and pod/slice scope.

use crate::error::{ChangeError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A read-only query scoped to one pod (and optionally one slice)
#[derive(Clone, Copy, Debug)]
pub struct QueryRequest<'a> {
    pub context: &'a JsonValue,
    pub pod_id: &'a str,
    pub slice_id: Option<&'a str>,
    pub query: &'a str,
    pub variables: Option<&'a JsonValue>,
}

/// Error entry returned by the query engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResponseError {
    pub message: String,
}

/// Query result: data plus any errors
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<QueryResponseError>,
}

impl QueryResponse {
    pub fn data(data: JsonValue) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![QueryResponseError {
                message: message.into(),
            }],
        }
    }

    /// The response data, or [`ChangeError::Query`] if any error was reported
    pub fn into_data(self) -> Result<JsonValue> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ChangeError::Query(messages.join("; ")));
        }
        Ok(self.data.unwrap_or(JsonValue::Null))
    }
}

/// Whether query data contains at least one result.
///
/// Null, empty objects and arrays holding only empty objects (or nothing)
/// are empty. An object has results when any of its top-level fields does,
/// so `{"people": []}` and `{"people": [{}]}` are empty while
/// `{"people": [{"id": "x"}]}` is not.
pub fn has_results(data: &JsonValue) -> bool {
    match data {
        JsonValue::Null => false,
        JsonValue::Array(items) => has_rows(items),
        JsonValue::Object(fields) => fields.values().any(|v| match v {
            JsonValue::Null => false,
            JsonValue::Array(items) => has_rows(items),
            JsonValue::Object(inner) => !inner.is_empty(),
            _ => true,
        }),
        _ => true,
    }
}

// a row without bindings is not a result
fn has_rows(items: &[JsonValue]) -> bool {
    items
        .iter()
        .any(|item| !matches!(item, JsonValue::Object(row) if row.is_empty()))
}

/// External query capability
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, request: QueryRequest<'_>) -> Result<QueryResponse>;
}

/// Query engine answering from a fixed table of responses
///
/// Queries are matched on their whitespace-normalized text. Unknown queries
/// yield a response carrying an error. Used by the CLI and in tests.
#[derive(Debug, Default)]
pub struct FixtureQueryEngine {
    responses: RwLock<HashMap<String, QueryResponse>>,
    calls: AtomicUsize,
}

fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl FixtureQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response for `query`
    pub fn with_response(self, query: &str, response: QueryResponse) -> Self {
        self.insert(query, response);
        self
    }

    pub fn insert(&self, query: &str, response: QueryResponse) {
        self.responses
            .write()
            .insert(normalize_query(query), response);
    }

    /// Load a `{ "<query>": { "data": ..., "errors": [...] } }` table
    pub fn from_json(value: JsonValue) -> Result<Self> {
        let table: HashMap<String, QueryResponse> = serde_json::from_value(value)?;
        let engine = Self::new();
        for (query, response) in table {
            engine.insert(&query, response);
        }
        Ok(engine)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ChangeError::config(format!("cannot read query fixtures {}: {e}", path.display()))
        })?;
        Self::from_json(serde_json::from_str(&text)?)
    }

    /// Number of queries executed so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngine for FixtureQueryEngine {
    async fn query(&self, request: QueryRequest<'_>) -> Result<QueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = normalize_query(request.query);
        Ok(self
            .responses
            .read()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| QueryResponse::error(format!("unknown query: {key}"))))
    }
}
