//! Change requests
//!
//! A change request is the caller's intent: literal or templated inserts and
//! deletes, optional preconditions, and optional references to external
//! documents whose statements should be inserted or deleted wholesale.

use crate::error::{CoreError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use ulid::Ulid;

/// Template entry that expands to the whole result of the `with` query
pub const WILDCARD_ENTRY: &str = "*";

/// Kind of precondition an [`Assertion`] checks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssertionKind {
    /// Query must return no results
    AssertEmptyResult,
    /// Query must return at least one result
    AssertNonEmptyResult,
    /// Any other type name; rejected when evaluated
    Unrecognized(String),
}

impl From<String> for AssertionKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "AssertEmptyResult" => AssertionKind::AssertEmptyResult,
            "AssertNonEmptyResult" => AssertionKind::AssertNonEmptyResult,
            _ => AssertionKind::Unrecognized(s),
        }
    }
}

impl From<AssertionKind> for String {
    fn from(kind: AssertionKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionKind::AssertEmptyResult => f.write_str("AssertEmptyResult"),
            AssertionKind::AssertNonEmptyResult => f.write_str("AssertNonEmptyResult"),
            AssertionKind::Unrecognized(s) => f.write_str(s),
        }
    }
}

/// A read-only precondition evaluated before any record is materialized
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    pub query: String,
}

impl Assertion {
    pub fn empty_result(query: impl Into<String>) -> Self {
        Self {
            kind: AssertionKind::AssertEmptyResult,
            query: query.into(),
        }
    }

    pub fn non_empty_result(query: impl Into<String>) -> Self {
        Self {
            kind: AssertionKind::AssertNonEmptyResult,
            query: query.into(),
        }
    }
}

/// One insert or delete entry of a request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeEntry {
    /// Template expression evaluated against the `with` bindings, or `"*"`
    Template(String),
    /// JSON-LD node object used as-is
    Node(Map<String, JsonValue>),
}

impl ChangeEntry {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, ChangeEntry::Template(t) if t.trim() == WILDCARD_ENTRY)
    }

    /// True for entries that need the `with` query to be evaluated
    pub fn needs_bindings(&self) -> bool {
        matches!(self, ChangeEntry::Template(_))
    }

    /// Entries for one JSON value as written in an `insert`/`delete` list.
    ///
    /// A string is a template, an object is a node, and an array holds one
    /// of those per element. Anything else is rejected.
    pub fn from_json(value: JsonValue) -> Result<Vec<ChangeEntry>> {
        match value {
            JsonValue::Array(items) => items.into_iter().map(Self::single).collect(),
            other => Ok(vec![Self::single(other)?]),
        }
    }

    fn single(value: JsonValue) -> Result<ChangeEntry> {
        match value {
            JsonValue::String(s) => Ok(ChangeEntry::Template(s)),
            JsonValue::Object(map) => Ok(ChangeEntry::Node(map)),
            other => Err(CoreError::invalid_request(format!(
                "entry must be a template string or a node object, found {other}"
            ))),
        }
    }
}

/// Pointer to an external document holding statements
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
    /// Location of the document, e.g. `file:///data/people.jsonld`
    pub uri: String,
    /// Media type hint; loaders fall back to JSON-LD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ExternalReference {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            format: None,
        }
    }
}

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// A caller's change request against one pod (and optionally one slice)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    /// Time-ordered ULID
    pub id: String,
    /// JSON-LD context (prefix map) used to expand entries and queries
    #[serde(default = "empty_context", rename = "@context", alias = "context")]
    pub context: JsonValue,
    pub pod_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_id: Option<String>,
    #[serde(default, rename = "assert", deserialize_with = "one_or_many")]
    pub assertions: Vec<Assertion>,
    /// Query whose bindings drive template entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub insert: Vec<ChangeEntry>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub delete: Vec<ChangeEntry>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub insert_from_refs: Vec<ExternalReference>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub delete_from_refs: Vec<ExternalReference>,
    /// Builder input that could not be turned into entries
    #[serde(skip)]
    rejected: Vec<CoreError>,
}

fn empty_context() -> JsonValue {
    JsonValue::Object(Map::new())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

impl ChangeRequest {
    /// Create an empty request for `pod_id` with a freshly generated id
    pub fn new(pod_id: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            context: empty_context(),
            pod_id: pod_id.into(),
            slice_id: None,
            assertions: Vec::new(),
            with: None,
            insert: Vec::new(),
            delete: Vec::new(),
            insert_from_refs: Vec::new(),
            delete_from_refs: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = context;
        self
    }

    pub fn with_slice(mut self, slice_id: impl Into<String>) -> Self {
        self.slice_id = Some(slice_id.into());
        self
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.with = Some(query.into());
        self
    }

    /// Add insert entries from `value`; see [`ChangeEntry::from_json`].
    /// Invalid values are reported by [`validate`](Self::validate).
    pub fn with_insert(mut self, value: JsonValue) -> Self {
        match ChangeEntry::from_json(value) {
            Ok(entries) => self.insert.extend(entries),
            Err(e) => self.rejected.push(e),
        }
        self
    }

    /// Add delete entries from `value`; see [`ChangeEntry::from_json`]
    pub fn with_delete(mut self, value: JsonValue) -> Self {
        match ChangeEntry::from_json(value) {
            Ok(entries) => self.delete.extend(entries),
            Err(e) => self.rejected.push(e),
        }
        self
    }

    pub fn with_insert_ref(mut self, reference: ExternalReference) -> Self {
        self.insert_from_refs.push(reference);
        self
    }

    pub fn with_delete_ref(mut self, reference: ExternalReference) -> Self {
        self.delete_from_refs.push(reference);
        self
    }

    /// True when any insert or delete entry is a template or `"*"`
    pub fn has_templates(&self) -> bool {
        self.insert
            .iter()
            .chain(self.delete.iter())
            .any(ChangeEntry::needs_bindings)
    }

    pub fn has_refs(&self) -> bool {
        !self.insert_from_refs.is_empty() || !self.delete_from_refs.is_empty()
    }

    /// Time the request was queued, taken from the ULID id
    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        let ulid = Ulid::from_string(&self.id).ok()?;
        let millis = i64::try_from(ulid.timestamp_ms()).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Check the structural invariants of the request.
    ///
    /// - `podId` is non-empty and `id` is a ULID
    /// - every builder entry was a string, an object, or an array of those
    /// - at least one of insert, delete, insertFromRefs, deleteFromRefs
    /// - template entries require a `with` query
    /// - reference lists exclude literal insert/delete entries
    pub fn validate(&self) -> Result<()> {
        if self.pod_id.trim().is_empty() {
            return Err(CoreError::invalid_request("podId must not be empty"));
        }
        if Ulid::from_string(&self.id).is_err() {
            return Err(CoreError::invalid_request(format!(
                "id '{}' is not a valid ULID",
                self.id
            )));
        }
        if let Some(rejected) = self.rejected.first() {
            return Err(rejected.clone());
        }
        if matches!(&self.slice_id, Some(s) if s.trim().is_empty()) {
            return Err(CoreError::invalid_request("sliceId must not be empty"));
        }
        let has_literal = !self.insert.is_empty() || !self.delete.is_empty();
        if !has_literal && !self.has_refs() {
            return Err(CoreError::invalid_request(
                "at least one of insert, delete, insertFromRefs or deleteFromRefs is required",
            ));
        }
        if has_literal && self.has_refs() {
            return Err(CoreError::invalid_request(
                "insertFromRefs/deleteFromRefs cannot be combined with insert/delete",
            ));
        }
        if self.has_templates() && self.with.is_none() {
            return Err(CoreError::invalid_request(
                "template entries in insert/delete require a 'with' query",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_full_request() {
        let id = Ulid::new().to_string();
        let req: ChangeRequest = serde_json::from_value(json!({
            "id": id,
            "@context": {"ex": "http://example.org/"},
            "podId": "pod-1",
            "sliceId": "people",
            "assert": [{"type": "AssertNonEmptyResult", "query": "{ id }"}],
            "with": "{ people { id name } }",
            "insert": ["{{#each people}}{}{{/each}}", {"@id": "ex:1", "ex:name": "Bob"}],
            "delete": "*"
        }))
        .unwrap();

        assert_eq!(req.pod_id, "pod-1");
        assert_eq!(req.slice_id.as_deref(), Some("people"));
        assert_eq!(req.assertions[0].kind, AssertionKind::AssertNonEmptyResult);
        assert_eq!(req.insert.len(), 2);
        assert!(matches!(req.insert[1], ChangeEntry::Node(_)));
        assert_eq!(req.delete.len(), 1);
        assert!(req.delete[0].is_wildcard());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_unrecognized_assertion_type_round_trips() {
        let a: Assertion =
            serde_json::from_value(json!({"type": "AssertSomething", "query": "{ x }"})).unwrap();
        assert_eq!(a.kind, AssertionKind::Unrecognized("AssertSomething".into()));
        assert_eq!(serde_json::to_value(&a).unwrap()["type"], "AssertSomething");
    }

    #[test]
    fn test_requires_an_operation() {
        let req = ChangeRequest::new("pod-1");
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("at least one of"));
    }

    #[test]
    fn test_template_requires_with() {
        let req = ChangeRequest::new("pod-1").with_insert(json!("{{name}}"));
        assert!(req.validate().is_err());
        let req = req.with_query("{ name }");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_wildcard_requires_with() {
        let req = ChangeRequest::new("pod-1").with_delete(json!("*"));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_array_builds_one_node_per_element() {
        let req = ChangeRequest::new("pod-1").with_insert(json!([
            {"@id": "http://e.org/a", "http://e.org/p": "x"},
            {"@id": "http://e.org/b", "http://e.org/p": "y"}
        ]));
        assert_eq!(req.insert.len(), 2);
        assert!(req
            .insert
            .iter()
            .all(|e| matches!(e, ChangeEntry::Node(_))));
        assert!(!req.has_templates());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_scalar_entries_rejected() {
        for value in [json!(42), json!(true), json!(null), json!([{"@id": "x"}, 7])] {
            let req = ChangeRequest::new("pod-1").with_delete(value);
            assert!(req.delete.is_empty());
            let err = req.validate().unwrap_err();
            assert!(err.to_string().contains("template string or a node object"));
        }
    }

    #[test]
    fn test_refs_exclusive_with_literals() {
        let req = ChangeRequest::new("pod-1")
            .with_insert(json!({"@id": "http://example.org/1"}))
            .with_delete_ref(ExternalReference::new("file:///tmp/x.jsonld"));
        assert!(req.validate().is_err());

        let req = ChangeRequest::new("pod-1")
            .with_insert_ref(ExternalReference::new("file:///tmp/x.jsonld"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let mut req = ChangeRequest::new("pod-1").with_insert(json!({"@id": "http://e.org/1"}));
        req.id = "not-a-ulid".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_queued_at_from_ulid() {
        let ulid = Ulid::from_parts(1_700_000_000_000, 42);
        let mut req = ChangeRequest::new("pod-1");
        req.id = ulid.to_string();
        assert_eq!(
            req.queued_at().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }
}
