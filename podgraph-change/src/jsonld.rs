//! JSON-LD normalization into RDF statements
//!
//! Change entries and referenced documents are JSON-LD node objects written
//! against the request's context. This module expands them into fully
//! qualified [`RdfStatement`]s:
//!
//! - prefixes, term definitions, `@vocab` and `@base` from the context
//! - `@type` → `rdf:type`
//! - `@value` / `@type` / `@language` value objects
//! - nested node objects (linked through their subject IRI)
//! - `@graph` containers, whose `@id` names the graph of their children
//! - native JSON numbers and booleans as `xsd:integer` / `xsd:double` /
//!   `xsd:boolean` literals
//!
//! Blank nodes never reach the record model: anonymous nodes and `_:` labels
//! are skolemized into `urn:podgraph:skolem:<ulid>` IRIs, stable per label
//! within one [`StatementBuilder`].
//!
//! `@list` values are emitted as individual statements; list order is not
//! preserved. `@reverse` and remote contexts are not supported.

use crate::error::{ChangeError, Result};
use podgraph_core::vocab::{rdf, xsd, DEFAULT_GRAPH, SKOLEM_PREFIX};
use podgraph_core::{RdfObject, RdfStatement};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value as JsonValue};
use ulid::Ulid;

/// How string values of a term are interpreted
#[derive(Clone, Debug, PartialEq, Eq)]
enum TermType {
    /// `"@type": "@id"`: strings are IRIs
    Id,
    /// `"@type": "<datatype>"`: strings are typed literals
    Datatype(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TermDefinition {
    iri: String,
    term_type: Option<TermType>,
}

/// A parsed JSON-LD context
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JsonLdContext {
    terms: FxHashMap<String, TermDefinition>,
    vocab: Option<String>,
    base: Option<String>,
}

impl JsonLdContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a context value (object, array of objects, or null)
    pub fn parse(context: &JsonValue) -> Result<Self> {
        Self::new().merge(context)
    }

    /// Return a new context with `context` layered on top of this one
    pub fn merge(&self, context: &JsonValue) -> Result<Self> {
        let mut merged = self.clone();
        match context {
            JsonValue::Null => merged = JsonLdContext::new(),
            JsonValue::Array(items) => {
                for item in items {
                    merged = merged.merge(item)?;
                }
            }
            JsonValue::Object(map) => merged.apply(map)?,
            JsonValue::String(remote) => {
                return Err(ChangeError::validation(format!(
                    "remote context '{remote}' is not supported"
                )))
            }
            other => {
                return Err(ChangeError::validation(format!(
                    "invalid @context value: {other}"
                )))
            }
        }
        Ok(merged)
    }

    fn apply(&mut self, map: &Map<String, JsonValue>) -> Result<()> {
        // keywords first so term definitions can use @vocab
        if let Some(vocab) = map.get("@vocab") {
            self.vocab = vocab.as_str().map(|v| self.expand_iri(v, false));
        }
        if let Some(base) = map.get("@base") {
            self.base = base.as_str().map(str::to_string);
        }
        for (term, value) in map {
            if term.starts_with('@') {
                continue;
            }
            let definition = match value {
                JsonValue::Null => {
                    self.terms.remove(term);
                    continue;
                }
                JsonValue::String(iri) => TermDefinition {
                    iri: iri.clone(),
                    term_type: None,
                },
                JsonValue::Object(def) => {
                    let iri = match def.get("@id").and_then(JsonValue::as_str) {
                        Some(iri) => iri.to_string(),
                        None => term.clone(),
                    };
                    let term_type = match def.get("@type").and_then(JsonValue::as_str) {
                        Some("@id") | Some("@vocab") => Some(TermType::Id),
                        Some(dt) => Some(TermType::Datatype(dt.to_string())),
                        None => None,
                    };
                    TermDefinition { iri, term_type }
                }
                other => {
                    return Err(ChangeError::validation(format!(
                        "invalid definition for term '{term}': {other}"
                    )))
                }
            };
            self.terms.insert(term.clone(), definition);
        }
        // expand definitions that refer to other terms, e.g. "name": "schema:name"
        let snapshot = self.clone();
        for def in self.terms.values_mut() {
            def.iri = snapshot.expand_prefixed(&def.iri).unwrap_or_else(|| def.iri.clone());
            if let Some(TermType::Datatype(dt)) = &mut def.term_type {
                *dt = snapshot.expand_iri(dt, true);
            }
        }
        Ok(())
    }

    fn expand_prefixed(&self, value: &str) -> Option<String> {
        let (prefix, suffix) = value.split_once(':')?;
        if suffix.starts_with("//") {
            return None;
        }
        self.terms
            .get(prefix)
            .map(|def| format!("{}{suffix}", def.iri))
    }

    /// Expand a compact IRI or term.
    ///
    /// `vocab` selects `@vocab` (property and type position) over `@base`
    /// (node identifiers) for relative values. Blank node labels and values
    /// that cannot be expanded are returned unchanged.
    pub fn expand_iri(&self, value: &str, vocab: bool) -> String {
        if value.starts_with("_:") || value.starts_with('@') {
            return value.to_string();
        }
        if vocab {
            if let Some(def) = self.terms.get(value) {
                return def.iri.clone();
            }
        }
        if let Some(expanded) = self.expand_prefixed(value) {
            return expanded;
        }
        if podgraph_core::iri::scheme(value).is_some() {
            return value.to_string();
        }
        let prefix = if vocab { &self.vocab } else { &self.base };
        match prefix {
            Some(p) => format!("{p}{value}"),
            None => value.to_string(),
        }
    }

    fn term_type(&self, term: &str) -> Option<&TermType> {
        self.terms.get(term).and_then(|d| d.term_type.as_ref())
    }
}

/// Converts JSON-LD node objects into statements
///
/// Skolem IRIs are remembered per blank node label for the lifetime of the
/// builder, so one builder should be used per materialization.
#[derive(Debug, Default)]
pub struct StatementBuilder {
    skolem: FxHashMap<String, String>,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn skolemize(&mut self, label: Option<&str>) -> String {
        let mint = || format!("{SKOLEM_PREFIX}{}", Ulid::new().to_string().to_lowercase());
        match label {
            Some(label) => self
                .skolem
                .entry(label.to_string())
                .or_insert_with(mint)
                .clone(),
            None => mint(),
        }
    }

    /// Convert a JSON-LD document (node object, array, or `@graph` wrapper)
    pub fn document(
        &mut self,
        document: &JsonValue,
        context: &JsonLdContext,
    ) -> Result<Vec<RdfStatement>> {
        let mut out = Vec::new();
        match document {
            JsonValue::Array(items) => {
                for item in items {
                    self.top_level(item, context, &mut out)?;
                }
            }
            JsonValue::Object(_) => self.top_level(document, context, &mut out)?,
            other => {
                return Err(ChangeError::validation(format!(
                    "expected a JSON-LD object or array, found {other}"
                )))
            }
        }
        Ok(out)
    }

    /// Convert one node object and everything nested in it
    pub fn node(
        &mut self,
        node: &Map<String, JsonValue>,
        context: &JsonLdContext,
    ) -> Result<Vec<RdfStatement>> {
        let mut out = Vec::new();
        self.node_into(node, context, DEFAULT_GRAPH, &mut out)?;
        Ok(out)
    }

    fn top_level(
        &mut self,
        value: &JsonValue,
        context: &JsonLdContext,
        out: &mut Vec<RdfStatement>,
    ) -> Result<()> {
        let node = value.as_object().ok_or_else(|| {
            ChangeError::validation(format!("expected a JSON-LD node object, found {value}"))
        })?;
        self.node_into(node, context, DEFAULT_GRAPH, out)?;
        Ok(())
    }

    fn node_into(
        &mut self,
        node: &Map<String, JsonValue>,
        parent_context: &JsonLdContext,
        graph: &str,
        out: &mut Vec<RdfStatement>,
    ) -> Result<String> {
        let local;
        let context = match node.get("@context") {
            Some(ctx) => {
                local = parent_context.merge(ctx)?;
                &local
            }
            None => parent_context,
        };

        let explicit_id = match node.get("@id") {
            Some(JsonValue::String(id)) => Some(id.as_str()),
            Some(other) => {
                return Err(ChangeError::validation(format!(
                    "@id must be a string, found {other}"
                )))
            }
            None => None,
        };

        // a node holding only @graph (plus @id/@context) is a graph container
        if let Some(children) = node.get("@graph") {
            let is_container = node
                .keys()
                .all(|k| matches!(k.as_str(), "@graph" | "@id" | "@context"));
            if is_container {
                let graph_iri = explicit_id
                    .map(|id| self.node_iri(id, context))
                    .unwrap_or_else(|| graph.to_string());
                self.graph_children(children, context, &graph_iri, out)?;
                return Ok(graph_iri);
            }
        }

        let subject = match explicit_id {
            Some(id) => self.node_iri(id, context),
            None => self.skolemize(None),
        };

        for (key, value) in node {
            match key.as_str() {
                "@type" => {
                    for ty in as_values(value) {
                        let ty = ty.as_str().ok_or_else(|| {
                            ChangeError::validation(format!("@type must be a string, found {ty}"))
                        })?;
                        out.push(
                            RdfStatement::iri(&subject, rdf::TYPE, context.expand_iri(ty, true))
                                .with_graph(graph),
                        );
                    }
                }
                "@graph" => self.graph_children(value, context, graph, out)?,
                k if k.starts_with('@') => {}
                property => {
                    let predicate = context.expand_iri(property, true);
                    let term_type = context.term_type(property).cloned();
                    for item in as_values(value) {
                        self.value_into(
                            &subject,
                            &predicate,
                            item,
                            term_type.as_ref(),
                            context,
                            graph,
                            out,
                        )?;
                    }
                }
            }
        }
        Ok(subject)
    }

    fn graph_children(
        &mut self,
        children: &JsonValue,
        context: &JsonLdContext,
        graph: &str,
        out: &mut Vec<RdfStatement>,
    ) -> Result<()> {
        for child in as_values(children) {
            let child = child.as_object().ok_or_else(|| {
                ChangeError::validation(format!("@graph entries must be objects, found {child}"))
            })?;
            self.node_into(child, context, graph, out)?;
        }
        Ok(())
    }

    fn node_iri(&mut self, id: &str, context: &JsonLdContext) -> String {
        match id.strip_prefix("_:") {
            Some(label) => self.skolemize(Some(label)),
            None => context.expand_iri(id, false),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn value_into(
        &mut self,
        subject: &str,
        predicate: &str,
        value: &JsonValue,
        term_type: Option<&TermType>,
        context: &JsonLdContext,
        graph: &str,
        out: &mut Vec<RdfStatement>,
    ) -> Result<()> {
        let statement = |object: RdfObject| RdfStatement {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object,
            graph: graph.to_string(),
            data_type: None,
            language: None,
        };

        match value {
            JsonValue::Null => {}
            JsonValue::Bool(b) => out.push(
                statement(RdfObject::Literal(b.to_string())).with_data_type(xsd::BOOLEAN),
            ),
            JsonValue::Number(n) => {
                let dt = if n.is_f64() { xsd::DOUBLE } else { xsd::INTEGER };
                let dt = match term_type {
                    Some(TermType::Datatype(explicit)) => explicit.as_str(),
                    _ => dt,
                };
                out.push(statement(RdfObject::Literal(n.to_string())).with_data_type(dt));
            }
            JsonValue::String(s) => match term_type {
                Some(TermType::Id) => {
                    let iri = self.node_iri(s, context);
                    out.push(statement(RdfObject::Iri(iri)));
                }
                Some(TermType::Datatype(dt)) => {
                    out.push(statement(RdfObject::Literal(s.clone())).with_data_type(dt.clone()))
                }
                None => out.push(statement(RdfObject::Literal(s.clone()))),
            },
            JsonValue::Array(items) => {
                for item in items {
                    self.value_into(subject, predicate, item, term_type, context, graph, out)?;
                }
            }
            JsonValue::Object(obj) => {
                if let Some(literal) = obj.get("@value") {
                    out.push(value_object(statement, literal, obj, context)?);
                } else if let Some(list) = obj.get("@list").or_else(|| obj.get("@set")) {
                    for item in as_values(list) {
                        self.value_into(subject, predicate, item, term_type, context, graph, out)?;
                    }
                } else if is_reference(obj) {
                    let id = obj.get("@id").and_then(JsonValue::as_str).unwrap_or_default();
                    let iri = self.node_iri(id, context);
                    out.push(statement(RdfObject::Iri(iri)));
                } else {
                    let nested = self.node_into(obj, context, graph, out)?;
                    out.push(statement(RdfObject::Iri(nested)));
                }
            }
        }
        Ok(())
    }
}

fn value_object(
    statement: impl Fn(RdfObject) -> RdfStatement,
    literal: &JsonValue,
    obj: &Map<String, JsonValue>,
    context: &JsonLdContext,
) -> Result<RdfStatement> {
    let language = obj.get("@language").and_then(JsonValue::as_str);
    let data_type = obj.get("@type").and_then(JsonValue::as_str);
    if language.is_some() && data_type.is_some() {
        return Err(ChangeError::validation(
            "@language cannot be used for values with a specified @type",
        ));
    }
    let lexical = match literal {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => {
            return Err(ChangeError::validation("@value must not be null"));
        }
        other => other.to_string(),
    };
    let mut st = statement(RdfObject::Literal(lexical));
    if let Some(lang) = language {
        st = st.with_language(lang).with_data_type(rdf::LANG_STRING);
    } else if let Some(dt) = data_type {
        let dt = context.expand_iri(dt, true);
        if dt != xsd::STRING {
            st = st.with_data_type(dt);
        }
    } else {
        match literal {
            JsonValue::Bool(_) => st = st.with_data_type(xsd::BOOLEAN),
            JsonValue::Number(n) if n.is_f64() => st = st.with_data_type(xsd::DOUBLE),
            JsonValue::Number(_) => st = st.with_data_type(xsd::INTEGER),
            _ => {}
        }
    }
    Ok(st)
}

/// `{"@id": ...}` with nothing else describing the node
fn is_reference(obj: &Map<String, JsonValue>) -> bool {
    obj.contains_key("@id") && obj.keys().all(|k| k == "@id" || k == "@context")
}

fn as_values(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Collect node objects from query result data.
///
/// Objects carrying `@id` are nodes; other objects and arrays are walked, so
/// `{"people": [{"@id": ..}, ..]}` yields the people.
pub fn collect_nodes(data: &JsonValue) -> Vec<Map<String, JsonValue>> {
    let mut nodes = Vec::new();
    collect_into(data, &mut nodes);
    nodes
}

fn collect_into(data: &JsonValue, nodes: &mut Vec<Map<String, JsonValue>>) {
    match data {
        JsonValue::Array(items) => items.iter().for_each(|i| collect_into(i, nodes)),
        JsonValue::Object(obj) if obj.contains_key("@id") => nodes.push(obj.clone()),
        JsonValue::Object(obj) => obj.values().for_each(|v| collect_into(v, nodes)),
        _ => {}
    }
}
