//! Slice schemas, compiled shape sets and the reference shape validator
//!
//! A [`SliceSchema`] declares node shapes in a compact JSON form. Shape IRIs
//! may be compact and are expanded against the request context when the
//! schema is compiled into a [`ShapeSet`].

use crate::error::{ChangeError, Result};
use crate::jsonld::JsonLdContext;
use podgraph_core::vocab::{rdf, xsd};
use podgraph_core::{ChangeRecord, RdfObject, RdfStatement};
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Schema definition of one slice
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceSchema {
    pub id: String,
    /// Reject inserted predicates no shape declares
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub shapes: Vec<NodeShape>,
}

/// Constraints on every node of a target class
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeShape {
    pub target_class: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub properties: Vec<PropertyShape>,
}

/// Constraints on the values of one predicate
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyShape {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "IRI")]
    Iri,
    Literal,
}

impl NodeKind {
    fn matches(&self, object: &RdfObject) -> bool {
        match self {
            NodeKind::Iri => object.is_iri(),
            NodeKind::Literal => !object.is_iri(),
        }
    }
}

/// Which side of the change a shape set validates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeMode {
    Insert,
    Delete,
}

#[derive(Debug)]
struct CompiledProperty {
    path: String,
    min_count: Option<usize>,
    max_count: Option<usize>,
    datatype: Option<String>,
    node_kind: Option<NodeKind>,
    pattern: Option<Regex>,
    allowed: Option<Vec<String>>,
}

#[derive(Debug)]
struct CompiledShape {
    target_class: String,
    closed: bool,
    properties: Vec<CompiledProperty>,
}

/// Shapes of one slice, expanded and ready to validate records
#[derive(Debug)]
pub struct ShapeSet {
    slice_id: String,
    mode: ShapeMode,
    closed: bool,
    shapes: Vec<CompiledShape>,
    declared: FxHashSet<String>,
}

impl ShapeSet {
    /// Compile `schema` with compact IRIs expanded against `context`
    pub fn compile(
        schema: &SliceSchema,
        context: &JsonLdContext,
        mode: ShapeMode,
    ) -> Result<Self> {
        let mut declared = FxHashSet::default();
        declared.insert(rdf::TYPE.to_string());
        let mut shapes = Vec::with_capacity(schema.shapes.len());

        for shape in &schema.shapes {
            let mut properties = Vec::with_capacity(shape.properties.len());
            for property in &shape.properties {
                let path = context.expand_iri(&property.path, true);
                declared.insert(path.clone());
                let pattern = property
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| {
                        ChangeError::validation(format!(
                            "invalid pattern for '{}' in slice '{}': {e}",
                            property.path, schema.id
                        ))
                    })?;
                properties.push(CompiledProperty {
                    path,
                    min_count: property.min_count,
                    max_count: property.max_count,
                    datatype: property
                        .datatype
                        .as_deref()
                        .map(|dt| context.expand_iri(dt, true)),
                    node_kind: property.node_kind,
                    pattern,
                    allowed: property.allowed.as_ref().map(|values| {
                        values.iter().map(|v| context.expand_iri(v, true)).collect()
                    }),
                });
            }
            shapes.push(CompiledShape {
                target_class: context.expand_iri(&shape.target_class, true),
                closed: shape.closed,
                properties,
            });
        }

        Ok(Self {
            slice_id: schema.id.clone(),
            mode,
            closed: schema.closed,
            shapes,
            declared,
        })
    }

    pub fn slice_id(&self) -> &str {
        &self.slice_id
    }

    pub fn mode(&self) -> ShapeMode {
        self.mode
    }

    pub fn is_declared(&self, predicate: &str) -> bool {
        self.declared.contains(predicate)
    }
}

/// Outcome of validating a record set against a shape set
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub conforms: bool,
    #[serde(default)]
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn conforming() -> Self {
        Self {
            conforms: true,
            results: Vec::new(),
        }
    }

    fn from_results(results: Vec<ValidationResult>) -> Self {
        Self {
            conforms: results.is_empty(),
            results,
        }
    }

    pub fn violation_count(&self) -> usize {
        self.results.len()
    }
}

/// A single constraint violation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub focus_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_shape: Option<String>,
    pub constraint: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ValidationResult {
    fn new(focus_node: &str, constraint: &str, message: String) -> Self {
        Self {
            focus_node: focus_node.to_string(),
            result_path: None,
            source_shape: None,
            constraint: constraint.to_string(),
            message,
            value: None,
        }
    }

    fn at(mut self, path: &str) -> Self {
        self.result_path = Some(path.to_string());
        self
    }

    fn in_shape(mut self, target_class: &str) -> Self {
        self.source_shape = Some(target_class.to_string());
        self
    }

    fn with_value(mut self, value: &RdfObject) -> Self {
        self.value = Some(value.as_str().to_string());
        self
    }
}

/// Statements of one record set grouped by subject
#[derive(Default)]
struct FocusNode<'a> {
    types: FxHashSet<&'a str>,
    values: FxHashMap<&'a str, Vec<&'a RdfStatement>>,
}

fn group_by_subject(records: &[ChangeRecord]) -> Vec<(&str, FocusNode<'_>)> {
    let mut order = Vec::new();
    let mut nodes: FxHashMap<&str, FocusNode<'_>> = FxHashMap::default();
    for record in records {
        let st = record.statement();
        let node = nodes.entry(st.subject.as_str()).or_insert_with(|| {
            order.push(st.subject.as_str());
            FocusNode::default()
        });
        if st.predicate == rdf::TYPE {
            node.types.insert(st.object.as_str());
        }
        node.values.entry(st.predicate.as_str()).or_default().push(st);
    }
    order
        .into_iter()
        .filter_map(|subject| nodes.remove(subject).map(|node| (subject, node)))
        .collect()
}

fn effective_datatype(st: &RdfStatement) -> &str {
    st.data_type.as_deref().unwrap_or(xsd::STRING)
}

fn validate_property(
    focus: &str,
    shape: &CompiledShape,
    property: &CompiledProperty,
    values: &[&RdfStatement],
    results: &mut Vec<ValidationResult>,
) {
    let violation = |constraint: &str, message: String| {
        ValidationResult::new(focus, constraint, message)
            .at(&property.path)
            .in_shape(&shape.target_class)
    };

    if let Some(min) = property.min_count {
        if values.len() < min {
            results.push(violation(
                "minCount",
                format!("Expected at least {min} value(s) but found {}", values.len()),
            ));
        }
    }
    if let Some(max) = property.max_count {
        if values.len() > max {
            results.push(violation(
                "maxCount",
                format!("Expected at most {max} value(s) but found {}", values.len()),
            ));
        }
    }

    for st in values {
        if let Some(kind) = property.node_kind {
            if !kind.matches(&st.object) {
                results.push(
                    violation("nodeKind", format!("Value is not of node kind {kind:?}"))
                        .with_value(&st.object),
                );
            }
        }
        if let Some(datatype) = &property.datatype {
            if st.object.is_iri() || effective_datatype(st) != datatype {
                results.push(
                    violation("datatype", format!("Value is not of datatype {datatype}"))
                        .with_value(&st.object),
                );
            }
        }
        if let Some(pattern) = &property.pattern {
            if !pattern.is_match(st.object.as_str()) {
                results.push(
                    violation(
                        "pattern",
                        format!("Value does not match pattern '{}'", pattern.as_str()),
                    )
                    .with_value(&st.object),
                );
            }
        }
        if let Some(allowed) = &property.allowed {
            if !allowed.iter().any(|a| a == st.object.as_str()) {
                results.push(
                    violation("in", "Value is not in the allowed list".to_string())
                        .with_value(&st.object),
                );
            }
        }
    }
}

/// Reference implementation of the conformance capability
///
/// Insert shapes check every property constraint of the shapes targeting a
/// subject's classes, using only the records being validated. Delete shapes
/// only check that every predicate is declared by the slice.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapeValidator;

impl ShapeValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_records(
        &self,
        records: &[ChangeRecord],
        shapes: &ShapeSet,
    ) -> ValidationReport {
        let mut results = Vec::new();

        if shapes.mode == ShapeMode::Delete {
            for record in records {
                let st = record.statement();
                if !shapes.is_declared(&st.predicate) {
                    results.push(
                        ValidationResult::new(
                            &st.subject,
                            "closed",
                            format!(
                                "Predicate is not declared by slice '{}'",
                                shapes.slice_id
                            ),
                        )
                        .at(&st.predicate),
                    );
                }
            }
            return ValidationReport::from_results(results);
        }

        for (subject, node) in group_by_subject(records) {
            let mut covered: FxHashSet<&str> = FxHashSet::default();
            let mut closed_shape = false;
            for shape in shapes
                .shapes
                .iter()
                .filter(|s| node.types.contains(s.target_class.as_str()))
            {
                closed_shape |= shape.closed;
                for property in &shape.properties {
                    covered.insert(property.path.as_str());
                    let values = node
                        .values
                        .get(property.path.as_str())
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    validate_property(subject, shape, property, values, &mut results);
                }
            }

            for predicate in node.values.keys().copied() {
                if predicate == rdf::TYPE {
                    continue;
                }
                let undeclared = (closed_shape && !covered.contains(predicate))
                    || (shapes.closed && !shapes.is_declared(predicate));
                if undeclared {
                    results.push(
                        ValidationResult::new(
                            subject,
                            "closed",
                            "Predicate is not allowed by a closed shape".to_string(),
                        )
                        .at(predicate),
                    );
                }
            }
        }

        ValidationReport::from_results(results)
    }
}
