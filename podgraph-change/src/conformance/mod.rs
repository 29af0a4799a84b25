//! Schema conformance gate
//!
//! Requests bound to a slice have their buffered records checked against
//! the slice schema before any storage backend runs. Inserts and deletes are
//! validated separately against their own shape sets.

mod shapes;

pub use shapes::{
    NodeKind, NodeShape, PropertyShape, ShapeMode, ShapeSet, ShapeValidator, SliceSchema,
    ValidationReport, ValidationResult,
};

use crate::buffer::{ChangeRequestTxBuffer, RecordFilter};
use crate::error::{ChangeError, Result};
use crate::jsonld::JsonLdContext;
use crate::processor::Processor;
use async_trait::async_trait;
use parking_lot::RwLock;
use podgraph_core::{ChangeRecord, ChangeType};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Looks up the schema of a slice
#[async_trait]
pub trait SliceSchemaSource: Send + Sync {
    async fn load(&self, pod_id: &str, slice_id: &str) -> Result<Option<SliceSchema>>;
}

/// Derives shape sets from a slice schema and validates records against them
pub trait ConformanceCapability: Send + Sync {
    fn insert_shapes(&self, schema: &SliceSchema, context: &JsonLdContext) -> Result<ShapeSet>;

    fn delete_shapes(&self, schema: &SliceSchema, context: &JsonLdContext) -> Result<ShapeSet>;

    fn validate(&self, records: &[ChangeRecord], shapes: &ShapeSet) -> ValidationReport;
}

impl ConformanceCapability for ShapeValidator {
    fn insert_shapes(&self, schema: &SliceSchema, context: &JsonLdContext) -> Result<ShapeSet> {
        ShapeSet::compile(schema, context, ShapeMode::Insert)
    }

    fn delete_shapes(&self, schema: &SliceSchema, context: &JsonLdContext) -> Result<ShapeSet> {
        ShapeSet::compile(schema, context, ShapeMode::Delete)
    }

    fn validate(&self, records: &[ChangeRecord], shapes: &ShapeSet) -> ValidationReport {
        self.validate_records(records, shapes)
    }
}

/// In-memory slice schemas keyed by pod and slice
#[derive(Debug, Default)]
pub struct MemorySliceSchemaSource {
    schemas: RwLock<FxHashMap<(String, String), SliceSchema>>,
}

impl MemorySliceSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` for `pod_id` under the schema's own id
    pub fn insert(&self, pod_id: impl Into<String>, schema: SliceSchema) {
        self.schemas
            .write()
            .insert((pod_id.into(), schema.id.clone()), schema);
    }
}

#[async_trait]
impl SliceSchemaSource for MemorySliceSchemaSource {
    async fn load(&self, pod_id: &str, slice_id: &str) -> Result<Option<SliceSchema>> {
        Ok(self
            .schemas
            .read()
            .get(&(pod_id.to_string(), slice_id.to_string()))
            .cloned())
    }
}

/// Processor validating buffered records against the request's slice schema
pub struct SchemaConformanceGate {
    schemas: Arc<dyn SliceSchemaSource>,
    capability: Arc<dyn ConformanceCapability>,
}

impl SchemaConformanceGate {
    pub fn new(
        schemas: Arc<dyn SliceSchemaSource>,
        capability: Arc<dyn ConformanceCapability>,
    ) -> Self {
        Self { schemas, capability }
    }

    fn check(
        &self,
        slice_id: &str,
        change_type: ChangeType,
        records: &[ChangeRecord],
        shapes: &ShapeSet,
    ) -> Result<()> {
        let report = self.capability.validate(records, shapes);
        if report.conforms {
            return Ok(());
        }
        let message = format!(
            "{} {} record(s) violate {} constraint(s) of slice '{slice_id}'",
            records.len(),
            change_type.as_str().to_lowercase(),
            report.violation_count(),
        );
        Err(ChangeError::Conformance {
            message,
            report: serde_json::to_value(&report)?,
        })
    }
}

#[async_trait]
impl Processor for SchemaConformanceGate {
    fn name(&self) -> &str {
        "conformance"
    }

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        let request = buffer.request();
        let Some(slice_id) = request.slice_id.as_deref() else {
            return Ok(());
        };
        let schema = self
            .schemas
            .load(&request.pod_id, slice_id)
            .await?
            .ok_or_else(|| {
                ChangeError::validation(format!(
                    "slice '{slice_id}' of pod '{}' has no schema",
                    request.pod_id
                ))
            })?;
        let context = JsonLdContext::parse(&request.context)?;

        let inserts = buffer.collect(&RecordFilter::inserts());
        if !inserts.is_empty() {
            let shapes = self.capability.insert_shapes(&schema, &context)?;
            self.check(slice_id, ChangeType::Insert, &inserts, &shapes)?;
        }
        let deletes = buffer.collect(&RecordFilter::deletes());
        if !deletes.is_empty() {
            let shapes = self.capability.delete_shapes(&schema, &context)?;
            self.check(slice_id, ChangeType::Delete, &deletes, &shapes)?;
        }

        tracing::debug!(
            slice_id,
            inserts = inserts.len(),
            deletes = deletes.len(),
            "records conform to slice schema"
        );
        Ok(())
    }
}
