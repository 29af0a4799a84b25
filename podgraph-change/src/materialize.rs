//! Reference materialization
//!
//! Turns the request's record sources into buffered [`ChangeRecord`]s:
//!
//! 1. External references: `deleteFromRefs`, then `insertFromRefs`, each
//!    streamed through its loader in batches of `batch_size` statements.
//! 2. Embedded entries: the `with` query is executed once; literal node
//!    objects are used as-is, `"*"` expands to every node in the result, and
//!    template strings are rendered against the result. All maps are
//!    normalized against the request context; deletes are added to the
//!    buffer before inserts.
//!
//! Every statement is checked for absolute IRIs before it is buffered.
//!
//! [`ChangeRecord`]: podgraph_core::ChangeRecord

use crate::buffer::ChangeRequestTxBuffer;
use crate::error::{ChangeError, Result};
use crate::jsonld::{collect_nodes, JsonLdContext, StatementBuilder};
use crate::processor::Processor;
use crate::query::{has_results, QueryEngine, QueryRequest};
use crate::reference::ReferenceLoaders;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use futures::StreamExt;
use podgraph_core::{ChangeEntry, ChangeRequest, ChangeType, ExternalReference, RdfStatement};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Default number of referenced statements buffered per batch
pub const DEFAULT_REFERENCE_BATCH_SIZE: usize = 1000;

/// Default cap on node maps produced by template expansion
pub const DEFAULT_MAX_TEMPLATE_RESULTS: usize = 10_000;

/// Materializes references and embedded entries into the buffer
pub struct ReferenceMaterializer {
    query: Arc<dyn QueryEngine>,
    loaders: ReferenceLoaders,
    templates: TemplateEngine,
    batch_size: usize,
    max_template_results: usize,
}

/// Node maps for one change type, with how many came from templates
struct ExpandedEntries {
    maps: Vec<Map<String, JsonValue>>,
    templated: usize,
}

impl ReferenceMaterializer {
    pub fn new(query: Arc<dyn QueryEngine>, loaders: ReferenceLoaders) -> Self {
        Self {
            query,
            loaders,
            templates: TemplateEngine::new(),
            batch_size: DEFAULT_REFERENCE_BATCH_SIZE,
            max_template_results: DEFAULT_MAX_TEMPLATE_RESULTS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_template_results(mut self, max: usize) -> Self {
        self.max_template_results = max;
        self
    }

    async fn ingest_reference(
        &self,
        buffer: &mut ChangeRequestTxBuffer,
        reference: &ExternalReference,
        change_type: ChangeType,
    ) -> Result<()> {
        let pod_id = buffer.request().pod_id.clone();
        let mut batches = self
            .loaders
            .load(&pod_id, reference)
            .await?
            .chunks(self.batch_size);

        let mut total = 0;
        while let Some(batch) = batches.next().await {
            let statements = batch.into_iter().collect::<Result<Vec<_>>>()?;
            total += add_statements(buffer, change_type, statements)?;
        }
        tracing::debug!(reference = %reference, %change_type, records = total, "reference ingested");
        Ok(())
    }

    async fn with_bindings(&self, request: &ChangeRequest) -> Result<Option<JsonValue>> {
        let Some(with) = request.with.as_deref() else {
            return Ok(None);
        };
        let response = self
            .query
            .query(QueryRequest {
                context: &request.context,
                pod_id: &request.pod_id,
                slice_id: request.slice_id.as_deref(),
                query: with,
                variables: None,
            })
            .await?;
        Ok(Some(response.into_data()?))
    }

    fn expand_entries(
        &self,
        entries: &[ChangeEntry],
        bindings: Option<&JsonValue>,
    ) -> Result<ExpandedEntries> {
        let mut expanded = ExpandedEntries {
            maps: Vec::new(),
            templated: 0,
        };
        for entry in entries {
            match entry {
                ChangeEntry::Node(map) => expanded.maps.push(map.clone()),
                ChangeEntry::Template(template) => {
                    let bindings = bindings.ok_or_else(|| {
                        ChangeError::validation("template entries require a 'with' query")
                    })?;
                    let maps = if entry.is_wildcard() {
                        collect_nodes(bindings)
                    } else {
                        self.templates.render(template, bindings)?
                    };
                    expanded.templated += maps.len();
                    expanded.maps.extend(maps);
                }
            }
        }
        Ok(expanded)
    }

    async fn materialize_entries(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        let request = buffer.request();
        if request.insert.is_empty() && request.delete.is_empty() {
            return Ok(());
        }
        if request.has_templates() && request.with.is_none() {
            return Err(ChangeError::validation(
                "template entries in insert/delete require a 'with' query",
            ));
        }

        let bindings = self.with_bindings(request).await?;
        if let Some(data) = &bindings {
            if request.has_templates() && !has_results(data) {
                return Err(ChangeError::NoMatches(format!(
                    "'with' query matched nothing: {}",
                    request.with.as_deref().unwrap_or_default()
                )));
            }
        }

        let deletes = self.expand_entries(&request.delete, bindings.as_ref())?;
        let inserts = self.expand_entries(&request.insert, bindings.as_ref())?;
        let templated = deletes.templated + inserts.templated;
        if templated > self.max_template_results {
            return Err(ChangeError::TooManyMatches {
                count: templated,
                limit: self.max_template_results,
            });
        }

        let context = JsonLdContext::parse(&request.context)?;
        let mut builder = StatementBuilder::new();
        let delete_statements = to_statements(&mut builder, &deletes.maps, &context)?;
        let insert_statements = to_statements(&mut builder, &inserts.maps, &context)?;

        let deleted = add_statements(buffer, ChangeType::Delete, delete_statements)?;
        let inserted = add_statements(buffer, ChangeType::Insert, insert_statements)?;
        tracing::debug!(deleted, inserted, templated, "entries materialized");
        Ok(())
    }
}

fn to_statements(
    builder: &mut StatementBuilder,
    maps: &[Map<String, JsonValue>],
    context: &JsonLdContext,
) -> Result<Vec<RdfStatement>> {
    let mut statements = Vec::new();
    for map in maps {
        statements.extend(builder.node(map, context)?);
    }
    Ok(statements)
}

/// Validate and buffer statements as records of `change_type`
fn add_statements(
    buffer: &mut ChangeRequestTxBuffer,
    change_type: ChangeType,
    statements: Vec<RdfStatement>,
) -> Result<usize> {
    let mut records = Vec::with_capacity(statements.len());
    for statement in statements {
        statement.validate()?;
        records.push(buffer.record(change_type, statement));
    }
    Ok(buffer.add(records))
}

#[async_trait]
impl Processor for ReferenceMaterializer {
    fn name(&self) -> &str {
        "materialize"
    }

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        let delete_refs = buffer.request().delete_from_refs.clone();
        let insert_refs = buffer.request().insert_from_refs.clone();
        for reference in &delete_refs {
            self.ingest_reference(buffer, reference, ChangeType::Delete)
                .await?;
        }
        for reference in &insert_refs {
            self.ingest_reference(buffer, reference, ChangeType::Insert)
                .await?;
        }
        self.materialize_entries(buffer).await
    }
}
