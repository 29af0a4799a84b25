//! Change request pipeline
//!
//! [`PipelineBuilder`] resolves the configured stage ids into processors
//! once, at startup. [`ChangePipeline::process`] then runs one request:
//!
//! ```text
//! QUEUED -> validate request -> open buffer -> run stages in order
//!        -> collect statistics -> destroy buffer -> terminal status
//!        -> write change log -> publish event
//! ```
//!
//! Stages share the request's buffer and run strictly one after another.
//! The first failing stage cancels every later one; its error decides the
//! terminal status.

use crate::assertions::AssertionEvaluator;
use crate::audit::{
    audit_error, BroadcastOutbox, ChangeEvent, ChangeLog, ChangeOutbox, MemoryChangeLog,
};
use crate::buffer::ChangeRequestTxBuffer;
use crate::config::{BackendKind, PipelineConfig, StageId};
use crate::conformance::{
    ConformanceCapability, MemorySliceSchemaSource, SchemaConformanceGate, ShapeValidator,
    SliceSchemaSource,
};
use crate::error::{ChangeError, Result};
use crate::materialize::ReferenceMaterializer;
use crate::processor::Processor;
use crate::query::QueryEngine;
use crate::reference::ReferenceLoaders;
use crate::storage::{ClaimSelector, MemoryBackend, StorageBackend};
use chrono::Utc;
use podgraph_core::{ChangeReport, ChangeRequest, ChangeStatistics, ChangeStatusCode};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::Instrument;

/// One resolved entry of the stage chain
#[derive(Clone)]
pub enum PipelineStage {
    Processor(Arc<dyn Processor>),
    Storage(Arc<dyn StorageBackend>),
}

impl PipelineStage {
    pub fn name(&self) -> &str {
        match self {
            PipelineStage::Processor(p) => p.name(),
            PipelineStage::Storage(b) => b.id(),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, PipelineStage::Storage(_))
    }

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        match self {
            PipelineStage::Processor(p) => p.process(buffer).await,
            PipelineStage::Storage(b) => b.process(buffer).await,
        }
    }
}

/// Assembles a [`ChangePipeline`] from configuration and capabilities
pub struct PipelineBuilder {
    config: PipelineConfig,
    query: Option<Arc<dyn QueryEngine>>,
    loaders: ReferenceLoaders,
    conformance: Arc<dyn ConformanceCapability>,
    schemas: Arc<dyn SliceSchemaSource>,
    change_log: Arc<dyn ChangeLog>,
    outbox: Arc<dyn ChangeOutbox>,
    backends: FxHashMap<String, Arc<dyn StorageBackend>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            query: None,
            loaders: ReferenceLoaders::new(),
            conformance: Arc::new(ShapeValidator::new()),
            schemas: Arc::new(MemorySliceSchemaSource::new()),
            change_log: Arc::new(MemoryChangeLog::new()),
            outbox: Arc::new(BroadcastOutbox::default()),
            backends: FxHashMap::default(),
        }
    }

    pub fn query_engine(mut self, query: Arc<dyn QueryEngine>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn reference_loaders(mut self, loaders: ReferenceLoaders) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn conformance(mut self, capability: Arc<dyn ConformanceCapability>) -> Self {
        self.conformance = capability;
        self
    }

    pub fn slice_schemas(mut self, schemas: Arc<dyn SliceSchemaSource>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn change_log(mut self, change_log: Arc<dyn ChangeLog>) -> Self {
        self.change_log = change_log;
        self
    }

    pub fn outbox(mut self, outbox: Arc<dyn ChangeOutbox>) -> Self {
        self.outbox = outbox;
        self
    }

    /// Use `backend` for the configured backend of the same id instead of
    /// constructing one from its kind
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(backend.id().to_string(), backend);
        self
    }

    /// Validate the configuration and resolve every stage
    pub fn build(mut self) -> Result<ChangePipeline> {
        let config = self.config;
        config.validate()?;

        if let Some(unknown) = self.backends.keys().find(|id| config.backend(id).is_none()) {
            return Err(ChangeError::config(format!(
                "backend '{unknown}' is not configured"
            )));
        }

        let mut backends: Vec<Arc<dyn StorageBackend>> =
            Vec::with_capacity(config.backends.len());
        for backend_config in &config.backends {
            let injected = self.backends.remove(&backend_config.id);
            let backend: Arc<dyn StorageBackend> = match injected {
                Some(backend) => backend,
                None => match backend_config.kind {
                    BackendKind::Memory => {
                        let selector = match &backend_config.claim_predicate {
                            Some(p) => ClaimSelector::SubjectsWithPredicate(p.clone()),
                            None => ClaimSelector::All,
                        };
                        Arc::new(MemoryBackend::with_selector(&backend_config.id, selector))
                    }
                },
            };
            backends.push(backend);
        }
        let find_backend = |id: &str| backends.iter().find(|b| b.id() == id).cloned();

        let default_id = config.default_backend_id()?;
        let default_backend = find_backend(default_id).ok_or_else(|| {
            ChangeError::config(format!("unknown default backend '{default_id}'"))
        })?;

        let stage_ids = config.resolved_stages();
        let needs_query = stage_ids
            .iter()
            .any(|s| matches!(s, StageId::Assertions | StageId::Materialize));
        let query = match (self.query, needs_query) {
            (Some(query), _) => Some(query),
            (None, false) => None,
            (None, true) => {
                return Err(ChangeError::config(
                    "assertion and materialize stages require a query engine",
                ))
            }
        };

        let mut stages = Vec::with_capacity(stage_ids.len());
        for stage_id in &stage_ids {
            let stage = match stage_id {
                StageId::Assertions => PipelineStage::Processor(Arc::new(
                    AssertionEvaluator::new(required(&query)?)
                        .with_parallelism(config.assertion_parallelism),
                )),
                StageId::Materialize => PipelineStage::Processor(Arc::new(
                    ReferenceMaterializer::new(required(&query)?, self.loaders.clone())
                        .with_batch_size(config.reference_batch_size)
                        .with_max_template_results(config.max_template_results),
                )),
                StageId::Conformance => PipelineStage::Processor(Arc::new(
                    SchemaConformanceGate::new(self.schemas.clone(), self.conformance.clone()),
                )),
                StageId::Storage(id) => {
                    let backend = find_backend(id).ok_or_else(|| {
                        ChangeError::config(format!("stage '{stage_id}' names an unknown backend"))
                    })?;
                    PipelineStage::Storage(backend)
                }
            };
            stages.push(stage);
        }

        // an injected backend may claim less than its configuration says
        if !config.allow_partial_coverage {
            let last = stages.iter().rev().find_map(|s| match s {
                PipelineStage::Storage(b) => Some(b),
                PipelineStage::Processor(_) => None,
            });
            if let Some(backend) = last.filter(|b| !b.claims_all()) {
                return Err(ChangeError::config(format!(
                    "last storage stage '{}' does not claim every record",
                    backend.id()
                )));
            }
        }

        tracing::info!(
            stages = ?stage_ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
            default_backend = default_id,
            "change pipeline built"
        );

        Ok(ChangePipeline {
            stages,
            backends,
            default_backend,
            change_log: self.change_log,
            outbox: self.outbox,
            record_preprocessed: config.record_preprocessed,
        })
    }
}

fn required(query: &Option<Arc<dyn QueryEngine>>) -> Result<Arc<dyn QueryEngine>> {
    query
        .clone()
        .ok_or_else(|| ChangeError::config("query engine is not configured"))
}

/// Runs change requests through the configured stage chain
pub struct ChangePipeline {
    stages: Vec<PipelineStage>,
    backends: Vec<Arc<dyn StorageBackend>>,
    default_backend: Arc<dyn StorageBackend>,
    change_log: Arc<dyn ChangeLog>,
    outbox: Arc<dyn ChangeOutbox>,
    record_preprocessed: bool,
}

impl std::fmt::Debug for ChangePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePipeline")
            .field("stages", &self.stage_names())
            .field("default_backend", &self.default_backend.id())
            .field("record_preprocessed", &self.record_preprocessed)
            .finish()
    }
}

impl ChangePipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(PipelineStage::name).collect()
    }

    /// Backends in configuration order
    pub fn backends(&self) -> &[Arc<dyn StorageBackend>] {
        &self.backends
    }

    pub fn backend(&self, id: &str) -> Option<&Arc<dyn StorageBackend>> {
        self.backends.iter().find(|b| b.id() == id)
    }

    /// Backend serving reads that do not name one
    pub fn default_backend(&self) -> &Arc<dyn StorageBackend> {
        &self.default_backend
    }

    pub fn change_log(&self) -> &Arc<dyn ChangeLog> {
        &self.change_log
    }

    /// Roll back `change_request_id` in every backend; returns the total
    /// number of records removed
    pub async fn rollback(&self, pod_id: &str, change_request_id: &str) -> Result<usize> {
        let mut removed = 0;
        for backend in &self.backends {
            removed += backend.rollback(pod_id, change_request_id).await?;
        }
        Ok(removed)
    }

    /// Process one change request to a terminal report.
    ///
    /// Stage failures are reported through the returned report's status.
    /// `Err` is returned only when the report could not be written to the
    /// change log; the event is still published in that case.
    pub async fn process(&self, request: ChangeRequest) -> Result<ChangeReport> {
        let queued_at = request.queued_at().unwrap_or_else(Utc::now);
        let mut report = ChangeReport::queued(&request, queued_at);
        let span = tracing::info_span!(
            "change_request",
            change_request_id = %request.id,
            pod_id = %request.pod_id,
            slice_id = request.slice_id.as_deref().unwrap_or(""),
            status = tracing::field::Empty,
        );

        async move {
            let outcome = match request.validate() {
                Ok(()) => self.run_chain(request, &mut report).await,
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(stats) => report.commit(stats),
                Err(e) => {
                    report.validation_report = e.validation_report().cloned();
                    report.fail(e.status(), e.to_string());
                }
            }
            tracing::Span::current().record("status", report.status().as_str());
            tracing::info!(
                status = %report.status(),
                nr_of_inserts = report.nr_of_inserts,
                nr_of_deletes = report.nr_of_deletes,
                "change request finished"
            );

            let written = self.change_log.write(&report).await.map_err(audit_error);
            if let Err(e) = &written {
                tracing::error!(error = %e, "failed to write change report");
            }

            let event = ChangeEvent {
                pod_id: report.pod_id.clone(),
                report: report.clone(),
            };
            if let Err(e) = self.outbox.publish(event).await {
                tracing::warn!(error = %e, "failed to publish change event");
            }

            written.map(|()| report)
        }
        .instrument(span)
        .await
    }

    async fn run_chain(
        &self,
        request: ChangeRequest,
        report: &mut ChangeReport,
    ) -> Result<ChangeStatistics> {
        let mut buffer = ChangeRequestTxBuffer::open(request);
        let mut preprocessed = !self.record_preprocessed;

        for stage in &self.stages {
            if stage.is_storage() && !preprocessed {
                report.push_status(ChangeStatusCode::Preprocessed, None);
                preprocessed = true;
            }
            if let Err(e) = stage.process(&mut buffer).await {
                tracing::debug!(stage = stage.name(), error = %e, "stage failed");
                let discarded = buffer.destroy();
                tracing::debug!(
                    inserts = discarded.inserts,
                    deletes = discarded.deletes,
                    "buffer discarded"
                );
                return Err(e);
            }
            tracing::debug!(
                stage = stage.name(),
                inserts = buffer.insert_count(),
                deletes = buffer.delete_count(),
                "stage complete"
            );
        }
        if !preprocessed {
            report.push_status(ChangeStatusCode::Preprocessed, None);
        }

        let stats = buffer.statistics();
        let unclaimed = buffer.destroy();
        if !unclaimed.is_empty() {
            tracing::warn!(
                inserts = unclaimed.inserts,
                deletes = unclaimed.deletes,
                "dropping records no storage backend claimed"
            );
        }
        Ok(stats)
    }
}
