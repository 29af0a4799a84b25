//! Shared harness for podgraph-change integration tests.

// Each integration test crate uses a different subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use podgraph_change::{
    BroadcastOutbox, ChangeError, ChangePipeline, ChangeRequestTxBuffer, FixtureQueryEngine,
    MemoryBackend, MemoryChangeLog, MemoryReferenceLoader, MemorySliceSchemaSource,
    PipelineConfig, Processor, RecordsQuery, ReferenceLoaders, Result, StorageBackend,
};
use podgraph_core::{ChangeRecord, Page};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const EX: &str = "http://example.org/";

pub fn ex(local: &str) -> String {
    format!("{EX}{local}")
}

pub fn default_context() -> JsonValue {
    json!({
        "ex": EX,
        "xsd": "http://www.w3.org/2001/XMLSchema#",
    })
}

/// A pipeline wired to in-memory collaborators the test can inspect
pub struct Harness {
    pub pipeline: ChangePipeline,
    pub query: Arc<FixtureQueryEngine>,
    pub refs: Arc<MemoryReferenceLoader>,
    pub schemas: Arc<MemorySliceSchemaSource>,
    pub log: Arc<MemoryChangeLog>,
    pub outbox: Arc<BroadcastOutbox>,
}

impl Harness {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_backends(config, Vec::new())
    }

    /// Build with `backends` replacing the configured backends of the same id
    pub fn with_backends(config: PipelineConfig, backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self::try_build(config, FixtureQueryEngine::new(), backends)
            .unwrap_or_else(|e| panic!("pipeline failed to build: {e}"))
    }

    pub fn with_query(config: PipelineConfig, query: FixtureQueryEngine) -> Self {
        Self::try_build(config, query, Vec::new())
            .unwrap_or_else(|e| panic!("pipeline failed to build: {e}"))
    }

    pub fn try_build(
        config: PipelineConfig,
        query: FixtureQueryEngine,
        backends: Vec<Arc<dyn StorageBackend>>,
    ) -> Result<Self> {
        let query = Arc::new(query);
        let refs = Arc::new(MemoryReferenceLoader::new());
        let schemas = Arc::new(MemorySliceSchemaSource::new());
        let log = Arc::new(MemoryChangeLog::new());
        let outbox = Arc::new(BroadcastOutbox::default());

        let mut builder = ChangePipeline::builder(config)
            .query_engine(query.clone())
            .reference_loaders(ReferenceLoaders::new().with(refs.clone()))
            .slice_schemas(schemas.clone())
            .change_log(log.clone())
            .outbox(outbox.clone());
        for backend in backends {
            builder = builder.backend(backend);
        }

        Ok(Self {
            pipeline: builder.build()?,
            query,
            refs,
            schemas,
            log,
            outbox,
        })
    }

    /// Every record the default backend holds for `pod_id`
    pub async fn stored(&self, pod_id: &str) -> Vec<ChangeRecord> {
        self.stored_in(self.pipeline.default_backend().id(), pod_id)
            .await
    }

    pub async fn stored_in(&self, backend_id: &str, pod_id: &str) -> Vec<ChangeRecord> {
        let backend = self
            .pipeline
            .backend(backend_id)
            .unwrap_or_else(|| panic!("no backend '{backend_id}'"));
        backend
            .get(&RecordsQuery::new(pod_id).with_limit(10_000))
            .await
            .unwrap()
            .items
    }
}

/// Storage backend that counts how often its commit step runs
#[derive(Debug)]
pub struct CountingBackend {
    inner: MemoryBackend,
    pub commits: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: MemoryBackend) -> Arc<Self> {
        Arc::new(Self {
            inner,
            commits: AtomicUsize::new(0),
        })
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for CountingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.process(buffer).await
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn claims_all(&self) -> bool {
        self.inner.claims_all()
    }

    async fn get(&self, query: &RecordsQuery) -> Result<Page<ChangeRecord>> {
        self.inner.get(query).await
    }

    fn stream(&self, query: &RecordsQuery) -> BoxStream<'static, Result<ChangeRecord>> {
        self.inner.stream(query)
    }

    async fn rollback(&self, pod_id: &str, change_request_id: &str) -> Result<usize> {
        self.inner.rollback(pod_id, change_request_id).await
    }
}

/// Catch-all backend whose commit always fails
#[derive(Debug)]
pub struct FailingBackend {
    id: String,
}

impl FailingBackend {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_string() })
    }
}

#[async_trait]
impl Processor for FailingBackend {
    fn name(&self) -> &str {
        &self.id
    }

    async fn process(&self, _buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        Err(ChangeError::storage(&self.id, "disk full"))
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn claims_all(&self) -> bool {
        true
    }

    async fn get(&self, _query: &RecordsQuery) -> Result<Page<ChangeRecord>> {
        Ok(Page::empty())
    }

    fn stream(&self, _query: &RecordsQuery) -> BoxStream<'static, Result<ChangeRecord>> {
        Box::pin(futures::stream::empty())
    }

    async fn rollback(&self, _pod_id: &str, _change_request_id: &str) -> Result<usize> {
        Ok(0)
    }
}
