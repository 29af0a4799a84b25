//! In-memory storage backend
//!
//! Keeps an append-only log of committed records per pod. Suitable for tests
//! and the CLI; nothing survives the process.

use super::{ClaimSelector, RecordsQuery, StorageBackend};
use crate::buffer::ChangeRequestTxBuffer;
use crate::error::Result;
use crate::processor::Processor;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use podgraph_core::{ChangeRecord, Page};
use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// In-memory backend for testing
#[derive(Clone)]
pub struct MemoryBackend {
    id: String,
    selector: ClaimSelector,
    /// Committed records keyed by pod id, in commit order
    log: Arc<RwLock<FxHashMap<String, Vec<ChangeRecord>>>>,
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.log.read();
        f.debug_struct("MemoryBackend")
            .field("id", &self.id)
            .field("selector", &self.selector)
            .field("pod_count", &log.len())
            .field("record_count", &log.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl MemoryBackend {
    /// Create a catch-all backend
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_selector(id, ClaimSelector::All)
    }

    pub fn with_selector(id: impl Into<String>, selector: ClaimSelector) -> Self {
        Self {
            id: id.into(),
            selector,
            log: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    pub fn selector(&self) -> &ClaimSelector {
        &self.selector
    }

    /// Number of records committed for `pod_id`
    pub fn len(&self, pod_id: &str) -> usize {
        self.log.read().get(pod_id).map_or(0, Vec::len)
    }

    fn matching(&self, query: &RecordsQuery) -> Vec<ChangeRecord> {
        self.log
            .read()
            .get(&query.pod_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| query.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Processor for MemoryBackend {
    fn name(&self) -> &str {
        &self.id
    }

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        let claimed = self.selector.select(buffer);
        if claimed.is_empty() {
            return Ok(());
        }
        let pod_id = buffer.request().pod_id.clone();
        self.log
            .write()
            .entry(pod_id)
            .or_default()
            .extend(claimed.iter().cloned());
        let stored = buffer.remove(&claimed, true);
        tracing::debug!(backend = %self.id, stored, "records committed");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn claims_all(&self) -> bool {
        self.selector.claims_all()
    }

    async fn get(&self, query: &RecordsQuery) -> Result<Page<ChangeRecord>> {
        Ok(Page::from_items(
            self.matching(query),
            query.cursor.as_deref(),
            query.limit,
        )?)
    }

    fn stream(&self, query: &RecordsQuery) -> BoxStream<'static, Result<ChangeRecord>> {
        stream::iter(self.matching(query).into_iter().map(Ok)).boxed()
    }

    async fn rollback(&self, pod_id: &str, change_request_id: &str) -> Result<usize> {
        let mut log = self.log.write();
        let Some(records) = log.get_mut(pod_id) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| r.change_request_id() != change_request_id);
        let removed = before - records.len();
        tracing::info!(backend = %self.id, pod_id, change_request_id, removed, "rolled back");
        Ok(removed)
    }
}
