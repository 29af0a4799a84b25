//! Storage commit backends
//!
//! Backends run after every validating stage. Each one claims the records
//! its [`ClaimSelector`] picks from the buffer, persists them, and only then
//! removes them with `stored = true`. Later backends see the remainder, so
//! each record is persisted by at most one backend.

mod memory;

pub use memory::MemoryBackend;

use crate::buffer::{ChangeRequestTxBuffer, RecordFilter};
use crate::error::Result;
use crate::processor::Processor;
use async_trait::async_trait;
use futures::stream::BoxStream;
use podgraph_core::{ChangeRecord, Page};
use rustc_hash::FxHashSet;

/// Default page size for [`RecordsQuery`]
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Read-back query over records a backend persisted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordsQuery {
    pub pod_id: String,
    pub change_request_id: Option<String>,
    pub filter: RecordFilter,
    pub cursor: Option<String>,
    pub limit: usize,
}

impl RecordsQuery {
    pub fn new(pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            change_request_id: None,
            filter: RecordFilter::new(),
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_change_request(mut self, id: impl Into<String>) -> Self {
        self.change_request_id = Some(id.into());
        self
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `record` (already known to belong to the pod) matches
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        self.change_request_id
            .as_deref()
            .map_or(true, |id| record.change_request_id() == id)
            && self.filter.matches(record)
    }
}

/// Which buffered records a backend claims
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimSelector {
    /// Every remaining record
    All,
    /// Every record whose subject carries the given marker predicate in the
    /// same request
    SubjectsWithPredicate(String),
}

impl ClaimSelector {
    pub fn claims_all(&self) -> bool {
        matches!(self, ClaimSelector::All)
    }

    /// Records of `buffer` this selector claims, in buffer order
    pub fn select(&self, buffer: &ChangeRequestTxBuffer) -> Vec<ChangeRecord> {
        let all = RecordFilter::new();
        match self {
            ClaimSelector::All => buffer.collect(&all),
            ClaimSelector::SubjectsWithPredicate(predicate) => {
                let marker = RecordFilter::new().with_predicate(predicate.clone());
                let subjects: FxHashSet<String> = buffer
                    .stream(&marker)
                    .map(|r| r.statement().subject.clone())
                    .collect();
                buffer
                    .stream(&all)
                    .filter(|r| subjects.contains(&r.statement().subject))
                    .cloned()
                    .collect()
            }
        }
    }
}

/// A storage plugin: a [`Processor`] that commits claimed records plus
/// read-back and rollback of what it persisted
#[async_trait]
pub trait StorageBackend: Processor {
    fn id(&self) -> &str;

    /// Whether this backend claims every record it sees
    fn claims_all(&self) -> bool;

    /// One page of persisted records matching `query`
    async fn get(&self, query: &RecordsQuery) -> Result<Page<ChangeRecord>>;

    /// Every persisted record matching `query`, ignoring cursor and limit
    fn stream(&self, query: &RecordsQuery) -> BoxStream<'static, Result<ChangeRecord>>;

    /// Delete everything persisted for `change_request_id`; returns the count
    async fn rollback(&self, pod_id: &str, change_request_id: &str) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgraph_core::{ChangeRequest, ChangeType, RdfStatement};

    const MARKER: &str = "http://example.org/archived";

    #[test]
    fn test_marker_selector_claims_whole_subject() {
        let mut buffer = ChangeRequestTxBuffer::open(ChangeRequest::new("pod-1"));
        let records = vec![
            buffer.record(
                ChangeType::Insert,
                RdfStatement::literal("http://e.org/a", MARKER, "true"),
            ),
            buffer.record(
                ChangeType::Insert,
                RdfStatement::literal("http://e.org/a", "http://e.org/name", "A"),
            ),
            buffer.record(
                ChangeType::Insert,
                RdfStatement::literal("http://e.org/b", "http://e.org/name", "B"),
            ),
        ];
        buffer.add(records);

        let claimed = ClaimSelector::SubjectsWithPredicate(MARKER.into()).select(&buffer);
        assert_eq!(claimed.len(), 2);
        assert!(claimed
            .iter()
            .all(|r| r.statement().subject == "http://e.org/a"));
        assert_eq!(ClaimSelector::All.select(&buffer).len(), 3);
    }

    #[test]
    fn test_records_query_filters_by_request() {
        let record = ChangeRecord::new(
            "cr-1",
            chrono::Utc::now(),
            ChangeType::Delete,
            RdfStatement::literal("http://e.org/a", "http://e.org/p", "v"),
        );
        assert!(RecordsQuery::new("pod").matches(&record));
        assert!(RecordsQuery::new("pod")
            .with_change_request("cr-1")
            .matches(&record));
        assert!(!RecordsQuery::new("pod")
            .with_change_request("cr-2")
            .matches(&record));
        assert!(!RecordsQuery::new("pod")
            .with_filter(RecordFilter::inserts())
            .matches(&record));
    }
}
