//! Transactional record buffer
//!
//! One [`ChangeRequestTxBuffer`] exists per in-flight change request. Every
//! pipeline stage receives the same buffer: materializers add records, storage
//! backends claim and remove what they persisted. The buffer is exclusively
//! owned by one pipeline run and is destroyed when the run ends.

use chrono::{DateTime, Utc};
use podgraph_core::{ChangeRecord, ChangeRequest, ChangeStatistics, ChangeType, RdfStatement};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Selects records by type, subject, predicate and graph
///
/// Every unset field matches anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub change_type: Option<ChangeType>,
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub graph: Option<String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inserts() -> Self {
        Self::new().with_type(ChangeType::Insert)
    }

    pub fn deletes() -> Self {
        Self::new().with_type(ChangeType::Delete)
    }

    pub fn with_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = Some(change_type);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn with_graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    pub fn matches(&self, record: &ChangeRecord) -> bool {
        let st = record.statement();
        self.change_type.map_or(true, |t| t == record.change_type())
            && self.subject.as_deref().map_or(true, |s| s == st.subject)
            && self.predicate.as_deref().map_or(true, |p| p == st.predicate)
            && self.graph.as_deref().map_or(true, |g| g == st.graph)
    }
}

/// Insertion-ordered set of records, keyed by the buffer-wide add sequence
#[derive(Debug, Default)]
struct RecordSet {
    by_seq: BTreeMap<u64, ChangeRecord>,
    index: FxHashMap<ChangeRecord, u64>,
}

impl RecordSet {
    fn insert(&mut self, record: ChangeRecord, seq: u64) -> bool {
        if self.index.contains_key(&record) {
            return false;
        }
        self.index.insert(record.clone(), seq);
        self.by_seq.insert(seq, record);
        true
    }

    fn position(&self, record: &ChangeRecord) -> Option<u64> {
        self.index.get(record).copied()
    }

    fn remove(&mut self, record: &ChangeRecord) -> bool {
        match self.index.remove(record) {
            Some(seq) => {
                self.by_seq.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.by_seq.values()
    }

    fn len(&self) -> usize {
        self.by_seq.len()
    }

    fn clear(&mut self) {
        self.by_seq.clear();
        self.index.clear();
    }
}

/// Records still held by a buffer when it was destroyed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscardedRecords {
    pub inserts: usize,
    pub deletes: usize,
}

impl DiscardedRecords {
    pub fn is_empty(&self) -> bool {
        self.inserts == 0 && self.deletes == 0
    }
}

/// Per-request scratch space of pending change records
#[derive(Debug)]
pub struct ChangeRequestTxBuffer {
    request: ChangeRequest,
    request_timestamp: DateTime<Utc>,
    inserts: RecordSet,
    deletes: RecordSet,
    next_seq: u64,
    stats: ChangeStatistics,
}

impl ChangeRequestTxBuffer {
    /// Open a buffer for `request`, stamped with the current time
    pub fn open(request: ChangeRequest) -> Self {
        Self::open_at(request, Utc::now())
    }

    pub fn open_at(request: ChangeRequest, request_timestamp: DateTime<Utc>) -> Self {
        Self {
            request,
            request_timestamp,
            inserts: RecordSet::default(),
            deletes: RecordSet::default(),
            next_seq: 0,
            stats: ChangeStatistics::default(),
        }
    }

    /// The change request this buffer belongs to
    pub fn request(&self) -> &ChangeRequest {
        &self.request
    }

    pub fn request_timestamp(&self) -> DateTime<Utc> {
        self.request_timestamp
    }

    /// Wrap a statement as a record owned by this buffer's request
    pub fn record(&self, change_type: ChangeType, statement: RdfStatement) -> ChangeRecord {
        ChangeRecord::new(
            self.request.id.clone(),
            self.request_timestamp,
            change_type,
            statement,
        )
    }

    /// Iterate over held records matching `filter`.
    ///
    /// Deletes come before inserts when the filter does not fix a type.
    /// The iterator borrows the buffer, so it always reflects the current
    /// contents; collect it before mutating.
    pub fn stream<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> impl Iterator<Item = &'a ChangeRecord> + 'a {
        let deletes = match filter.change_type {
            None | Some(ChangeType::Delete) => Some(self.deletes.iter()),
            Some(ChangeType::Insert) => None,
        };
        let inserts = match filter.change_type {
            None | Some(ChangeType::Insert) => Some(self.inserts.iter()),
            Some(ChangeType::Delete) => None,
        };
        deletes
            .into_iter()
            .flatten()
            .chain(inserts.into_iter().flatten())
            .filter(move |r| filter.matches(r))
    }

    /// Collect matching records into an owned vector
    pub fn collect(&self, filter: &RecordFilter) -> Vec<ChangeRecord> {
        self.stream(filter).cloned().collect()
    }

    /// Union `records` into the buffer. Returns how many were new.
    pub fn add<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = ChangeRecord>,
    {
        let mut added = 0;
        for record in records {
            let set = match record.change_type() {
                ChangeType::Insert => &mut self.inserts,
                ChangeType::Delete => &mut self.deletes,
            };
            if set.insert(record, self.next_seq) {
                self.next_seq += 1;
                added += 1;
            }
        }
        added
    }

    /// Order in which a held record was added, counted across both types.
    /// `None` once the record is removed or if it was never added.
    pub fn position(&self, record: &ChangeRecord) -> Option<u64> {
        let set = match record.change_type() {
            ChangeType::Insert => &self.inserts,
            ChangeType::Delete => &self.deletes,
        };
        set.position(record)
    }

    /// Remove `records` from the buffer.
    ///
    /// With `stored = true` each record actually removed is counted as
    /// persisted; records no longer present are not counted again. Removal
    /// without `stored` discards the record.
    pub fn remove<'r, I>(&mut self, records: I, stored: bool) -> usize
    where
        I: IntoIterator<Item = &'r ChangeRecord>,
    {
        let mut removed = 0;
        for record in records {
            let hit = match record.change_type() {
                ChangeType::Insert => self.inserts.remove(record),
                ChangeType::Delete => self.deletes.remove(record),
            };
            if !hit {
                continue;
            }
            removed += 1;
            if stored {
                match record.change_type() {
                    ChangeType::Insert => self.stats.nr_of_inserts += 1,
                    ChangeType::Delete => self.stats.nr_of_deletes += 1,
                }
            }
        }
        removed
    }

    /// Records persisted so far via `remove(.., stored = true)`
    pub fn statistics(&self) -> ChangeStatistics {
        self.stats
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.len()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release all held records, reporting how many were never persisted
    pub fn destroy(mut self) -> DiscardedRecords {
        let discarded = DiscardedRecords {
            inserts: self.inserts.len(),
            deletes: self.deletes.len(),
        };
        self.inserts.clear();
        self.deletes.clear();
        discarded
    }
}
