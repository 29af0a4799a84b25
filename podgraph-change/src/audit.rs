//! Change audit log and outbound notifications
//!
//! Every processed request yields exactly one [`ChangeReport`]. The report
//! is written to a [`ChangeLog`] and then published through a
//! [`ChangeOutbox`] for downstream consumers.

use crate::error::{ChangeError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use podgraph_core::{ChangeReport, Page};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default page size for [`ChangeLog::list`]
pub const DEFAULT_LOG_PAGE_LIMIT: usize = 50;

/// Persistent record of change reports per pod
#[async_trait]
pub trait ChangeLog: Send + Sync {
    /// Store `report`, replacing an earlier report with the same id
    async fn write(&self, report: &ChangeReport) -> Result<()>;

    async fn get(&self, pod_id: &str, change_request_id: &str) -> Result<Option<ChangeReport>>;

    /// Reports of `pod_id` in write order
    async fn list(
        &self,
        pod_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<ChangeReport>>;
}

/// In-memory change log for testing
#[derive(Clone, Debug, Default)]
pub struct MemoryChangeLog {
    reports: Arc<RwLock<FxHashMap<String, Vec<ChangeReport>>>>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports stored for `pod_id`
    pub fn len(&self, pod_id: &str) -> usize {
        self.reports.read().get(pod_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl ChangeLog for MemoryChangeLog {
    async fn write(&self, report: &ChangeReport) -> Result<()> {
        let mut reports = self.reports.write();
        let pod = reports.entry(report.pod_id.clone()).or_default();
        match pod.iter_mut().find(|r| r.id == report.id) {
            Some(existing) => *existing = report.clone(),
            None => pod.push(report.clone()),
        }
        Ok(())
    }

    async fn get(&self, pod_id: &str, change_request_id: &str) -> Result<Option<ChangeReport>> {
        Ok(self
            .reports
            .read()
            .get(pod_id)
            .and_then(|reports| reports.iter().find(|r| r.id == change_request_id))
            .cloned())
    }

    async fn list(
        &self,
        pod_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<ChangeReport>> {
        let reports = self.reports.read().get(pod_id).cloned().unwrap_or_default();
        Ok(Page::from_items(reports, cursor, limit)?)
    }
}

/// Published once per processed request
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub pod_id: String,
    pub report: ChangeReport,
}

/// Downstream notification channel
#[async_trait]
pub trait ChangeOutbox: Send + Sync {
    async fn publish(&self, event: ChangeEvent) -> Result<()>;
}

/// Outbox fanning events out to in-process subscribers
///
/// Delivery is best-effort: publishing with no subscribers succeeds, and
/// slow subscribers observe `RecvError::Lagged`.
#[derive(Clone, Debug)]
pub struct BroadcastOutbox {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for BroadcastOutbox {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastOutbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ChangeOutbox for BroadcastOutbox {
    async fn publish(&self, event: ChangeEvent) -> Result<()> {
        // send only fails when nobody is listening
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Convert a log failure into the audit error variant
pub(crate) fn audit_error(e: ChangeError) -> ChangeError {
    match e {
        ChangeError::Audit(_) => e,
        other => ChangeError::Audit(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgraph_core::{ChangeRequest, ChangeStatistics, ChangeStatusCode};

    fn committed(pod: &str) -> ChangeReport {
        let request = ChangeRequest::new(pod);
        let mut report = ChangeReport::queued(&request, chrono::Utc::now());
        report.commit(ChangeStatistics {
            nr_of_inserts: 1,
            nr_of_deletes: 0,
        });
        report
    }

    #[tokio::test]
    async fn test_write_get_and_replace() {
        let log = MemoryChangeLog::new();
        let mut report = committed("pod-1");
        log.write(&report).await.unwrap();

        report.nr_of_inserts = 7;
        log.write(&report).await.unwrap();
        assert_eq!(log.len("pod-1"), 1);

        let stored = log.get("pod-1", &report.id).await.unwrap().unwrap();
        assert_eq!(stored.nr_of_inserts, 7);
        assert_eq!(stored.status(), ChangeStatusCode::Committed);
        assert!(log.get("pod-2", &report.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pages() {
        let log = MemoryChangeLog::new();
        let reports: Vec<_> = (0..3).map(|_| committed("pod-1")).collect();
        for report in &reports {
            log.write(report).await.unwrap();
        }

        let page = log.list("pod-1", None, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, reports[0].id);

        let cursor = page.next_cursor.unwrap();
        let page = log.list("pod-1", Some(&cursor), 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, reports[2].id);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_outbox_without_subscribers() {
        let outbox = BroadcastOutbox::default();
        let report = committed("pod-1");
        outbox
            .publish(ChangeEvent {
                pod_id: "pod-1".into(),
                report,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_outbox_delivers_to_subscriber() {
        let outbox = BroadcastOutbox::new(4);
        let mut rx = outbox.subscribe();
        let report = committed("pod-1");
        outbox
            .publish(ChangeEvent {
                pod_id: "pod-1".into(),
                report: report.clone(),
            })
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.pod_id, "pod-1");
        assert_eq!(event.report, report);
    }
}
