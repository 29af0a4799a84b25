//! Change reports: the audit outcome of one change request

use crate::request::ChangeRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Status of a change request
///
/// `Queued` is always first; every other code except `Preprocessed` is
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatusCode {
    Queued,
    Preprocessed,
    Committed,
    AssertionFailed,
    NoMatches,
    TooManyMatches,
    ValidationError,
    InternalError,
}

impl ChangeStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatusCode::Queued => "QUEUED",
            ChangeStatusCode::Preprocessed => "PREPROCESSED",
            ChangeStatusCode::Committed => "COMMITTED",
            ChangeStatusCode::AssertionFailed => "ASSERTION_FAILED",
            ChangeStatusCode::NoMatches => "NO_MATCHES",
            ChangeStatusCode::TooManyMatches => "TOO_MANY_MATCHES",
            ChangeStatusCode::ValidationError => "VALIDATION_ERROR",
            ChangeStatusCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeStatusCode::Queued | ChangeStatusCode::Preprocessed)
    }

    pub fn is_success(&self) -> bool {
        *self == ChangeStatusCode::Committed
    }
}

impl fmt::Display for ChangeStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of records that reached durable storage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatistics {
    pub nr_of_inserts: u64,
    pub nr_of_deletes: u64,
}

impl ChangeStatistics {
    pub fn total(&self) -> u64 {
        self.nr_of_inserts + self.nr_of_deletes
    }
}

/// One status transition in a report's history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReportStatusEntry {
    pub timestamp: DateTime<Utc>,
    pub status: ChangeStatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Audit record of one processed change request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReport {
    /// Id of the change request
    pub id: String,
    pub pod_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_id: Option<String>,
    /// Append-only status history, oldest first
    status: Vec<ChangeReportStatusEntry>,
    pub nr_of_inserts: u64,
    pub nr_of_deletes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Machine-readable conformance report attached to validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_report: Option<JsonValue>,
}

impl ChangeReport {
    /// Start a report whose history holds only the QUEUED entry
    pub fn queued(request: &ChangeRequest, queued_at: DateTime<Utc>) -> Self {
        Self {
            id: request.id.clone(),
            pod_id: request.pod_id.clone(),
            slice_id: request.slice_id.clone(),
            status: vec![ChangeReportStatusEntry {
                timestamp: queued_at,
                status: ChangeStatusCode::Queued,
                message: None,
            }],
            nr_of_inserts: 0,
            nr_of_deletes: 0,
            error_message: None,
            validation_report: None,
        }
    }

    /// Status history, oldest first
    pub fn history(&self) -> &[ChangeReportStatusEntry] {
        &self.status
    }

    /// Latest status
    pub fn status(&self) -> ChangeStatusCode {
        self.status
            .last()
            .map(|e| e.status)
            .unwrap_or(ChangeStatusCode::Queued)
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn statistics(&self) -> ChangeStatistics {
        ChangeStatistics {
            nr_of_inserts: self.nr_of_inserts,
            nr_of_deletes: self.nr_of_deletes,
        }
    }

    /// Append an intermediate status. Ignored once the report is finished.
    pub fn push_status(&mut self, status: ChangeStatusCode, message: Option<String>) {
        if self.is_finished() {
            return;
        }
        self.status.push(ChangeReportStatusEntry {
            timestamp: Utc::now(),
            status,
            message,
        });
    }

    /// Close the report as committed with the persisted statistics
    pub fn commit(&mut self, stats: ChangeStatistics) {
        self.nr_of_inserts = stats.nr_of_inserts;
        self.nr_of_deletes = stats.nr_of_deletes;
        self.push_status(ChangeStatusCode::Committed, None);
    }

    /// Close the report with a failure status; statistics stay zero
    pub fn fail(&mut self, status: ChangeStatusCode, message: impl Into<String>) {
        let message = message.into();
        self.nr_of_inserts = 0;
        self.nr_of_deletes = 0;
        self.error_message = Some(message.clone());
        self.push_status(status, Some(message));
    }
}
