//! Change records: one versioned insert or delete of a statement

use crate::statement::RdfStatement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of mutation a record applies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Insert,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutation of a statement, owned by a change request
///
/// Records are immutable once created. Identity for set semantics is
/// `(change_request_id, change_type, statement)`; the timestamp is shared by
/// every record of a request and does not take part in equality.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    change_request_id: String,
    request_timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    change_type: ChangeType,
    statement: RdfStatement,
}

impl ChangeRecord {
    pub fn new(
        change_request_id: impl Into<String>,
        request_timestamp: DateTime<Utc>,
        change_type: ChangeType,
        statement: RdfStatement,
    ) -> Self {
        Self {
            change_request_id: change_request_id.into(),
            request_timestamp,
            change_type,
            statement,
        }
    }

    pub fn change_request_id(&self) -> &str {
        &self.change_request_id
    }

    pub fn request_timestamp(&self) -> DateTime<Utc> {
        self.request_timestamp
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn statement(&self) -> &RdfStatement {
        &self.statement
    }

    pub fn is_insert(&self) -> bool {
        self.change_type == ChangeType::Insert
    }

    pub fn is_delete(&self) -> bool {
        self.change_type == ChangeType::Delete
    }
}

impl PartialEq for ChangeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.change_request_id == other.change_request_id
            && self.change_type == other.change_type
            && self.statement == other.statement
    }
}

impl Eq for ChangeRecord {}

impl Hash for ChangeRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.change_request_id.hash(state);
        self.change_type.hash(state);
        self.statement.hash(state);
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.change_type, self.statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    fn stmt() -> RdfStatement {
        RdfStatement::literal("http://example.org/1", "http://example.org/name", "Bob")
    }

    #[test]
    fn test_identity_ignores_timestamp() {
        let now = Utc::now();
        let a = ChangeRecord::new("r1", now, ChangeType::Insert, stmt());
        let b = ChangeRecord::new("r1", now + Duration::seconds(5), ChangeType::Insert, stmt());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_identity_includes_type_and_request() {
        let now = Utc::now();
        let insert = ChangeRecord::new("r1", now, ChangeType::Insert, stmt());
        let delete = ChangeRecord::new("r1", now, ChangeType::Delete, stmt());
        let other = ChangeRecord::new("r2", now, ChangeType::Insert, stmt());
        assert_ne!(insert, delete);
        assert_ne!(insert, other);
    }

    #[test]
    fn test_serialized_type_field() {
        let rec = ChangeRecord::new("r1", Utc::now(), ChangeType::Delete, stmt());
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "DELETE");
        assert_eq!(json["changeRequestId"], "r1");
    }
}
