//! Local store models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of mutation carried by a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(anyhow::anyhow!("unknown operation kind: {}", other)),
        }
    }
}

/// A mutation waiting for remote confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Locally unique id; empty means "assign one on enqueue"
    pub id: String,
    /// Target collection (remote table name)
    pub collection: String,
    /// Id of the record this operation touches, taken from `payload.id`
    pub record_id: String,
    pub kind: OperationKind,
    /// Record fields
    pub payload: Value,
    /// Creation time (ms since epoch)
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Build a new operation. The record id is read from the payload's `id` field.
    pub fn new(collection: impl Into<String>, kind: OperationKind, payload: Value) -> Self {
        let record_id = record_id_of(&payload).unwrap_or_default();
        Self {
            id: String::new(),
            collection: collection.into(),
            record_id,
            kind,
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Key used to keep operations on the same logical record in order.
    /// Operations without a record id only order against themselves.
    pub fn ordering_key(&self) -> (String, String) {
        if self.record_id.is_empty() {
            (self.collection.clone(), format!("op:{}", self.id))
        } else {
            (self.collection.clone(), self.record_id.clone())
        }
    }
}

/// Local mirror of one remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord {
    pub collection: String,
    pub record_id: String,
    /// Full field snapshot
    pub data: Value,
    /// Last time this snapshot was written (ms since epoch)
    pub last_synced_at: i64,
}

/// Read the `id` field of a record payload as a string.
///
/// Numeric ids are accepted and rendered in decimal.
pub fn record_id_of(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
