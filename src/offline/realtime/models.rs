//! Realtime change feed models and the Phoenix channel framing

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Change feed configuration
#[derive(Debug, Clone)]
pub struct ChangeFeedConfig {
    /// WebSocket endpoint, e.g. `wss://<project>.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`
    pub ws_url: String,
    /// Sent as the channel access token
    pub api_key: String,
    /// Database schema the tables live in
    pub schema: String,
    /// Events for one collection inside this window are delivered as one batch
    pub throttle: Duration,
    pub heartbeat: Duration,
    pub reconnect_delay: Duration,
}

impl ChangeFeedConfig {
    /// Derive the realtime endpoint from the REST base URL
    pub fn new(api_base_url: &str, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let base = api_base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        Self {
            ws_url: format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", base, api_key),
            api_key,
            schema: "public".to_string(),
            throttle: Duration::from_secs(1),
            heartbeat: Duration::from_secs(25),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn topic(&self, collection: &str) -> String {
        format!("realtime:{}:{}", self.schema, collection)
    }
}

/// Kind of row change pushed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change on a collection
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    /// New row (INSERT / UPDATE)
    pub record: Option<Value>,
    /// Previous row (UPDATE / DELETE, when the table publishes it)
    pub old_record: Option<Value>,
    pub commit_timestamp: Option<String>,
}

/// Phoenix channel frame (JSON v1 serializer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    pub fn join(config: &ChangeFeedConfig, collection: &str, reference: u64) -> Self {
        Self {
            topic: config.topic(collection),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "postgres_changes": [
                        { "event": "*", "schema": config.schema, "table": collection }
                    ]
                },
                "access_token": config.api_key,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(config: &ChangeFeedConfig, collection: &str, reference: u64) -> Self {
        Self {
            topic: config.topic(collection),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// A `postgres_changes` push turned into a [`ChangeEvent`]; `None` for
    /// replies, presence and system frames.
    pub fn into_change(self) -> Option<ChangeEvent> {
        if self.event != "postgres_changes" {
            return None;
        }
        let data = self.payload.get("data")?;
        let kind: ChangeKind = serde_json::from_value(data.get("type")?.clone()).ok()?;
        let collection = data
            .get("table")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.topic.rsplit(':').next().map(str::to_string))?;
        let non_empty = |key: &str| {
            data.get(key)
                .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
                .cloned()
        };
        Some(ChangeEvent {
            collection,
            kind,
            record: non_empty("record"),
            old_record: non_empty("old_record"),
            commit_timestamp: data
                .get("commit_timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
