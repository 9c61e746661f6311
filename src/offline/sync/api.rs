//! Remote data API
//!
//! The sync engine only sees the [`RemoteDataApi`] trait; [`RestDataApi`] is
//! the HTTP client for the hosted backend's REST layer.

use crate::offline::store::models::{record_id_of, OperationKind};
use crate::offline::types::handle_http_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Collection-oriented request/response collaborator
#[async_trait]
pub trait RemoteDataApi: Send + Sync {
    /// Full snapshot of a collection
    async fn pull(&self, collection: &str) -> Result<Vec<Value>>;

    /// Apply one mutation; returns the canonical stored record
    async fn submit(&self, collection: &str, kind: OperationKind, payload: &Value) -> Result<Value>;
}

/// REST client for the hosted backend (`/rest/v1/<table>` endpoints)
pub struct RestDataApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl RestDataApi {
    /// `client` should already carry the auth headers
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build a client whose default headers carry the project key
    /// (`apikey` and `Authorization: Bearer`)
    pub fn with_api_key(api_base_url: String, api_key: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("apikey"),
                    reqwest::header::HeaderValue::from_str(api_key).context("invalid api key")?,
                );
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                        .context("invalid api key")?,
                );
                headers
            })
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::new(http_client, api_base_url))
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.api_base_url, collection)
    }

    fn id_filter(payload: &Value, kind: OperationKind) -> Result<(String, String)> {
        let id = record_id_of(payload)
            .ok_or_else(|| anyhow::anyhow!("{} payload has no id", kind))?;
        Ok(("id".to_string(), format!("eq.{}", id)))
    }
}

#[async_trait]
impl RemoteDataApi for RestDataApi {
    async fn pull(&self, collection: &str) -> Result<Vec<Value>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.table_url(collection);

        info!("[RestAPI] 📡 pulling collection {}", collection);
        debug!("[RestAPI]   url: {}, operation id: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("operation-id", &operation_id)
            .query(&[("select", "*")])
            .send()
            .await
            .context("request failed")?;

        let records: Option<Vec<Value>> =
            handle_http_response(response, &format!("pull {}", collection)).await?;
        let records = records.unwrap_or_default();
        info!(
            "[RestAPI] ✅ pulled {} record(s) from {}",
            records.len(),
            collection
        );
        Ok(records)
    }

    async fn submit(&self, collection: &str, kind: OperationKind, payload: &Value) -> Result<Value> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.table_url(collection);

        info!("[RestAPI] 📤 {} on {}", kind, collection);
        debug!("[RestAPI]   url: {}, operation id: {}", url, operation_id);

        let request = match kind {
            OperationKind::Create => self.client.post(&url).json(payload),
            OperationKind::Update => self
                .client
                .patch(&url)
                .query(&[Self::id_filter(payload, kind)?])
                .json(payload),
            OperationKind::Delete => self
                .client
                .delete(&url)
                .query(&[Self::id_filter(payload, kind)?]),
        };

        let response = request
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .header("operation-id", &operation_id)
            .send()
            .await
            .context("request failed")?;

        let returned: Option<Vec<Value>> =
            handle_http_response(response, &format!("{} {}", kind, collection)).await?;
        let record = returned.and_then(|rows| rows.into_iter().next());

        match (kind, record) {
            (_, Some(record)) => Ok(record),
            // Deleting an already-deleted row is still a delete.
            (OperationKind::Delete, None) => Ok(payload.clone()),
            (_, None) => Err(anyhow::anyhow!(
                "{} on {} returned no record",
                kind,
                collection
            )),
        }
    }
}
