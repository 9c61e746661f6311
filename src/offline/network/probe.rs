//! Connectivity probes feeding the network monitor

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Source of the physical connectivity signal
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that issues a `HEAD` against a URL. Any HTTP response, whatever its
/// status, counts as reachable; only transport errors count as offline.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!("[HttpProbe] {} -> {}", self.url, response.status());
                true
            }
            Err(e) => {
                debug!("[HttpProbe] {} unreachable: {}", self.url, e);
                false
            }
        }
    }
}
