//! Cache worker types: intercepted requests, stored responses, lifecycle state
//! and the message protocol spoken across the worker boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Request mode as seen by the interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Full-page / route load
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub mode: RequestMode,
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>, mode: RequestMode) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            mode,
            headers: HashMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url, RequestMode::Cors)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new("GET", url, RequestMode::Navigate)
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// A response as stored in (or served from) cache storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// 2xx
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Minimal page served for a navigation when neither the network nor the
    /// cached shell is available
    pub fn offline_page() -> Self {
        Self::new(200, OFFLINE_HTML).with_header("content-type", "text/html; charset=utf-8")
    }

    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
            .with_header("content-type", "text/plain; charset=utf-8")
    }
}

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="pt-BR">
<head><meta charset="utf-8"><title>Offline</title></head>
<body>
<h1>Você está offline</h1>
<p>Verifique sua conexão e tente novamente.</p>
</body>
</html>
"#;

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Synthetic,
}

/// What the worker did with an intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// Not intercepted; the runtime performs the request itself
    Passthrough,
    Respond {
        response: CachedResponse,
        source: ResponseSource,
    },
}

impl FetchResult {
    pub(crate) fn respond(response: CachedResponse, source: ResponseSource) -> Self {
        Self::Respond { response, source }
    }

    pub fn response(&self) -> Option<&CachedResponse> {
        match self {
            Self::Passthrough => None,
            Self::Respond { response, .. } => Some(response),
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            Self::Passthrough => None,
            Self::Respond { source, .. } => Some(*source),
        }
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting for activation
    Installed,
    Activating,
    Activated,
    /// Install failed; the host may install again
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Inbound control messages, e.g. `{"type":"SKIP_WAITING"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    SkipWaiting,
    GetSwStatus,
}

/// Reply to `GET_SW_STATUS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub version: String,
    pub caches: Vec<String>,
    /// ISO-8601
    pub timestamp: String,
}
