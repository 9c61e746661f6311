//! Fetch interception policy (first match wins)

use crate::offline::worker::models::WorkerConfig;
use crate::offline::worker::types::{FetchRequest, RequestMode};
use reqwest::Url;

/// How an intercepted request is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Not intercepted
    Passthrough,
    /// Network-first, cached index document fallback, offline page
    Navigation,
    /// Script/style/font: cache-first into the runtime cache
    StaticAsset,
    /// Network-first into the runtime cache
    Other,
}

pub fn classify(config: &WorkerConfig, request: &FetchRequest) -> RequestClass {
    if !request.is_get() {
        return RequestClass::Passthrough;
    }
    let Ok(url) = Url::parse(&request.url) else {
        return RequestClass::Passthrough;
    };
    if is_excluded(config, &url) {
        return RequestClass::Passthrough;
    }
    if request.mode == RequestMode::Navigate {
        return RequestClass::Navigation;
    }
    match extension(url.path()) {
        Some(ext) if config.asset_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) => {
            RequestClass::StaticAsset
        }
        _ => RequestClass::Other,
    }
}

fn is_excluded(config: &WorkerConfig, url: &Url) -> bool {
    let host_excluded = url.host_str().is_some_and(|host| {
        config
            .excluded_hosts
            .iter()
            .any(|h| host == h || host.ends_with(&format!(".{}", h)))
    });
    host_excluded
        || config
            .excluded_path_prefixes
            .iter()
            .any(|prefix| url.path().starts_with(prefix.as_str()))
}

fn extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext)
}

/// Resolve a precache entry or index path against the shell origin
pub fn resolve(config: &WorkerConfig, path: &str) -> anyhow::Result<String> {
    let base = Url::parse(&config.origin)
        .map_err(|e| anyhow::anyhow!("invalid worker origin {}: {}", config.origin, e))?;
    let url = base
        .join(path)
        .map_err(|e| anyhow::anyhow!("invalid precache path {}: {}", path, e))?;
    Ok(url.to_string())
}
