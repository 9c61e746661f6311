use serde::Deserialize;
use tracing::{debug, error};

/// Error body returned by the hosted backend's REST layer
/// (`{"code","message","details","hint"}`); every field may be null or missing
#[derive(Debug, Default, Deserialize)]
pub struct RestErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl RestErrorBody {
    fn describe(&self) -> String {
        let mut out = self.message.clone().unwrap_or_else(|| "unknown error".to_string());
        if let Some(code) = &self.code {
            out = format!("[{}] {}", code, out);
        }
        if let Some(details) = &self.details {
            out.push_str(&format!(" (details: {})", details));
        }
        if let Some(hint) = &self.hint {
            out.push_str(&format!(" (hint: {})", hint));
        }
        out
    }
}

/// Shared HTTP response handling: read the body once, log it, turn non-2xx
/// responses into errors (decoding the backend's error body when possible) and
/// deserialize the rest into `T`.
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    use anyhow::Context;

    let status = response.status();
    let body_bytes = response.bytes().await.context("failed to read response body")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {} response body: {}", operation_name, body_str);

    if !status.is_success() {
        let detail = serde_json::from_slice::<RestErrorBody>(&body_bytes)
            .map(|b| b.describe())
            .unwrap_or_else(|_| body_str.to_string());
        error!(
            "[HTTP] {} failed, HTTP status: {}, error: {}",
            operation_name, status, detail
        );
        return Err(anyhow::anyhow!("HTTP {}: {}", status, detail));
    }
    debug!("[HTTP] {} succeeded, HTTP status: {}", operation_name, status);

    // DELETE/PATCH without representation may answer 204 with no body.
    let bytes: &[u8] = if body_bytes.is_empty() { b"null" } else { &body_bytes };
    serde_json::from_slice(bytes).map_err(|e| {
        error!(
            "[HTTP] {} failed to deserialize: {:?}\nraw body: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("failed to deserialize response: {:?}", e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_with_missing_fields_still_describes() {
        let body: RestErrorBody =
            serde_json::from_str(r#"{"code":"23505","message":"duplicate key","details":null}"#)
                .unwrap();
        assert_eq!(body.describe(), "[23505] duplicate key");

        let empty: RestErrorBody = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.describe(), "unknown error");
    }
}
