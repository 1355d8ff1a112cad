//! Authenticated JSON calls to the generative language API
//!
//! One request, one key, one structured result. The key travels as the
//! `key` query parameter the way the upstream expects; callers must never
//! log the full request URL.

use std::time::Duration;

use tracing::debug;

use crate::UpstreamError;

/// Thin wrapper over `reqwest::Client` for generate-content style calls.
#[derive(Clone)]
pub struct GenerateClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GenerateClient {
    pub fn new(http: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            timeout,
        }
    }

    /// POST `payload` to `{base_url}/{path}` authenticating with `key`.
    ///
    /// Success is any 2xx with a JSON body. Non-success responses become an
    /// `UpstreamError` carrying the status and the vendor error message;
    /// transport failures carry no status.
    pub async fn post_json(
        &self,
        path: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        let url = request_url(&self.base_url, path, key);

        let response = self
            .http
            .post(&url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::transport(format!(
                        "upstream timeout after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    UpstreamError::transport(format!("upstream request failed: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::transport(format!("upstream response read error: {e}")))?;

        debug!(path, status, "upstream call completed");

        if !(200..300).contains(&status) {
            return Err(UpstreamError::from_response(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| UpstreamError::transport(format!("invalid upstream response body: {e}")))
    }
}

/// Build the request URL: base and path joined with exactly one slash, key
/// appended as the `key` query parameter (preserving any existing query).
fn request_url(base_url: &str, path: &str, key: &str) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!(
        "{}/{}{}key={}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/'),
        separator,
        key
    )
}
