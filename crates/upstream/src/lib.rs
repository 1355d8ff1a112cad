//! Upstream boundary for the generative language API
//!
//! Everything that knows the upstream vendor's wire shape lives here: the
//! structured error type produced by failed calls, the classification rules
//! that decide whether a failure is a quota/rate-limit condition, and a small
//! client that performs one authenticated JSON request. The rotation layer
//! never inspects response text — it only ever matches on
//! `ErrorClassification`.

pub mod classify;
pub mod client;

pub use classify::{classify_failure, classify_message};
pub use client::GenerateClient;

/// Classification of upstream failures driving rotation decisions.
///
/// Computed once at this boundary from the HTTP status and the vendor error
/// message. The rotation manager matches on this enum:
/// - RateLimited forces the key into cooldown and rotates to the next key
/// - Fatal is recorded against the key but surfaced without further attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Quota or rate-limit exhaustion for the key that made the call
    RateLimited,
    /// Invalid request, permission denied, safety rejection, transport failure
    Fatal,
}

/// A failed upstream call with enough structure for classification.
///
/// `status` is `None` for transport-level failures (timeout, connection
/// refused) that never produced an HTTP response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    /// Build an error from a non-success HTTP response.
    ///
    /// Extracts the vendor's `error.message` field when the body is the usual
    /// JSON error envelope, otherwise carries the raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")?
                    .get("message")?
                    .as_str()
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| body.to_owned());
        Self {
            status: Some(status),
            message,
        }
    }

    /// Build an error for a failure that produced no HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Classify this error per the rotation rules.
    pub fn classification(&self) -> ErrorClassification {
        classify_failure(self.status, &self.message)
    }
}
