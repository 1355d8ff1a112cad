//! Quota detection for upstream error responses
//!
//! Distinguishes quota/rate-limit exhaustion (rotate to another key) from
//! everything else (surface to the caller). Status 429 is always a rate
//! limit; otherwise the vendor error message is scanned for known quota
//! phrases.

use crate::ErrorClassification;

/// Message fragments that indicate quota or rate-limit exhaustion.
///
/// The upstream reports quota conditions both as plain-English messages and
/// as the gRPC-style RESOURCE_EXHAUSTED status embedded in the message.
const QUOTA_PATTERNS: &[&str] = &["quota", "limit", "resource_exhausted"];

/// Classify an error message as quota exhaustion or fatal.
///
/// Case-insensitive substring match against the known quota phrases. Anything
/// that matches none of them is fatal for rotation purposes.
pub fn classify_message(message: &str) -> ErrorClassification {
    let lower = message.to_lowercase();
    for pattern in QUOTA_PATTERNS {
        if lower.contains(pattern) {
            return ErrorClassification::RateLimited;
        }
    }
    ErrorClassification::Fatal
}

/// Classify an upstream failure by HTTP status and error message.
///
/// Status 429 is rate-limited regardless of the message; failures without a
/// status (transport errors) and all other statuses fall through to the
/// message scan.
pub fn classify_failure(status: Option<u16>, message: &str) -> ErrorClassification {
    match status {
        Some(429) => ErrorClassification::RateLimited,
        _ => classify_message(message),
    }
}
