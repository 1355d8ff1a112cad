//! Bounded retry across rotating keys
//!
//! Wraps an arbitrary "perform one upstream call with this key" operation
//! with automatic key selection, failure classification, and failover. One
//! call moves through SELECTING → CALLING and terminates on success, on a
//! fatal failure, on pool exhaustion, or when the attempt ceiling is reached
//! — in which case the last upstream error surfaces.

use std::future::Future;

use tracing::{debug, warn};

use upstream::{ErrorClassification, UpstreamError};

use crate::error::{Error, Result};
use crate::manager::RotationManager;

impl RotationManager {
    /// Run `operation` with automatic key failover.
    ///
    /// Each attempt acquires the next eligible key and invokes the operation
    /// with it. Rate-limited failures rotate to a different key after the
    /// configured delay, up to `max_attempts`; any other failure is surfaced
    /// immediately without further attempts. Pool exhaustion before an
    /// attempt is a distinct `Error::PoolExhausted`.
    pub async fn run_with_rotation<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, UpstreamError>>,
    {
        let mut last_error: Option<UpstreamError> = None;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let key = self.acquire().await?;

            match operation(key.clone()).await {
                Ok(result) => {
                    debug!(attempt, "upstream call succeeded");
                    metrics::counter!("rotation_attempts_total", "outcome" => "success")
                        .increment(1);
                    self.report_success(&key).await;
                    return Ok(result);
                }
                Err(error) => {
                    let classification = error.classification();
                    warn!(
                        attempt,
                        key = %common::redact(&key),
                        %error,
                        ?classification,
                        "upstream call failed"
                    );
                    let next = self.report_failure(&key, classification).await?;

                    match classification {
                        ErrorClassification::Fatal => {
                            metrics::counter!("rotation_attempts_total", "outcome" => "fatal")
                                .increment(1);
                            return Err(Error::Upstream(error));
                        }
                        ErrorClassification::RateLimited => {
                            metrics::counter!("rotation_attempts_total", "outcome" => "rate_limited")
                                .increment(1);
                            last_error = Some(error);
                            if next.is_none() {
                                // Nothing left to rotate to
                                break;
                            }
                        }
                    }
                }
            }
        }

        match last_error {
            Some(error) => Err(Error::Upstream(error)),
            None => Err(Error::PoolExhausted(
                "no attempt was made (attempt ceiling is zero)".to_string(),
            )),
        }
    }
}
