//! Prometheus metrics exposition
//!
//! Registers and exposes the gateway's request metrics:
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_upstream_errors_total` (counter): label `error_type`
//!
//! The rotation pool emits its own counters through the `metrics` facade
//! (`rotation_handouts_total`, `rotation_key_cooldowns_total`,
//! `rotation_exhausted_total`, `rotation_pool_recovered_total`,
//! `rotation_attempts_total`); installing the recorder here makes them all
//! visible on the same endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `gateway_request_duration_seconds` with explicit buckets so it
/// renders as a Prometheus histogram (with `_bucket` lines for
/// `histogram_quantile()` queries) rather than the default summary. Bucket
/// boundaries cover 5ms to 60s, matching the configurable timeout range.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed gateway request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a terminal upstream failure with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("gateway_upstream_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // When no recorder is installed, metrics calls are no-ops.
        record_request(200, "POST", 0.05);
        record_upstream_error("rate_limited");
    }

    /// Create an isolated recorder/handle pair for unit tests. Only one
    /// global recorder can exist per process, so install_recorder() cannot be
    /// called from multiple tests.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    "gateway_request_duration_seconds".to_string(),
                ),
                &[
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                ],
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "POST", 0.042);
        record_request(503, "POST", 1.5);

        let output = handle.render();
        assert!(
            output.contains("gateway_requests_total"),
            "rendered output must contain gateway_requests_total counter"
        );
        assert!(
            output.contains("status=\"200\""),
            "counter must carry status label"
        );
        assert!(
            output.contains("method=\"POST\""),
            "counter must carry method label"
        );
        assert!(
            output.contains("status=\"503\""),
            "second request status label must appear"
        );
        assert!(
            output.contains("gateway_request_duration_seconds_bucket"),
            "histogram must render _bucket lines for histogram_quantile() queries"
        );
    }

    #[test]
    fn record_upstream_error_increments_counter_with_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_upstream_error("rate_limited");
        record_upstream_error("exhausted");

        let output = handle.render();
        assert!(
            output.contains("gateway_upstream_errors_total"),
            "rendered output must contain gateway_upstream_errors_total counter"
        );
        assert!(
            output.contains("error_type=\"rate_limited\""),
            "error_type label must be recorded"
        );
        assert!(
            output.contains("error_type=\"exhausted\""),
            "distinct error_type values must appear separately"
        );
    }

    #[test]
    fn histogram_buckets_cover_timeout_range() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "POST", 0.003);

        let output = handle.render();
        assert!(output.contains("le=\"0.005\""), "5ms bucket must exist");
        assert!(
            output.contains("le=\"60\""),
            "60s bucket must exist (upper bound of timeout range)"
        );
        assert!(
            output.contains("le=\"+Inf\""),
            "+Inf bucket must exist (Prometheus convention)"
        );
    }
}
