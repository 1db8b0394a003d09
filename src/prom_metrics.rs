//! # Prometheus Metrics — Exposition for Scraping
//!
//! Exposes siteclock operational metrics in the Prometheus text exposition
//! format at `GET /metrics`.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `siteclock_http_request_duration_seconds` | Histogram | `method`, `path` | API latency |
//! | `siteclock_detection_jobs_submitted_total` | Counter | - | Jobs accepted by the dispatcher |
//! | `siteclock_detection_jobs_processed_total` | Counter | `outcome` | Terminal runner outcomes |
//! | `siteclock_detection_resolutions_total` | Counter | `outcome` | Non-pending poll answers |
//! | `siteclock_detection_queue_depth` | Gauge | - | Jobs waiting for a runner |
//! | `siteclock_projects_promoted_total` | Counter | - | Projects advanced by the sweep |
//!
//! Path labels are normalised by the server middleware so UUID segments do
//! not explode label cardinality.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

impl OutcomeLabel {
    pub fn new(outcome: &str) -> Self {
        OutcomeLabel {
            outcome: outcome.to_string(),
        }
    }
}

/// Thread-safe metrics registry. Every field is atomic and can be updated
/// from any task.
pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: Family<HttpLabel, Histogram>,
    pub jobs_submitted: Counter,
    pub jobs_processed: Family<OutcomeLabel, Counter>,
    pub resolutions: Family<OutcomeLabel, Counter>,
    pub queue_depth: Gauge,
    pub projects_promoted: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_request_duration =
            Family::<HttpLabel, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        registry.register(
            "siteclock_http_request_duration_seconds",
            "HTTP request latency by method and normalised path",
            http_request_duration.clone(),
        );

        let jobs_submitted = Counter::default();
        registry.register(
            "siteclock_detection_jobs_submitted",
            "Detection jobs accepted by the dispatcher",
            jobs_submitted.clone(),
        );

        let jobs_processed = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "siteclock_detection_jobs_processed",
            "Terminal runner outcomes by kind",
            jobs_processed.clone(),
        );

        let resolutions = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "siteclock_detection_resolutions",
            "Non-pending poll answers by kind",
            resolutions.clone(),
        );

        let queue_depth = Gauge::default();
        registry.register(
            "siteclock_detection_queue_depth",
            "Detection jobs waiting for a runner",
            queue_depth.clone(),
        );

        let projects_promoted = Counter::default();
        registry.register(
            "siteclock_projects_promoted",
            "Projects promoted from start to in_progress by the daily sweep",
            projects_promoted.clone(),
        );

        Self {
            registry,
            http_request_duration,
            jobs_submitted,
            jobs_processed,
            resolutions,
            queue_depth,
            projects_promoted,
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_returns_valid_text() {
        let m = Metrics::new();
        m.jobs_submitted.inc();
        m.queue_depth.set(3);
        m.resolutions.get_or_create(&OutcomeLabel::new("completed")).inc();

        let output = m.encode();
        assert!(output.contains("siteclock_detection_jobs_submitted_total 1"));
        assert!(output.contains("siteclock_detection_queue_depth 3"));
        assert!(output.contains("outcome=\"completed\""));
    }

    #[test]
    fn http_histogram_records_per_label_set() {
        let m = Metrics::new();
        m.http_request_duration
            .get_or_create(&HttpLabel {
                method: "GET".into(),
                path: "/api/projects/:uuid".into(),
            })
            .observe(0.012);
        let output = m.encode();
        assert!(output.contains("siteclock_http_request_duration_seconds"));
        assert!(output.contains("/api/projects/:uuid"));
    }

    #[test]
    fn outcome_counters_are_independent() {
        let m = Metrics::new();
        m.jobs_processed.get_or_create(&OutcomeLabel::new("approved")).inc_by(2);
        m.jobs_processed.get_or_create(&OutcomeLabel::new("failed")).inc();
        assert_eq!(
            m.jobs_processed.get_or_create(&OutcomeLabel::new("approved")).get(),
            2
        );
        assert_eq!(
            m.jobs_processed.get_or_create(&OutcomeLabel::new("failed")).get(),
            1
        );
    }
}
