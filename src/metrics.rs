// src/metrics.rs
use anyhow::{anyhow, Result};
use axum::{http::StatusCode, routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics;

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the
    /// pipeline series.
    pub fn init() -> Result<PrometheusHandle> {
        let handle = HANDLE.get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow!("prometheus: install recorder: {e}"))
        })?;
        crate::ingest::ensure_metrics_described();
        describe_pipeline();
        Ok(handle.clone())
    }

    pub fn handle() -> Option<PrometheusHandle> {
        HANDLE.get().cloned()
    }

    /// `/metrics` in the Prometheus exposition format; 503 until `init` ran.
    pub fn router<S: Clone + Send + Sync + 'static>() -> Router<S> {
        Router::new().route(
            "/metrics",
            get(|| async {
                match Metrics::handle() {
                    Some(h) => (StatusCode::OK, h.render()),
                    None => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "metrics recorder not installed".to_string(),
                    ),
                }
            }),
        )
    }
}

/// Series recorded past collection: scoring, alerts, digests, delivery.
fn describe_pipeline() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("trends_persisted_total", "Trend rows written by a scan.");
        describe_counter!("alerts_created_total", "Alerts that passed thresholds and cooldown.");
        describe_counter!(
            "alerts_suppressed_total",
            "Alert candidates held back by the keyword cooldown."
        );
        describe_counter!("digest_runs_total", "Completed digest runs.");
        describe_counter!(
            "digest_writer_fallback_total",
            "Digests rendered from the template, labelled by reason."
        );
        describe_counter!(
            "delivery_failures_total",
            "Deliveries that failed on every channel."
        );
    });
}
