use crate::config::MetricsConfig;
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(
    config: &MetricsConfig,
) -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let builder = PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .add_global_label("service", "token_usage_stats");

    let handle = builder.install_recorder()?;

    info!("Metrics server started on :{}/metrics", config.port);
    Ok(handle)
}

/// Track a usage event dropped before ingestion
pub fn track_event_dropped(reason: &'static str) {
    counter!("usage_events_dropped_total", "reason" => reason).increment(1);
}

/// Track an append of a decoded usage event to the raw store
pub fn track_event_append(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("usage_events_ingested_total", "result" => result).increment(1);
}

/// Track a rollup aggregate write
pub fn track_rollup_write(granularity: &'static str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("rollup_writes_total",
        "granularity" => granularity,
        "result" => result
    )
    .increment(1);
}

/// Track an offline window invariant check
pub fn track_invariant_check(granularity: &'static str, consistent: bool) {
    let result = if consistent { "consistent" } else { "violated" };
    counter!("window_invariant_checks_total",
        "granularity" => granularity,
        "result" => result
    )
    .increment(1);
}
