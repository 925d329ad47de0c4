use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "wallet_health_addresses_processed_total",
        "Wallets run through the pipeline, by status."
    );
    describe_histogram!(
        "wallet_health_pipeline_duration_ms",
        "End-to-end pipeline latency per wallet in milliseconds."
    );
    describe_counter!(
        "wallet_health_api_requests_total",
        "Upstream chain-data requests, by endpoint and status."
    );
    describe_counter!(
        "wallet_health_api_errors_total",
        "Upstream chain-data failures, by endpoint and kind."
    );
    describe_histogram!(
        "wallet_health_api_latency_ms",
        "Upstream request latency in milliseconds, pagination included."
    );
    describe_counter!(
        "wallet_health_metric_key_conflicts_total",
        "Metric keys emitted by two scorers with different values."
    );
    describe_counter!(
        "wallet_health_extraction_jobs_total",
        "Extraction job transitions, by target status."
    );
    describe_histogram!(
        "wallet_health_db_query_latency_ms",
        "SQLite operation latency in milliseconds, by op and status."
    );
    describe_counter!(
        "wallet_health_db_query_errors_total",
        "Failed SQLite operations, by op."
    );
}

/// Install the global recorder and serve `/metrics` on `port`.
pub fn install_prometheus(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}
