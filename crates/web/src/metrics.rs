use anyhow::Result;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn describe() {
    describe_gauge!(
        "wallet_health_web_build_info",
        "Build info for the wallet health API (value is always 1)."
    );
    describe_counter!(
        "wallet_health_extract_requests_total",
        "Extraction trigger requests, by outcome."
    );
    // The web process runs extraction workers, so it reports pipeline metrics too.
    etl::metrics::describe();
}

/// Install the global Prometheus recorder once and return a handle for `/metrics`.
///
/// `install_recorder` does not spawn upkeep; the `/metrics` handler runs it.
pub fn init_global() -> Result<PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let handle = PROM_HANDLE.get_or_init(|| handle).clone();
    describe();

    let git_sha = std::env::var("GIT_SHA").unwrap_or_else(|_| "unknown".to_string());
    ::metrics::gauge!(
        "wallet_health_web_build_info",
        "version" => env!("CARGO_PKG_VERSION"),
        "git_sha" => git_sha,
    )
    .set(1.0);

    Ok(handle)
}
