mod api;
mod metrics;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use etl::jobs::{ExtractionJobs, ExtractionQueue};
use etl::pipeline::Pipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("web", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let prometheus = metrics::init_global()?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = common::db::AsyncDb::open(&config.database.path).await?;

    let pipeline = Arc::new(Pipeline::from_config(&config, db.clone())?);
    let jobs = ExtractionJobs::new(db.clone());
    jobs.fail_orphaned("interrupted by service restart").await?;

    let cancel = CancellationToken::new();
    let (queue, workers) = ExtractionQueue::start(
        pipeline,
        jobs,
        config.jobs.workers,
        config.jobs.queue_capacity,
        cancel.clone(),
    );

    let state = Arc::new(api::AppState {
        db,
        queue,
        prometheus: Some(prometheus),
        started_at: chrono::Utc::now(),
    });
    let app = api::router(state);

    let web_port = config.web.as_ref().map_or(8080, |w| w.port);
    let web_host = config
        .web
        .as_ref()
        .map_or("0.0.0.0".to_string(), |w| w.host.clone());
    let addr: SocketAddr = format!("{web_host}:{web_port}")
        .parse()
        .with_context(|| format!("invalid web address {web_host}:{web_port}"))?;

    tracing::info!(%addr, workers = config.jobs.workers, "wallet health API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Queued jobs stay pending until the next start fails them.
    cancel.cancel();
    drain_workers(workers).await;
    Ok(())
}

/// Wait for every worker to stop. Returns how many ended abnormally.
async fn drain_workers(workers: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for (worker, handle) in workers.into_iter().enumerate() {
        if let Err(e) = handle.await {
            failed += 1;
            tracing::error!(worker, error = %e, panicked = e.is_panic(), "extraction worker ended abnormally");
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_workers_counts_panicked_worker() {
        let workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(async {}),
            tokio::spawn(async { panic!("worker blew up") }),
            tokio::spawn(async {}),
        ];
        assert_eq!(drain_workers(workers).await, 1);
    }
}
