use anyhow::{bail, Result};
use etl::cli::{self, Command};
use etl::pipeline::Pipeline;
use etl::scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("etl", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = common::db::AsyncDb::open(&config.database.path).await?;

    match cmd {
        Command::Wallet { address } => cli::show_wallet(&db, &address).await,
        Command::History { address, limit } => cli::show_history(&db, &address, limit).await,
        Command::Run { addresses } => {
            let addresses = if addresses.is_empty() {
                config.pipeline.addresses.clone()
            } else {
                addresses
            };
            if addresses.is_empty() {
                bail!("no addresses given and none configured under [pipeline].addresses");
            }

            let pipeline = Pipeline::from_config(&config, db)?;
            let report = pipeline.run_pipeline(&addresses).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                bail!("{} of {} wallets failed", report.failed.len(), addresses.len());
            }
            Ok(())
        }
        Command::Daemon => {
            etl::metrics::install_prometheus(config.observability.prometheus_port)?;
            etl::metrics::describe();

            if config.pipeline.addresses.is_empty() {
                tracing::warn!("no addresses configured under [pipeline].addresses; daemon is idle");
            }
            let pipeline = Pipeline::from_config(&config, db)?;

            let (refresh_tx, mut refresh_rx) = tokio::sync::mpsc::channel::<()>(1);
            let _tickers = scheduler::start(vec![scheduler::JobSpec {
                name: "wallet_refresh".to_string(),
                interval: std::time::Duration::from_secs(config.pipeline.refresh_interval_secs),
                tick: refresh_tx,
                run_immediately: true,
            }]);

            tracing::info!(
                addresses = config.pipeline.addresses.len(),
                interval_secs = config.pipeline.refresh_interval_secs,
                "etl daemon started"
            );
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown signal received");
                        break;
                    }
                    tick = refresh_rx.recv() => {
                        if tick.is_none() {
                            break;
                        }
                        pipeline.run_pipeline(&config.pipeline.addresses).await;
                    }
                }
            }
            Ok(())
        }
    }
}
