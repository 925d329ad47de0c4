//! Per-address orchestration: fetch → archive → normalize → persist → score.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::alchemy::{AlchemyClient, FetchError};
use common::config::Config;
use common::db::AsyncDb;
use common::object_store::{FsObjectStore, ObjectStore};
use common::store;
use common::types::{Position, Transfer, Wallet, WalletHealthRecord};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::fetcher::ChainDataProvider;
use crate::normalize::{position_from_api, transfer_from_api, NormalizeError};
use crate::scoring::{compute_health_record, TokenLists};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("fetching {what} failed: {source}")]
    UpstreamFetch {
        what: &'static str,
        #[source]
        source: FetchError,
    },
    #[error("fetching {what} timed out after {secs}s")]
    Timeout { what: &'static str, secs: u64 },
    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),
    #[error("archiving raw payload failed: {0:#}")]
    Archive(anyhow::Error),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Normalize(_) => "normalize",
            Self::UpstreamFetch { .. } => "upstream_fetch",
            Self::Timeout { .. } => "timeout",
            Self::Persistence(_) => "persistence",
            Self::Archive(_) => "archive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chain: String,
    pub fetch_timeout: Duration,
    pub lists: TokenLists,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            chain: cfg.pipeline.chain.clone(),
            fetch_timeout: Duration::from_secs(cfg.pipeline.fetch_timeout_secs),
            lists: TokenLists::from_config(&cfg.scoring),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub address: String,
    pub kind: &'static str,
    pub error: String,
}

/// Outcome of a batch run. One address failing never stops the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Pipeline<P, O> {
    db: AsyncDb,
    provider: P,
    objects: O,
    settings: PipelineSettings,
}

impl<P: ChainDataProvider, O: ObjectStore> Pipeline<P, O> {
    pub fn new(db: AsyncDb, provider: P, objects: O, settings: PipelineSettings) -> Self {
        Self {
            db,
            provider,
            objects,
            settings,
        }
    }

    pub fn db(&self) -> &AsyncDb {
        &self.db
    }

    /// Process addresses one at a time, isolating failures.
    pub async fn run_pipeline<S: AsRef<str>>(&self, addresses: &[S]) -> BatchReport {
        let mut report = BatchReport::default();
        for address in addresses {
            let address = address.as_ref().to_lowercase();
            match self.run_address(&address).await {
                Ok(_) => report.succeeded.push(address),
                Err(e) => {
                    error!(address = %address, kind = e.kind(), error = %e, "wallet pipeline failed");
                    report.failed.push(BatchFailure {
                        address,
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "pipeline batch finished"
        );
        report
    }

    /// Run one address as of now, recording outcome metrics.
    pub async fn run_address(&self, address: &str) -> Result<WalletHealthRecord, PipelineError> {
        let start = Instant::now();
        let res = self.run_address_at(address, Utc::now()).await;
        let status = if res.is_ok() { "ok" } else { "error" };
        metrics::counter!("wallet_health_addresses_processed_total", "status" => status)
            .increment(1);
        metrics::histogram!("wallet_health_pipeline_duration_ms", "status" => status)
            .record(start.elapsed().as_secs_f64() * 1000.0);
        res
    }

    /// Idempotent for a given `now` and upstream state: re-running the same
    /// day overwrites that day's record.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn run_address_at(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<WalletHealthRecord, PipelineError> {
        let address = address.to_lowercase();

        let raw_transfers = self
            .bounded("transfers", self.provider.fetch_transfers(&address))
            .await?;
        let raw_balances = self
            .bounded("token balances", self.provider.fetch_token_balances(&address))
            .await?;

        self.archive(&address, now, "transfers", &raw_transfers).await?;
        self.archive(&address, now, "positions", &raw_balances).await?;

        let transfers = raw_transfers
            .iter()
            .filter_map(|raw| transfer_from_api(&address, raw).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        let positions = raw_balances
            .iter()
            .filter_map(|raw| position_from_api(&address, raw, now).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let wallet = wallet_identity(&address, &self.settings.chain, &transfers, now);
        let record = compute_health_record(&address, &transfers, &positions, now, &self.settings.lists);

        let inserted = self.persist(wallet, transfers, positions, record.clone()).await?;

        info!(
            transfers = raw_transfers.len(),
            new_transfers = inserted,
            positions = raw_balances.len(),
            total_score = record.total_score,
            "wallet scored"
        );
        Ok(record)
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, PipelineError> {
        let limit = self.settings.fetch_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_elapsed| PipelineError::Timeout {
                what,
                secs: limit.as_secs(),
            })?
            .map_err(|source| PipelineError::UpstreamFetch { what, source })
    }

    async fn archive<T: Serialize>(
        &self,
        address: &str,
        now: DateTime<Utc>,
        kind: &str,
        payload: &T,
    ) -> Result<(), PipelineError> {
        let key = format!("{}/{kind}/{address}.json", now.format("%Y%m%d"));
        let value = serde_json::to_value(payload).map_err(|e| PipelineError::Archive(e.into()))?;
        self.objects
            .ensure_bucket()
            .await
            .map_err(PipelineError::Archive)?;
        self.objects
            .put_json(&key, &value)
            .await
            .map_err(PipelineError::Archive)
    }

    /// Wallet, transfers, positions and the day's record in one transaction.
    async fn persist(
        &self,
        wallet: Wallet,
        transfers: Vec<Transfer>,
        positions: Vec<Position>,
        record: WalletHealthRecord,
    ) -> Result<usize, PipelineError> {
        self.db
            .call_named("pipeline.persist", move |conn| {
                let tx = conn.transaction()?;
                store::upsert_wallet(&tx, &wallet)?;
                let inserted = store::insert_transfers(&tx, &transfers)?;
                store::upsert_positions(&tx, &positions)?;
                store::upsert_health_record(&tx, &record)?;
                tx.commit()?;
                Ok(inserted)
            })
            .await
            .map_err(PipelineError::Persistence)
    }
}

impl Pipeline<AlchemyClient, FsObjectStore> {
    /// Production wiring: Alchemy upstream, filesystem archive.
    pub fn from_config(cfg: &Config, db: AsyncDb) -> anyhow::Result<Self> {
        Ok(Self::new(
            db,
            AlchemyClient::from_config(&cfg.alchemy)?,
            FsObjectStore::from_config(&cfg.object_store),
            PipelineSettings::from_config(cfg),
        ))
    }
}

/// Identity row with activity watermarks; no history means both are `now`.
fn wallet_identity(address: &str, chain: &str, transfers: &[Transfer], now: DateTime<Utc>) -> Wallet {
    let first_seen = transfers.iter().map(|t| t.timestamp).min().unwrap_or(now);
    let last_seen = transfers.iter().map(|t| t.timestamp).max().unwrap_or(now);
    Wallet {
        address: address.to_string(),
        chain: chain.to_string(),
        first_seen,
        last_seen,
        tags: Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use common::alchemy::FetchError;
    use common::types::{ApiTokenBalance, ApiTransfer};

    use crate::fetcher::ChainDataProvider;

    /// In-memory provider keyed by lowercase address. Unknown addresses fail
    /// with an RPC error.
    #[derive(Clone, Default)]
    pub struct FakeProvider {
        pub transfers: HashMap<String, Vec<ApiTransfer>>,
        pub balances: HashMap<String, Vec<ApiTokenBalance>>,
        pub calls: Arc<AtomicUsize>,
        pub delay: Option<std::time::Duration>,
    }

    impl FakeProvider {
        pub fn with_wallet(
            mut self,
            address: &str,
            transfers: serde_json::Value,
            balances: serde_json::Value,
        ) -> Self {
            self.transfers
                .insert(address.to_string(), serde_json::from_value(transfers).unwrap());
            self.balances
                .insert(address.to_string(), serde_json::from_value(balances).unwrap());
            self
        }
    }

    fn unknown(address: &str) -> FetchError {
        FetchError::Rpc {
            code: -32000,
            message: format!("unknown wallet {address}"),
        }
    }

    impl ChainDataProvider for FakeProvider {
        async fn fetch_transfers(&self, address: &str) -> Result<Vec<ApiTransfer>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.transfers
                .get(address)
                .cloned()
                .ok_or_else(|| unknown(address))
        }

        async fn fetch_token_balances(
            &self,
            address: &str,
        ) -> Result<Vec<ApiTokenBalance>, FetchError> {
            self.balances
                .get(address)
                .cloned()
                .ok_or_else(|| unknown(address))
        }
    }
}
