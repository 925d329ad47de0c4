use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use common::alchemy::FetchError;
use common::db::AsyncDb;
use common::object_store::FsObjectStore;
use common::store;
use common::types::{ApiTokenBalance, ApiTransfer, ScoreComponents, WalletHealthRecord};
use etl::fetcher::ChainDataProvider;
use etl::jobs::{ExtractionJobs, ExtractionQueue};
use etl::pipeline::{Pipeline, PipelineSettings};
use etl::scoring::TokenLists;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::api::{router, AppState};

pub const WALLET: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

/// Knows only `WALLET`, which has no history. Every call is slow enough for
/// a second trigger to observe the job in flight.
pub struct SlowProvider;

impl ChainDataProvider for SlowProvider {
    async fn fetch_transfers(&self, address: &str) -> Result<Vec<ApiTransfer>, FetchError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        known(address).map(|()| Vec::new())
    }

    async fn fetch_token_balances(
        &self,
        address: &str,
    ) -> Result<Vec<ApiTokenBalance>, FetchError> {
        known(address).map(|()| Vec::new())
    }
}

fn known(address: &str) -> Result<(), FetchError> {
    if address == WALLET {
        Ok(())
    } else {
        Err(FetchError::Rpc {
            code: -32000,
            message: format!("no chain data for {address}"),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: AsyncDb,
    _dir: tempfile::TempDir,
}

pub async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = AsyncDb::open(":memory:").await.unwrap();
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        SlowProvider,
        FsObjectStore::new(dir.path(), "raw"),
        PipelineSettings {
            chain: "eth_mainnet".to_string(),
            fetch_timeout: Duration::from_secs(5),
            lists: TokenLists::default(),
        },
    ));
    let (queue, _workers) = ExtractionQueue::start(
        pipeline,
        ExtractionJobs::new(db.clone()),
        2,
        8,
        CancellationToken::new(),
    );
    let state = Arc::new(AppState {
        db: db.clone(),
        queue,
        prometheus: Some(PrometheusBuilder::new().build_recorder().handle()),
        started_at: chrono::Utc::now(),
    });
    TestApp {
        router: router(state),
        db,
        _dir: dir,
    }
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn seed_record(db: &AsyncDb, address: &str, date: &str, total: f64) {
    let record = WalletHealthRecord {
        address: address.to_string(),
        date: date.parse().unwrap(),
        components: ScoreComponents {
            activity: 0.0,
            diversification: 0.0,
            risk: 0.5,
            profitability: 0.5,
            stability: 0.0,
        },
        total_score: total,
        metrics: Default::default(),
    };
    db.call(move |conn| Ok(store::upsert_health_record(conn, &record)?))
        .await
        .unwrap();
}

pub async fn wait_for_terminal(router: &Router, id: i64) -> serde_json::Value {
    for _ in 0..300 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/jobs/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let job = body_json(response).await;
        if job["status"] != "pending" && job["status"] != "processing" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never finished");
}
