use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use common::store;
use common::types::{ExtractionJob, WalletHealthRecord};
use etl::jobs::TriggerError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{api_error, internal_error, parse_address, ApiError, AppState};

const DEFAULT_HISTORY_LIMIT: u32 = 30;
const MAX_HISTORY_LIMIT: u32 = 365;
const MAX_COMPARE_ADDRESSES: usize = 50;

#[derive(Deserialize)]
pub struct ScoreQuery {
    pub date: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct CompareQuery {
    pub addresses: Option<String>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub address: String,
    pub records: Vec<WalletHealthRecord>,
}

#[derive(Serialize)]
pub struct CompareResponse {
    /// Latest record per address that has one, in request order.
    pub scores: Vec<WalletHealthRecord>,
    pub missing: Vec<String>,
}

pub async fn score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<ScoreQuery>,
) -> Result<Json<WalletHealthRecord>, ApiError> {
    let address = parse_address(&address)?;
    let date = query
        .date
        .as_deref()
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|e| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    format!("invalid date {d:?}: {e} (expected YYYY-MM-DD)"),
                )
            })
        })
        .transpose()?;

    let lookup = address.clone();
    let record = state
        .db
        .call_named("api.score", move |conn| {
            Ok(match date {
                Some(day) => store::health_record_on(conn, &lookup, day)?,
                None => store::latest_health_record(conn, &lookup)?,
            })
        })
        .await
        .map_err(|e| internal_error("failed to load score", &e))?;

    record.map(Json).ok_or_else(|| {
        let message = match date {
            Some(day) => format!("no score for {address} on {day}"),
            None => format!("no score for {address}"),
        };
        api_error(StatusCode::NOT_FOUND, message)
    })
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let address = parse_address(&address)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let lookup = address.clone();
    let records = state
        .db
        .call_named("api.history", move |conn| {
            Ok(store::health_history(conn, &lookup, limit)?)
        })
        .await
        .map_err(|e| internal_error("failed to load history", &e))?;

    Ok(Json(HistoryResponse { address, records }))
}

pub async fn compare(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<CompareResponse>, ApiError> {
    let raw = query.addresses.unwrap_or_default();
    let mut addresses: Vec<String> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let addr = parse_address(part)?;
        if !addresses.contains(&addr) {
            addresses.push(addr);
        }
    }
    if addresses.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "addresses is required: comma-separated wallet addresses",
        ));
    }
    if addresses.len() > MAX_COMPARE_ADDRESSES {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("at most {MAX_COMPARE_ADDRESSES} addresses per comparison"),
        ));
    }

    let latest = state
        .db
        .call_named("api.compare", move |conn| {
            let mut out = Vec::with_capacity(addresses.len());
            for addr in addresses {
                let record = store::latest_health_record(conn, &addr)?;
                out.push((addr, record));
            }
            Ok(out)
        })
        .await
        .map_err(|e| internal_error("failed to load scores", &e))?;

    let mut response = CompareResponse {
        scores: Vec::new(),
        missing: Vec::new(),
    };
    for (addr, record) in latest {
        match record {
            Some(r) => response.scores.push(r),
            None => response.missing.push(addr),
        }
    }
    Ok(Json(response))
}

/// Queue an extraction. 202 for a new job, 200 when one is already in flight.
pub async fn extract(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<(StatusCode, Json<ExtractionJob>), ApiError> {
    let address = parse_address(&address)?;

    let outcome = match state.queue.trigger(&address).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::counter!("wallet_health_extract_requests_total", "outcome" => "rejected")
                .increment(1);
            let message = e.to_string();
            return Err(match e {
                TriggerError::QueueFull | TriggerError::Closed => {
                    api_error(StatusCode::SERVICE_UNAVAILABLE, message)
                }
                TriggerError::Store(err) => internal_error("failed to record extraction job", &err),
            });
        }
    };

    let (status, label) = if outcome.created {
        (StatusCode::ACCEPTED, "queued")
    } else {
        (StatusCode::OK, "deduplicated")
    };
    metrics::counter!("wallet_health_extract_requests_total", "outcome" => label).increment(1);
    Ok((status, Json(outcome.job)))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, seed_record, test_app, wait_for_terminal, WALLET};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const OTHER: &str = "0x00000000000000000000000000000000000000b2";

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_score_returns_latest_record() {
        let app = test_app().await;
        seed_record(&app.db, WALLET, "2024-06-01", 0.4).await;
        seed_record(&app.db, WALLET, "2024-06-02", 0.6).await;

        let response = app
            .router
            .oneshot(get(&format!("/api/wallets/{}/score", WALLET.to_uppercase().replacen("0X", "0x", 1))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["address"], WALLET);
        assert_eq!(body["date"], "2024-06-02");
        assert_eq!(body["total_score"], 0.6);
    }

    #[tokio::test]
    async fn test_score_for_specific_date() {
        let app = test_app().await;
        seed_record(&app.db, WALLET, "2024-06-01", 0.4).await;
        seed_record(&app.db, WALLET, "2024-06-02", 0.6).await;

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/wallets/{WALLET}/score?date=2024-06-01")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["total_score"], 0.4);

        let response = app
            .router
            .oneshot(get(&format!("/api/wallets/{WALLET}/score?date=2024-05-01")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_score_rejects_bad_input() {
        let app = test_app().await;
        let response = app
            .router
            .clone()
            .oneshot(get("/api/wallets/not-a-wallet/score"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .router
            .oneshot(get(&format!("/api/wallets/{WALLET}/score?date=01-06-2024")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["message"]
            .as_str()
            .unwrap()
            .contains("YYYY-MM-DD"));
    }

    #[tokio::test]
    async fn test_score_unknown_wallet_is_not_found() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(get(&format!("/api/wallets/{WALLET}/score")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let app = test_app().await;
        for (day, score) in [("2024-06-01", 0.1), ("2024-06-02", 0.2), ("2024-06-03", 0.3)] {
            seed_record(&app.db, WALLET, day, score).await;
        }

        let response = app
            .router
            .oneshot(get(&format!("/api/wallets/{WALLET}/history?limit=2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["date"], "2024-06-03");
        assert_eq!(records[1]["date"], "2024-06-02");
    }

    #[tokio::test]
    async fn test_compare_lists_missing_wallets() {
        let app = test_app().await;
        seed_record(&app.db, WALLET, "2024-06-01", 0.5).await;

        let response = app
            .router
            .oneshot(get(&format!(
                "/api/wallets/compare?addresses={OTHER},{WALLET},{WALLET}"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["scores"].as_array().unwrap().len(), 1);
        assert_eq!(body["scores"][0]["address"], WALLET);
        assert_eq!(body["missing"], serde_json::json!([OTHER]));
    }

    #[tokio::test]
    async fn test_compare_requires_valid_addresses() {
        let app = test_app().await;
        for uri in [
            "/api/wallets/compare",
            "/api/wallets/compare?addresses=",
            "/api/wallets/compare?addresses=0x1234",
        ] {
            let response = app.router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_extract_queues_job_and_completes() {
        let app = test_app().await;

        let response = app
            .router
            .clone()
            .oneshot(post(&format!("/api/wallets/{WALLET}/extract")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job = body_json(response).await;
        assert_eq!(job["address"], WALLET);
        assert_eq!(job["status"], "pending");

        let id = job["id"].as_i64().unwrap();
        let done = wait_for_terminal(&app.router, id).await;
        assert_eq!(done["status"], "completed");

        let response = app
            .router
            .oneshot(get(&format!("/api/wallets/{WALLET}/score")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_extract_deduplicates_in_flight_job() {
        let app = test_app().await;

        let first = app
            .router
            .clone()
            .oneshot(post(&format!("/api/wallets/{WALLET}/extract")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first = body_json(first).await;

        let second = app
            .router
            .clone()
            .oneshot(post(&format!("/api/wallets/{WALLET}/extract")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_json(second).await["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_extract_rejects_invalid_address() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(post("/api/wallets/0xnope/extract"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
