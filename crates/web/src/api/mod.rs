pub mod jobs;
pub mod wallets;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::db::AsyncDb;
use etl::jobs::ExtractionQueue;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state available to all handlers.
pub struct AppState {
    pub db: AsyncDb,
    pub queue: ExtractionQueue,
    pub prometheus: Option<PrometheusHandle>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api/wallets/compare", get(wallets::compare))
        .route("/api/wallets/{address}/score", get(wallets::score))
        .route("/api/wallets/{address}/history", get(wallets::history))
        .route("/api/wallets/{address}/extract", post(wallets::extract))
        .route("/api/jobs/{id}", get(jobs::get_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub type ApiError = (StatusCode, Json<MessageResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

/// Log the cause and hide it from the client.
pub fn internal_error(context: &'static str, err: &anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "{context}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

fn is_valid_wallet_address(addr: &str) -> bool {
    addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a `0x` + 40 hex address and return its canonical lowercase form.
pub fn parse_address(raw: &str) -> Result<String, ApiError> {
    let addr = raw.trim().to_lowercase();
    if is_valid_wallet_address(&addr) {
        Ok(addr)
    } else {
        Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("invalid wallet address {raw:?}: expected 0x followed by 40 hex characters"),
        ))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = &state.prometheus else {
        return StatusCode::NOT_FOUND.into_response();
    };
    handle.run_upkeep();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_json, test_app};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_parse_address_normalizes_case() {
        assert_eq!(
            parse_address("0xD8DA6BF26964AF9D7EED9E03E53415D37AA96045").unwrap(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
    }

    #[test]
    fn test_parse_address_rejects_malformed() {
        for bad in [
            "",
            "0x",
            "d8da6bf26964af9d7eed9e03e53415d37aa96045",
            "0xd8da6bf26964af9d7eed9e03e53415d37aa9604",
            "0xd8da6bf26964af9d7eed9e03e53415d37aa960455",
            "0xz8da6bf26964af9d7eed9e03e53415d37aa96045",
        ] {
            let (status, _) = parse_address(bad).unwrap_err();
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_handle() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }
}
