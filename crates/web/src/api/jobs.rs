use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::types::ExtractionJob;
use std::sync::Arc;

use crate::api::{api_error, internal_error, ApiError, AppState};

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionJob>, ApiError> {
    let id: i64 = id
        .parse()
        .map_err(|_parse_err| api_error(StatusCode::BAD_REQUEST, format!("invalid job id {id:?}")))?;

    state
        .queue
        .jobs()
        .get(id)
        .await
        .map_err(|e| internal_error("failed to load job", &e))?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no job with id {id}")))
}
