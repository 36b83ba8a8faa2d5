use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::handlers::transmitters::parse_timestamp;
use crate::models::trap::TrapFilters;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestTrapsQuery {
    pub transmitter_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_host: Option<String>,
    pub limit: Option<i64>,
}

pub async fn latest_traps(
    State(state): State<AppState>,
    Query(query): Query<LatestTrapsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let filters = TrapFilters {
        transmitter_id: query.transmitter_id,
        site_id: query.site_id,
        source_host: query.source_host,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let traps = state
        .store
        .get_latest_traps(&filters, limit)
        .await
        .map_err(|e| e.into_response())?;
    Ok(Json(traps))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrapsRangeQuery {
    pub start: String,
    pub end: String,
    pub transmitter_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_host: Option<String>,
    pub limit: Option<i64>,
}

pub async fn traps_range(
    State(state): State<AppState>,
    Query(query): Query<TrapsRangeQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let start = parse_timestamp(&query.start)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("malformed start: {}", query.start)))?;
    let end = parse_timestamp(&query.end)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("malformed end: {}", query.end)))?;
    let filters = TrapFilters {
        transmitter_id: query.transmitter_id,
        site_id: query.site_id,
        source_host: query.source_host,
    };
    let limit = query.limit.unwrap_or(1000).clamp(1, 10_000);
    let traps = state
        .store
        .get_traps_range(start, end, &filters, limit)
        .await
        .map_err(|e| e.into_response())?;
    Ok(Json(traps))
}
