use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::models::transmitter::UpsertTransmitter;

pub async fn list_transmitters(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let transmitters = state
        .store
        .list_transmitters()
        .await
        .map_err(|e| e.into_response())?;
    Ok(Json(transmitters))
}

pub async fn create_transmitter(
    State(state): State<AppState>,
    Json(mut req): Json<UpsertTransmitter>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.id = None;
    if req.site_id.is_none() {
        return Err((StatusCode::BAD_REQUEST, "siteId is required".to_string()));
    }
    req.validate().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let transmitter = state
        .store
        .upsert_transmitter(&req)
        .await
        .map_err(|e| e.into_response())?;
    if let Err(e) = state.poller.reload_from_store().await {
        tracing::error!(error = %e, "poller reload after transmitter create failed");
    }
    Ok((StatusCode::CREATED, Json(transmitter)))
}

pub async fn get_transmitter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let transmitter = state
        .store
        .get_transmitter(id)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "transmitter not found".to_string()))?;
    Ok(Json(transmitter))
}

pub async fn update_transmitter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpsertTransmitter>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .store
        .get_transmitter(id)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "transmitter not found".to_string()))?;

    req.id = Some(id);
    req.validate().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let transmitter = state
        .store
        .upsert_transmitter(&req)
        .await
        .map_err(|e| e.into_response())?;
    state.poller.update_device(transmitter.clone()).await;
    Ok(Json(transmitter))
}

pub async fn delete_transmitter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let deleted = state
        .store
        .delete_transmitter(id)
        .await
        .map_err(|e| e.into_response())?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "transmitter not found".to_string()));
    }
    if let Err(e) = state.poller.reload_from_store().await {
        tracing::error!(error = %e, "poller reload after transmitter delete failed");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn latest_metrics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let metric = state
        .store
        .get_latest_metrics(id)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "no metrics recorded".to_string()))?;
    Ok(Json(metric))
}

#[derive(Debug, Deserialize)]
pub struct MetricsRangeQuery {
    pub start: String,
    pub end: String,
    pub limit: Option<i64>,
}

pub async fn metrics_range(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<MetricsRangeQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let start = parse_timestamp(&query.start)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("malformed start: {}", query.start)))?;
    let end = parse_timestamp(&query.end)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("malformed end: {}", query.end)))?;
    let limit = query.limit.unwrap_or(1000).clamp(1, 10_000);

    let metrics = state
        .store
        .get_metrics_range(id, start, end, limit)
        .await
        .map_err(|e| e.into_response())?;
    Ok(Json(metrics))
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
