use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::AppState;
use crate::models::transmitter::{DeviceView, UpsertTransmitter};

pub async fn list_devices(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let transmitters = state
        .store
        .list_transmitters()
        .await
        .map_err(|e| e.into_response())?;
    let devices: Vec<DeviceView> = transmitters.into_iter().map(DeviceView::from).collect();
    Ok(Json(devices))
}

pub async fn create_device(
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
        tracing::error!(error = %e, "poller reload after device create failed");
    }

    Ok((StatusCode::CREATED, Json(DeviceView::from(transmitter))))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let transmitter = state
        .store
        .get_transmitter(id)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "device not found".to_string()))?;
    Ok(Json(DeviceView::from(transmitter)))
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpsertTransmitter>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .store
        .get_transmitter(id)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "device not found".to_string()))?;

    req.id = Some(id);
    req.validate().map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let transmitter = state
        .store
        .upsert_transmitter(&req)
        .await
        .map_err(|e| e.into_response())?;

    // A changed connection tuple must get a fresh session before the next
    // poll; slot replacement guarantees that.
    state.poller.update_device(transmitter.clone()).await;

    Ok(Json(DeviceView::from(transmitter)))
}

/// Derived liveness for one device: fewer than five failures in the last
/// ten polls and at least one success.
pub async fn device_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    Json(state.poller.device_status(id).await)
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let deleted = state
        .store
        .delete_transmitter(id)
        .await
        .map_err(|e| e.into_response())?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "device not found".to_string()));
    }
    if let Err(e) = state.poller.reload_from_store().await {
        tracing::error!(error = %e, "poller reload after device delete failed");
    }
    Ok(StatusCode::NO_CONTENT)
}
