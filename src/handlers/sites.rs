use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::AppState;
use crate::models::site::{CreateSiteRequest, UpdateSiteRequest};

pub async fn list_sites(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sites = state.store.list_sites().await.map_err(|e| e.into_response())?;
    Ok(Json(sites))
}

pub async fn create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name is required".to_string()));
    }
    let site = state
        .store
        .create_site(&req)
        .await
        .map_err(|e| e.into_response())?;
    if let Err(e) = state.poller.reload_from_store().await {
        tracing::error!(error = %e, "poller reload after site create failed");
    }
    Ok((StatusCode::CREATED, Json(site)))
}

pub async fn get_site(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let site = state
        .store
        .get_site(id)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "site not found".to_string()))?;
    Ok(Json(site))
}

pub async fn update_site(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSiteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let site = state
        .store
        .update_site(id, &req)
        .await
        .map_err(|e| e.into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "site not found".to_string()))?;
    // Site activity gates its transmitters; make the poller notice.
    if let Err(e) = state.poller.reload_from_store().await {
        tracing::error!(error = %e, "poller reload after site update failed");
    }
    Ok(Json(site))
}

pub async fn delete_site(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let deleted = state
        .store
        .delete_site(id)
        .await
        .map_err(|e| e.into_response())?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "site not found".to_string()));
    }
    if let Err(e) = state.poller.reload_from_store().await {
        tracing::error!(error = %e, "poller reload after site delete failed");
    }
    Ok(StatusCode::NO_CONTENT)
}
