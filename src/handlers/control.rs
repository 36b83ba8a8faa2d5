use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::StreamExt;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::IntervalStream;
use uuid::Uuid;

use crate::AppState;
use crate::snmp::{self, DeviceSession, SnmpEndpoint};
use crate::walk_template;

/// Cadence of the SSE `update` events.
const EVENTS_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on entries accumulated by a REST-initiated walk.
const WALK_MAX_ENTRIES: usize = 2000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRequest {
    #[serde(flatten)]
    pub endpoint: SnmpEndpoint,
    #[serde(default)]
    pub oids: Vec<String>,
}

/// One-shot connectivity probe: session, GET, close.
pub async fn test_device(Json(req): Json<TestRequest>) -> impl IntoResponse {
    let oids = if req.oids.is_empty() {
        vec!["1.3.6.1.2.1.1.3.0".to_string()]
    } else {
        req.oids
    };
    match snmp::probe(&req.endpoint, &oids).await {
        Ok(varbinds) => Json(json!({ "ok": true, "data": varbinds })),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkRequest {
    #[serde(flatten)]
    pub endpoint: SnmpEndpoint,
    /// Subtree root; defaults to the Elenos enterprise arc.
    pub root: Option<String>,
    /// Template name; defaults to the host.
    pub name: Option<String>,
    /// Walk dump file consulted when the live walk fails.
    pub dump_file: Option<String>,
}

/// Walk a device subtree and persist a generated template. When the device
/// does not answer, fall back to parsing a local walk dump.
pub async fn walk_device(
    State(state): State<AppState>,
    Json(req): Json<WalkRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let root = req.root.clone().unwrap_or_else(|| "1.3.6.1.4.1.31946".to_string());
    let name = req.name.clone().unwrap_or_else(|| req.endpoint.host.clone());

    let mut session = DeviceSession::new(req.endpoint.clone());
    let template = match session.walk(&root, WALK_MAX_ENTRIES).await {
        Ok(varbinds) if !varbinds.is_empty() => {
            walk_template::template_from_varbinds(&name, "walk", &varbinds, &state.mib)
        }
        other => {
            if let Err(e) = &other {
                tracing::warn!(host = %req.endpoint.host, error = %e, "live walk failed, trying dump file");
            }
            let dump_path = req
                .dump_file
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| state.assets_dir.join("walk_dump.txt"));
            let text = std::fs::read_to_string(&dump_path).map_err(|e| {
                (
                    StatusCode::BAD_GATEWAY,
                    format!("walk failed and no dump file at {}: {e}", dump_path.display()),
                )
            })?;
            walk_template::template_from_dump(&name, &text, &state.mib)
        }
    };
    session.close();

    let saved_to = walk_template::persist_template(&state.assets_dir, &template)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "template": template,
        "savedTo": saved_to.display().to_string(),
    })))
}

pub async fn start_poller(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .poller
        .reload_from_store()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(state.poller.status().await))
}

pub async fn stop_poller(State(state): State<AppState>) -> impl IntoResponse {
    state.poller.stop().await;
    Json(state.poller.status().await)
}

pub async fn poller_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.poller.status().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsQuery {
    pub device_id: Option<Uuid>,
    pub limit: Option<usize>,
}

pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);
    Json(state.poller.results(query.device_id, limit).await)
}

pub async fn clear_results(State(state): State<AppState>) -> impl IntoResponse {
    state.poller.clear_results().await;
    StatusCode::NO_CONTENT
}

/// SSE stream: `connected` once, then `update` every 5 s carrying the ten
/// newest results and the latest stored metric per transmitter.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connected = futures_util::stream::once(async {
        Ok::<_, Infallible>(Event::default().event("connected").data("{}"))
    });

    let ticker = tokio::time::interval(EVENTS_INTERVAL);
    let updates = IntervalStream::new(ticker).then(move |_| {
        let state = state.clone();
        async move {
            let payload = build_update(&state).await;
            Ok::<_, Infallible>(Event::default().event("update").data(payload.to_string()))
        }
    });

    Sse::new(connected.chain(updates)).keep_alive(KeepAlive::default())
}

async fn build_update(state: &AppState) -> serde_json::Value {
    let results = state.poller.results(None, 10).await;

    let mut latest = serde_json::Map::new();
    match state.store.list_transmitters().await {
        Ok(transmitters) => {
            for t in transmitters {
                match state.store.get_latest_metrics(t.id).await {
                    Ok(Some(metric)) => {
                        latest.insert(
                            t.id.to_string(),
                            serde_json::to_value(metric).unwrap_or(serde_json::Value::Null),
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(transmitter = %t.id, error = %e, "latest metric lookup failed");
                    }
                }
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "transmitter listing failed for event tick");
        }
    }

    json!({ "results": results, "latestMetrics": latest })
}
