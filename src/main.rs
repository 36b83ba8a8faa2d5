mod config;
mod error;
mod handlers;
mod mib;
mod models;
mod oid;
mod parser;
mod poller;
mod snmp;
mod store;
mod trap_receiver;
mod walk_template;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use config::Config;
use mib::MibMapper;
use poller::PollScheduler;
use store::Store;
use trap_receiver::TrapReceiver;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub poller: Arc<PollScheduler>,
    pub mib: Arc<MibMapper>,
    pub assets_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("txfleet=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Init order matters: storage first, then the scheduler reconciles
    // against it, then the trap receiver starts attributing senders.
    let store = Store::connect(&config.database_url).await?;
    store.initialize_schema().await?;

    let mut mib = MibMapper::with_builtin();
    if let Ok(entries) = std::fs::read_dir("mibs") {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match mib.load_file(&path) {
                    Ok(()) => tracing::info!(file = %path.display(), "MIB mappings loaded"),
                    Err(e) => tracing::warn!(file = %path.display(), error = %e, "MIB file skipped"),
                }
            }
        }
    }
    tracing::info!(mappings = mib.len(), "MIB mapper ready");

    let poller = Arc::new(PollScheduler::new(store.clone()));
    poller.reload_from_store().await?;

    let receiver = TrapReceiver::new(store.clone(), config.trap.clone());
    receiver.start().await?;

    let state = AppState {
        store,
        poller,
        mib: Arc::new(mib),
        assets_dir: PathBuf::from("attached_assets"),
    };

    let app = Router::new()
        // Device projections of transmitters
        .route(
            "/api/snmp/devices",
            get(handlers::devices::list_devices).post(handlers::devices::create_device),
        )
        .route(
            "/api/snmp/devices/{id}",
            get(handlers::devices::get_device)
                .put(handlers::devices::update_device)
                .delete(handlers::devices::delete_device),
        )
        .route(
            "/api/snmp/devices/{id}/status",
            get(handlers::devices::device_status),
        )
        // Connectivity and discovery
        .route("/api/snmp/test", post(handlers::control::test_device))
        .route("/api/snmp/walk", post(handlers::control::walk_device))
        // Poller lifecycle
        .route("/api/snmp/start", post(handlers::control::start_poller))
        .route("/api/snmp/stop", post(handlers::control::stop_poller))
        .route("/api/snmp/status", get(handlers::control::poller_status))
        // In-memory result ring
        .route(
            "/api/snmp/results",
            get(handlers::control::list_results).delete(handlers::control::clear_results),
        )
        .route("/api/snmp/events", get(handlers::control::events))
        // Transmitters and their time-series
        .route(
            "/api/snmp/transmitters",
            get(handlers::transmitters::list_transmitters)
                .post(handlers::transmitters::create_transmitter),
        )
        .route(
            "/api/snmp/transmitters/{id}",
            get(handlers::transmitters::get_transmitter)
                .put(handlers::transmitters::update_transmitter)
                .delete(handlers::transmitters::delete_transmitter),
        )
        .route(
            "/api/snmp/transmitters/{id}/metrics/latest",
            get(handlers::transmitters::latest_metrics),
        )
        .route(
            "/api/snmp/transmitters/{id}/metrics",
            get(handlers::transmitters::metrics_range),
        )
        // Sites
        .route(
            "/api/snmp/sites",
            get(handlers::sites::list_sites).post(handlers::sites::create_site),
        )
        .route(
            "/api/snmp/sites/{id}",
            get(handlers::sites::get_site)
                .put(handlers::sites::update_site)
                .delete(handlers::sites::delete_site),
        )
        // Traps
        .route("/api/snmp/traps/latest", get(handlers::traps::latest_traps))
        .route("/api/snmp/traps/range", get(handlers::traps::traps_range))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("txfleet listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
