//! `cesync serve` -- HTTP JSON API for the sync coordinator.
//!
//! Field devices post change batches; the server merges them into the
//! session document, runs deviation analysis and answers with the merged
//! view. Batches for one session are merged strictly in arrival order.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Request bodies capped at 10 MB
//! - Optional API key authentication via CESYNC_API_KEY env var
//!
//! Endpoints:
//! - GET  /health                        - Server status (exempt from auth)
//! - GET  /scenarios                     - Loaded scenario definitions
//! - POST /sessions/{document_id}/merge  - Merge a device change batch
//! - GET  /sessions/{document_id}        - Resolved session view
//! - GET  /sessions/{document_id}/faults - Persisted faults
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use ce_storage::{InMemoryStore, StaticScenarios};
use ce_sync::SyncCoordinator;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;

use self::handlers::{
    handle_get_faults, handle_get_session, handle_health, handle_list_scenarios, handle_merge,
    handle_not_found,
};
use self::middleware::auth_middleware;
use self::state::AppState;

/// Maximum request body size: 10 MB.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Load scenario definitions from the configured directory, if any.
fn load_scenarios(config: &Config) -> Result<StaticScenarios, Box<dyn std::error::Error>> {
    match &config.server.scenarios_dir {
        Some(dir) => {
            let scenarios = StaticScenarios::load_dir(dir)?;
            info!(count = scenarios.len(), dir = %dir.display(), "loaded scenarios");
            Ok(scenarios)
        }
        None => {
            warn!("no scenarios directory configured; every merge will be rejected");
            Ok(StaticScenarios::new(Vec::new()))
        }
    }
}

/// Build the router over a ready coordinator.
fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/scenarios", get(handle_list_scenarios))
        .route("/sessions/{document_id}", get(handle_get_session))
        .route("/sessions/{document_id}/faults", get(handle_get_faults))
        .route("/sessions/{document_id}/merge", post(handle_merge))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server with the resolved configuration.
///
/// When TLS cert/key paths are provided the server listens over HTTPS using
/// `axum-server` with rustls. That needs the `tls` feature; a build without
/// it refuses TLS paths instead of falling back to plain HTTP.
pub async fn start_server(
    config: Config,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(not(feature = "tls"))]
    if tls_cert.is_some() || tls_key.is_some() {
        return Err(
            "--tls-cert/--tls-key given but cesync was built without the `tls` feature".into(),
        );
    }

    let scenarios = load_scenarios(&config)?;

    let api_key = std::env::var("CESYNC_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());
    if api_key.is_some() {
        info!("API key authentication enabled");
    }

    let sync_config = config.sync_config();
    info!(
        max_attempts = sync_config.retry.max_attempts,
        max_concurrent_merges = sync_config.max_concurrent_merges,
        merge_timeout_ms = sync_config.merge_timeout.as_millis() as u64,
        "sync coordinator configured"
    );

    let state = Arc::new(AppState {
        coordinator: SyncCoordinator::new(InMemoryStore::new(), scenarios, sync_config),
        round_trip_timeout: config.round_trip_timeout(),
        api_key,
    });
    let app = router(state);

    let port = config.server.port;
    let addr = format!("0.0.0.0:{}", port);

    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&tls_cert, &tls_key) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        info!("cesync listening on https://0.0.0.0:{}", port);
        axum_server::bind_rustls(socket_addr, tls)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("cesync listening on http://0.0.0.0:{}", port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => {
            // Without a handler the server runs until killed.
            warn!(error = %e, "could not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
