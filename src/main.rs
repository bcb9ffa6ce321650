mod air_quality;
mod api;
mod aqi;
mod availability;
mod config;
mod constants;
mod dataset;
mod geo;
mod http_client;
mod lifecycle;
mod openaq;
mod session;
mod snapshot;
mod types;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware::map_response;
use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{close_marker, healthz, no_store, open_marker, reload, select, view};
use crate::config::Config;
use crate::constants::USER_AGENT;
use crate::http_client::ReqwestTransport;
use crate::session::Session;
use crate::types::AppState;
use crate::utils::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Arc::new(Config::from_env()?);
    if cfg.openaq_api_key.is_none() {
        warn!("OPENAQ_API_KEY is not set; air quality lookups will report no data");
    }

    let http = Client::builder()
        .timeout(cfg.request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build reqwest client")?;

    let session = Arc::new(Session::new(ReqwestTransport::new(http), &cfg));
    let state = AppState {
        cfg: cfg.clone(),
        session: session.clone(),
    };

    tokio::spawn(async move {
        let selected = session.reload().await;
        info!("Initial availability probe finished; showing snapshot {selected}");
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/view", get(view))
        .route("/api/selection", post(select))
        .route("/api/reload", post(reload))
        .route(
            "/api/markers/{index}/{marker}/air-quality",
            get(open_marker).delete(close_marker),
        )
        .layer(map_response(no_store))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;

    info!(
        "Balloon air quality service listening on {} (snapshots from {})",
        cfg.listen_addr, cfg.snapshot_base_url
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}
