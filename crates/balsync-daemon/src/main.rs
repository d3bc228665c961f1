//! balsync-daemon entry point.
//!
//! Thin on purpose: tracing, config, pool + migrations, engine and scheduled
//! tasks, HTTP server. On ctrl-c the server stops accepting requests, the
//! scheduled tasks are stopped, every balance is saved, and the pool closed.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use balsync_config::{load_layered_yaml, report_unused_keys, UnusedKeyPolicy};
use balsync_daemon::{routes, state};
use balsync_db::PgBalanceStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

/// Comma-separated list of YAML layers, earliest first.
const ENV_CONFIG_PATHS: &str = "BALSYNC_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths_raw = std::env::var(ENV_CONFIG_PATHS).unwrap_or_default();
    let paths: Vec<&str> = paths_raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let loaded = load_layered_yaml(&paths)?;
    let unused = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &unused.unused_leaf_pointers {
        warn!(key = %ptr, "unused config key");
    }
    let cfg = loaded.typed()?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

    let pool = balsync_db::connect(&cfg.database).await?;
    balsync_db::migrate(&pool).await?;
    let store = Arc::new(PgBalanceStore::new(pool.clone()));

    let shared = Arc::new(state::AppState::new(cfg.sync.clone(), store));
    shared.start_sync_tasks();
    state::spawn_heartbeat(&shared, Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match bind_addr_from_env() {
        Some(a) => a,
        None => cfg
            .daemon
            .bind_addr
            .parse()
            .context("daemon.bind_addr is not a socket address")?,
    };
    info!("balsync-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    match shared.shutdown().await {
        Ok(report) => info!(
            written = report.written,
            failed = report.failed,
            "final save complete"
        ),
        Err(e) => error!(error = %e, "final save failed"),
    }
    pool.close().await;
    info!("balsync-daemon stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("BALSYNC_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
