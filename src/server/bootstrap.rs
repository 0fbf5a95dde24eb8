use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::RedisStateCache;
use crate::pubsub::GamePubSub;
use crate::recovery::RecoveryService;
use crate::room::{CpuProfileRegistry, HouseCpu, RoomManager};
use crate::store::{self, SeaOrmEventStore, SeaOrmGameDirectory};

use super::matchmaking::{self, MatchQueue};
use super::{ws, AppEnv};

const LOG_TARGET: &str = "server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    /// Replica id, stamped on cache records and pub/sub messages.
    pub server_id: String,
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    // The event log is the source of truth; never serve without it.
    let conn = store::connect(&config.database_url)
        .await
        .context("event log unavailable; refusing to start")?;
    store::init_schema(&conn)
        .await
        .context("failed to initialize event log schema")?;

    let events = Arc::new(SeaOrmEventStore::new(conn.clone()));
    let directory = Arc::new(SeaOrmGameDirectory::new(conn));
    let cache = Arc::new(
        RedisStateCache::connect(&config.redis_url)
            .await
            .context("state cache unavailable")?,
    );
    let bus = Arc::new(
        GamePubSub::connect(&config.redis_url, config.server_id.clone())
            .await
            .context("pub/sub bus unavailable")?,
    );
    bus.start();

    let recovery = RecoveryService::new(
        events.clone(),
        directory.clone(),
        cache.clone(),
        config.server_id.clone(),
    );
    let summary = recovery.recover_all().await;
    info!(
        target: LOG_TARGET,
        recovered = summary.recovered.len(),
        skipped = summary.skipped,
        failed = summary.failed,
        "startup recovery finished"
    );

    let env = Arc::new(AppEnv {
        server_id: config.server_id.clone(),
        rooms: RoomManager::new(),
        events,
        directory,
        cache,
        bus: Arc::clone(&bus),
        profiles: Arc::new(CpuProfileRegistry::new()),
        policy: Arc::new(HouseCpu),
        queue: MatchQueue::new(),
    });

    let scanner = tokio::spawn(matchmaking::run_scanner(Arc::clone(&env)));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::clone(&env));

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target: LOG_TARGET,
        %local_addr,
        server_id = %config.server_id,
        "golf server listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    scanner.abort();
    bus.stop();
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    use tracing::warn;

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target: LOG_TARGET,
            error = %err,
            "failed to install ctrl-c handler"
        );
    }
    info!(target: LOG_TARGET, "shutdown signal received");
}
