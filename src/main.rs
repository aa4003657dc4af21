use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use bossfight_bot::api::{self, AppState};
use bossfight_bot::chat::bridge::BridgeChat;
use bossfight_bot::config::Config;
use bossfight_bot::db::Database;
use bossfight_bot::engine::config::FightConfig;
use bossfight_bot::engine::content::ContentPool;
use bossfight_bot::engine::BossFightServer;
use bossfight_bot::metrics;
use bossfight_bot::points::PointLedger;

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "bossfight-bot" }))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    if config.local_mode {
        tracing::info!("Running in local mode: bridge authentication disabled");
    } else if config.bridge_token.is_none() {
        tracing::warn!("BRIDGE_TOKEN is not set: bridge endpoints are unauthenticated");
    }

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");

    let fight_config = match &config.fight_config {
        Some(path) => FightConfig::from_file(path).expect("Failed to load fight config"),
        None => FightConfig::default(),
    };
    let content = match &config.content_dir {
        Some(dir) => ContentPool::load(dir).expect("Failed to load content pools"),
        None => ContentPool::builtin(),
    };

    let chat = Arc::new(BridgeChat::new());
    let fight = Arc::new(
        BossFightServer::new(
            Arc::clone(&chat),
            Arc::new(PointLedger::new(db)),
            fight_config,
            content,
        )
        .with_command_prefix(config.command_prefix.clone()),
    );

    let state = AppState {
        fight,
        chat,
        bridge_token: config.bridge_token.clone(),
        local_mode: config.local_mode,
        command_prefix: config.command_prefix.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(api::router(state))
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Bossfight bot listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
