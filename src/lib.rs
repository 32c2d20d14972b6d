pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod rooms;
pub mod signaling;

use axum::{
    extract::FromRef,
    http::{header, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::{Error, Result};

use rooms::{ChatLog, RoomRegistry};
use signaling::Relay;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub registry: RoomRegistry,
    pub relay: Relay,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: &Config) -> Self {
        let registry = RoomRegistry::new(db_pool.clone(), config.retain_ended_rooms);
        let relay = Relay::new(registry.clone(), ChatLog::new(db_pool), config);
        Self { registry, relay }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .nest("/api/rooms", rooms::router())
        .route("/ws", get(rooms::ws::signaling_ws))
}

/// The full service: routes, sessions, CORS and request tracing.
pub fn app(state: AppState, config: &Config) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            config.session_inactivity_minutes,
        )));

    let cors = match &config.frontend_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.clone())
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        None => CorsLayer::permissive(),
    };

    router()
        .with_state(state)
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK", "message": "signaling server is running" }))
}
