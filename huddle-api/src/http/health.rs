//! Health check and stats endpoints

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use huddle_sfu::RegistryStats;
use serde::{Deserialize, Serialize};

use crate::http::{AppError, AppResult, AppState};

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub rooms: usize,
    pub peers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
    pub connections: usize,
}

impl StatsResponse {
    fn new(stats: RegistryStats, connections: usize) -> Self {
        Self {
            rooms: stats.rooms,
            peers: stats.peers,
            transports: stats.transports,
            producers: stats.producers,
            consumers: stats.consumers,
            connections,
        }
    }
}

/// OK while the media router is serving
pub async fn health_check(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    if state.router.is_closed() {
        return Err(AppError::service_unavailable("Media router closed"));
    }
    Ok("OK")
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.registry.stats(),
        state.dispatcher.connection_count(),
    ))
}
