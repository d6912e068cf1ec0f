// Module: http
// REST endpoints and the WebSocket signaling upgrade

pub mod error;
pub mod health;
pub mod room;
pub mod websocket;

use axum::{routing::get, Router};
use huddle_sfu::{MediaRouter, Registry};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::impls::{Dispatcher, SessionContext};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub router: Arc<dyn MediaRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<huddle_core::Config>,
}

impl AppState {
    #[must_use]
    pub fn new(registry: Arc<Registry>, router: Arc<dyn MediaRouter>, config: huddle_core::Config) -> Self {
        Self {
            registry,
            router,
            dispatcher: Arc::new(Dispatcher::new()),
            config: Arc::new(config),
        }
    }

    /// Services handed to each new signaling session
    #[must_use]
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
            dispatcher: Arc::clone(&self.dispatcher),
            max_chat_length: self.config.session.max_chat_length,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(room::create_room_router())
        .merge(health::create_health_router());

    Router::new()
        .route("/ws", get(websocket::websocket_handler))
        .nest("/api", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
