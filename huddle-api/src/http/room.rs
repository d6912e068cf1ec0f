//! Room endpoints
//!
//! Meeting codes are minted and checked here; a room itself only comes
//! into existence when its first peer joins over the socket.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use huddle_core::validation::{EmailValidator, RoomIdValidator};
use huddle_sfu::RoomId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{AppResult, AppState};

pub fn create_room_router() -> Router<AppState> {
    Router::new()
        .route("/router-capabilities", get(router_capabilities))
        .route("/rooms", post(create_room))
        .route("/rooms/{room_id}", get(get_room))
        .route("/join", get(validate_join))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: String,
    pub exists: bool,
    pub peer_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub email: String,
    pub room_id: String,
}

/// Capability descriptor a client device loads before joining
async fn router_capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.capabilities())
}

/// Mint a fresh meeting code
async fn create_room() -> impl IntoResponse {
    let room_id = RoomId::generate();
    debug!(room_id = %room_id, "Minted room id");

    (
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id: room_id.to_string(),
        }),
    )
}

async fn get_room(State(state): State<AppState>, Path(room_id): Path<String>) -> AppResult<Json<RoomResponse>> {
    RoomIdValidator::new().validate(&room_id)?;

    let peer_count = state.registry.peer_count(&RoomId::from(room_id.as_str()));
    Ok(Json(RoomResponse {
        room_id,
        exists: peer_count.is_some(),
        peer_count: peer_count.unwrap_or(0),
    }))
}

/// Check an email / meeting code pair before opening the socket
async fn validate_join(Query(query): Query<JoinQuery>) -> AppResult<Json<JoinResponse>> {
    EmailValidator::new().validate(&query.email)?;
    RoomIdValidator::new().validate(&query.code)?;

    Ok(Json(JoinResponse {
        email: query.email,
        room_id: query.code,
    }))
}
