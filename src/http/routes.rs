//! HTTP control surface: tracks, leaderboards, room listing, health

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::store::{Leaderboard, StoreError, TrackStore};
use crate::track::Track;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{RoomInfo, TrackSummary};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/tracks", get(list_tracks_handler).post(create_track_handler))
        .route(
            "/tracks/:id",
            get(get_track_handler).delete(delete_track_handler),
        )
        .route("/leaderboards/:track_id", get(leaderboard_handler))
        .route("/rooms", get(rooms_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    active_players: usize,
    tracks: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.room_count(),
        active_players: state.rooms.player_count(),
        tracks: state.tracks.summaries().len(),
    })
}

// ============================================================================
// Track endpoints
// ============================================================================

async fn list_tracks_handler(State(state): State<AppState>) -> Json<Vec<TrackSummary>> {
    Json(state.tracks.summaries())
}

async fn get_track_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Track>, ApiError> {
    state
        .tracks
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("track {id} not found")))
}

async fn create_track_handler(
    State(state): State<AppState>,
    Json(mut track): Json<Track>,
) -> Result<(StatusCode, Json<Track>), ApiError> {
    if track.id.is_empty() {
        track.id = Uuid::new_v4().to_string();
    }
    if TrackStore::is_protected(&track.id) {
        return Err(ApiError::Forbidden(
            "the built-in track cannot be replaced".to_string(),
        ));
    }

    track.strip_editor_elements();
    let errors = track.validate();
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let saved = state.tracks.upsert(track).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn delete_track_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.tracks.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("track {id} not found")))
    }
}

// ============================================================================
// Leaderboard and room listing endpoints
// ============================================================================

async fn leaderboard_handler(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
) -> Json<Leaderboard> {
    Json(state.leaderboards.get(&track_id))
}

async fn rooms_handler(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    Json(state.rooms.public_rooms())
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<String>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Protected => {
                ApiError::Forbidden("the built-in track cannot be deleted".to_string())
            }
            StoreError::InvalidKey(key) => ApiError::NotFound(format!("invalid id {key}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "validation failed", "errors": errors }),
            ),
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg }))
            }
            ApiError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, serde_json::json!({ "error": msg }))
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
