pub mod client;
pub mod config;
pub mod service;
pub mod store;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use draw_core::{EquitySummary, Participant};
use serde::Deserialize;
use tracing::error;

pub use client::ControllerClient;
pub use service::{Assignment, DrawService, DrawState, ServiceError};

#[derive(Clone)]
pub struct AppState {
    draw: Arc<DrawService>,
}

impl AppState {
    pub fn new(service: DrawService) -> Self {
        Self {
            draw: Arc::new(service),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/draw/state", get(get_state))
        .route("/draw/perform", post(perform_draw))
        .route("/draw/mark-played", post(mark_played))
        .route("/draw/reset", post(reset_draw))
        .route("/draw/equity", get(get_equity))
        .route("/draw/assignments/:participant_id", get(get_assignments))
        .route("/roster", get(get_roster))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::UnknownParticipant(_)) => StatusCode::NOT_FOUND,
            ApiError::Service(ServiceError::NotDrawn | ServiceError::MissingFromDraw(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Service(ServiceError::Storage(err)) => {
                error!(error = %err, "draw state storage failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct PerformParams {
    seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkPlayedRequest {
    participant_id: Option<String>,
}

async fn get_state(State(state): State<AppState>) -> Result<Json<DrawState>, ApiError> {
    Ok(Json(state.draw.state().await?))
}

async fn perform_draw(
    State(state): State<AppState>,
    Query(params): Query<PerformParams>,
) -> Result<Json<DrawState>, ApiError> {
    Ok(Json(state.draw.perform_draw(params.seed).await?))
}

async fn mark_played(
    State(state): State<AppState>,
    payload: Result<Json<MarkPlayedRequest>, JsonRejection>,
) -> Result<Json<DrawState>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let participant_id = payload
        .participant_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("participantId required".to_string()))?;

    Ok(Json(state.draw.mark_played(participant_id).await?))
}

async fn reset_draw(State(state): State<AppState>) -> Result<Json<DrawState>, ApiError> {
    Ok(Json(state.draw.reset().await?))
}

async fn get_equity(State(state): State<AppState>) -> Result<Json<EquitySummary>, ApiError> {
    Ok(Json(state.draw.equity().await?))
}

async fn get_assignments(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> Result<Json<Assignment>, ApiError> {
    Ok(Json(state.draw.assignments(&participant_id).await?))
}

async fn get_roster(State(state): State<AppState>) -> Json<Vec<Participant>> {
    Json(state.draw.roster().to_vec())
}
