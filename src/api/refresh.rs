use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::error::ApiError;
use super::SharedState;
use crate::refresh::RunStatus;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/refresh", post(refresh_all))
        .route("/refresh/status", get(status))
        .route("/channels/:name/refresh", post(refresh_channel))
}

#[derive(Debug, Serialize)]
struct Accepted {
    status: &'static str,
}

fn accepted() -> (StatusCode, Json<Accepted>) {
    (StatusCode::ACCEPTED, Json(Accepted { status: "started" }))
}

// The run keeps going after the ticket is dropped; progress is read back
// through /refresh/status.

async fn refresh_all(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    state.coordinator.trigger_global().await?;
    Ok(accepted())
}

async fn refresh_channel(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    state.coordinator.trigger_channel(&name).await?;
    Ok(accepted())
}

async fn status(State(state): State<SharedState>) -> Json<RunStatus> {
    Json(state.coordinator.status())
}
