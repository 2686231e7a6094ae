use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::error::ApiError;
use super::SharedState;
use crate::feed::feed_url;
use crate::refresh::is_due;
use crate::registry::{ChannelDraft, ChannelPatch};
use crate::storage::{Channel, Episode};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/channels", get(list_channels).post(create_channel))
        .route(
            "/channels/:name",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/channels/:name/purge", post(purge_channel))
}

#[derive(Debug, Serialize)]
struct ChannelView {
    #[serde(flatten)]
    channel: Channel,
    episode_count: u64,
    due: bool,
    feed_url: String,
}

#[derive(Debug, Serialize)]
struct ChannelDetail {
    #[serde(flatten)]
    view: ChannelView,
    episodes: Vec<Episode>,
}

async fn view(state: &SharedState, channel: Channel) -> Result<ChannelView, ApiError> {
    let coordinator = &state.coordinator;
    let episode_count = coordinator
        .db()
        .count_episodes(&channel.name)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let feed_url = feed_url(&state.base_url, &channel.name)?.to_string();
    Ok(ChannelView {
        due: is_due(&channel, coordinator.now()),
        channel,
        episode_count,
        feed_url,
    })
}

async fn list_channels(State(state): State<SharedState>) -> Result<Json<Vec<ChannelView>>, ApiError> {
    let channels = state.coordinator.list_channels().await?;
    let mut views = Vec::with_capacity(channels.len());
    for channel in channels {
        views.push(view(&state, channel).await?);
    }
    Ok(Json(views))
}

async fn get_channel(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<ChannelDetail>, ApiError> {
    let channel = state.coordinator.get_channel(&name).await?;
    let episodes = state
        .coordinator
        .db()
        .list_episodes(&name)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ChannelDetail {
        view: view(&state, channel).await?,
        episodes,
    }))
}

async fn create_channel(
    State(state): State<SharedState>,
    payload: Result<Json<ChannelDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<ChannelView>), ApiError> {
    let Json(draft) = payload?;
    let channel = state.coordinator.add_channel(draft).await?;
    Ok((StatusCode::CREATED, Json(view(&state, channel).await?)))
}

async fn update_channel(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    payload: Result<Json<ChannelPatch>, JsonRejection>,
) -> Result<Json<ChannelView>, ApiError> {
    let Json(patch) = payload?;
    let channel = state.coordinator.update_channel(&name, patch).await?;
    Ok(Json(view(&state, channel).await?))
}

async fn delete_channel(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.delete_channel(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct PurgeResponse {
    removed: usize,
}

async fn purge_channel(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let removed = state.coordinator.purge_channel(&name).await?;
    tracing::info!(channel = %name, removed, "Channel purged");
    Ok(Json(PurgeResponse { removed }))
}
