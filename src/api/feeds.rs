use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use super::error::ApiError;
use super::SharedState;
use crate::feed::build_feed;

const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";

pub fn router() -> Router<SharedState> {
    Router::new().route("/feeds/:name", get(feed))
}

/// `/feeds/{name}` and `/feeds/{name}.xml` serve the same document.
async fn feed(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let name = name.strip_suffix(".xml").unwrap_or(&name);
    let channel = state.coordinator.get_channel(name).await?;
    let episodes = state
        .coordinator
        .db()
        .list_episodes(name)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let xml = build_feed(&channel, &episodes, &state.base_url)?;
    tracing::debug!(channel = %name, episodes = episodes.len(), "Served feed");
    Ok(([(header::CONTENT_TYPE, RSS_CONTENT_TYPE)], xml))
}
