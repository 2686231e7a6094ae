//! HTTP surface: feeds, media files, channel management and refresh control.
mod channels;
mod error;
mod feeds;
mod refresh;

pub use error::{ApiError, ErrorBody};

use axum::extract::{Request, State};
use axum::http::{header, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::refresh::Coordinator;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Prefix for feed and enclosure URLs
    pub base_url: Url,
    /// When set, mutating requests must carry it as a Bearer token
    pub api_token: Option<SecretString>,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let media_root = state.coordinator.settings().media_root.clone();

    let api = Router::new()
        .merge(channels::router())
        .merge(refresh::router());

    Router::new()
        .route("/health", get(health))
        .merge(feeds::router())
        .nest("/api", api)
        .nest_service("/podcasts", ServeDir::new(media_root))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token_for_mutating,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, state: SharedState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "HTTP server listening");
    }
    axum::serve(listener, router(state)).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn require_token_for_mutating(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_token else {
        return next.run(req).await;
    };
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }
    let authorized = bearer_token(&req).is_some_and(|token| token == expected.expose_secret());
    if authorized {
        return next.run(req).await;
    }
    tracing::warn!(method = %req.method(), path = %req.uri().path(), "Rejected unauthenticated request");
    ApiError::Unauthorized.into_response()
}
