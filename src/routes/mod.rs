//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use axum::{
  routing::{get, post},
  Router,
};
use tower_http::{
  cors::{Any, CorsLayer},
  trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers) – adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/api/v1/health", get(http::http_health))
    .route("/api/v1/sessions", post(http::http_create_session))
    .route("/api/v1/sessions/:id", get(http::http_get_session))
    .route("/api/v1/questions/regenerate", post(http::http_regenerate_question))
    .route("/api/v1/questions/confirm", post(http::http_confirm_question))
    .route("/api/v1/covers", post(http::http_generate_cover))
    .route("/api/v1/covers/quota", get(http::http_cover_quota))
    .with_state(state)
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}
