//! QuizSmith · Generation Backend
//!
//! - Axum HTTP API for quiz question batches and cover images
//! - Gemini and OpenAI integration with ordered fallback (via env variables)
//!
//! Important env variables:
//!   PORT            : u16 (default 3000)
//!   GEMINI_API_KEY / GEMINI_API_KEYS   : enables Gemini (comma list rotates)
//!   OPENAI_API_KEY / OPENAI_API_KEYS   : enables OpenAI (comma list rotates)
//!   DEFAULT_AI_PROVIDER  : "gemini" (default) or "openai"
//!   MEDIA_DIR       : cover image directory (default "./media")
//!   ENGINE_CONFIG_PATH   : path to TOML config (prompts + limits)
//!   LOG_LEVEL       : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT      : "pretty" (default) or "json"

mod cache;
mod config;
mod credentials;
mod dedup;
mod domain;
mod error;
mod moderation;
mod modloop;
mod orchestrator;
mod pipeline;
mod protocol;
mod providers;
mod ratelimit;
mod retry;
mod routes;
mod state;
mod store;
mod telemetry;
mod util;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (engine, providers, stores, config).
  let state = AppState::new();

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state);

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizsmith_backend", %addr, "HTTP server listening");
  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
  Ok(())
}
