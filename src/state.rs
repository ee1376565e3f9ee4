//! Application state: the generation engine plus request-level defaults.
//!
//! This module owns:
//!   - provider discovery from env (Gemini and/or OpenAI keys)
//!   - the record store and artifact store backing the engine
//!   - the engine config (from TOML or defaults)
//!
//! Providers missing their keys are simply not registered; the orchestrator
//! reports them as unconfigured when they come up in the fallback order.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::load_engine_config_from_env;
use crate::domain::ProviderId;
use crate::pipeline::{GenerationEngine, DEFAULT_PROVIDER};
use crate::providers::{gemini::GeminiClient, openai::OpenAiClient, ImageProvider, TextProvider};
use crate::store::{FsArtifactStore, MemoryStore};

#[derive(Clone)]
pub struct AppState {
  pub engine: Arc<GenerationEngine>,
  pub default_provider: ProviderId,
}

impl AppState {
  /// Build state from env: load config, discover providers, wire the engine.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    let config = load_engine_config_from_env().unwrap_or_default();

    let mut texts: Vec<Arc<dyn TextProvider>> = Vec::new();
    let mut images: Vec<Arc<dyn ImageProvider>> = Vec::new();

    if let Some(gemini) = GeminiClient::from_env() {
      let gemini = Arc::new(gemini);
      info!(target: "quizsmith_backend", "Gemini enabled.");
      texts.push(gemini.clone());
      images.push(gemini);
    } else {
      info!(target: "quizsmith_backend", "Gemini disabled (no GEMINI_API_KEY).");
    }
    if let Some(openai) = OpenAiClient::from_env() {
      let openai = Arc::new(openai);
      info!(target: "quizsmith_backend", "OpenAI enabled.");
      texts.push(openai.clone());
      images.push(openai);
    } else {
      info!(target: "quizsmith_backend", "OpenAI disabled (no OPENAI_API_KEY).");
    }
    if texts.is_empty() {
      warn!(target: "quizsmith_backend", "No providers configured; every generation request will fail");
    }

    let default_provider = default_provider_from_env();
    info!(target: "quizsmith_backend", provider = %default_provider, "Default provider");

    let media_dir = std::env::var("MEDIA_DIR").unwrap_or_else(|_| "./media".into());
    let store = Arc::new(MemoryStore::new());
    let artifacts = Arc::new(FsArtifactStore::new(media_dir));

    let engine = Arc::new(GenerationEngine::new(texts, images, store, artifacts, config));
    Self { engine, default_provider }
  }
}

fn default_provider_from_env() -> ProviderId {
  match std::env::var("DEFAULT_AI_PROVIDER").ok().as_deref() {
    Some("openai") => ProviderId::OpenAi,
    Some("gemini") | None => DEFAULT_PROVIDER,
    Some(other) => {
      warn!(target: "quizsmith_backend", value = %other, "Unknown DEFAULT_AI_PROVIDER; using default");
      DEFAULT_PROVIDER
    }
  }
}
