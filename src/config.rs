//! Engine configuration (prompt templates + tunables) from TOML.
//!
//! See `EngineConfig` for the expected schema. Everything has a default so
//! the file is optional; set ENGINE_CONFIG_PATH to override.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub limits: Limits,
}

/// Prompt templates used by both text providers. Placeholders are filled
/// with `util::fill_template`.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  pub batch_system: String,
  pub batch_user_template: String,
  pub regen_system: String,
  pub regen_user_template: String,
  pub regen_avoid_clause: String,
  pub cover_style_suffix: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      batch_system: "You are a quiz content generator. Respond ONLY with strict JSON.".into(),
      batch_user_template: "Generate exactly {count} {item_type} questions about \"{topic}\" at {difficulty} difficulty. Return JSON: {\"questions\": [{\"type\": string, \"question\": string, \"options\": [4 strings, mcq only], \"answer\": string, \"explanation\": string}]}. For multiple_choice: 4 options, answer in {A,B,C,D}. For true_false: answer in {True,False}. Keep each question under 300 characters. Explanations under 40 words.".into(),
      regen_system: "You are a quiz content generator producing ONE replacement question. Respond ONLY with strict JSON for a single question object.".into(),
      regen_user_template: "Generate 1 {item_type} question about \"{topic}\" at {difficulty} difficulty. Return JSON: {\"type\": string, \"question\": string, \"options\": [4 strings, mcq only], \"answer\": string, \"explanation\": string}.{seed_clause}{avoid_clause}".into(),
      regen_avoid_clause: " Do NOT reuse any of these phrasings: {phrases}.".into(),
      cover_style_suffix: ", flat illustration, bold colors, no text overlay".into(),
    }
  }
}

/// Engine tunables. Defaults match production behavior; override in TOML
/// for load tests only.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Limits {
  /// Paid image generations per identity per provider per UTC day.
  #[serde(default = "default_daily_limit")]
  pub daily_image_limit: u32,
  /// Image cache TTL in hours.
  #[serde(default = "default_cache_ttl_hours")]
  pub cache_ttl_hours: i64,
  /// Provider attempts per provider before falling back.
  #[serde(default = "default_retry_attempts")]
  pub retry_attempts: u32,
  /// Base backoff delay in milliseconds (doubles per attempt).
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  /// Max items per type and per session at request validation.
  #[serde(default = "default_max_questions")]
  pub max_questions: usize,
}

fn default_daily_limit() -> u32 { 10 }
fn default_cache_ttl_hours() -> i64 { 24 }
fn default_retry_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_questions() -> usize { 20 }

impl Default for Limits {
  fn default() -> Self {
    Self {
      daily_image_limit: default_daily_limit(),
      cache_ttl_hours: default_cache_ttl_hours(),
      retry_attempts: default_retry_attempts(),
      base_delay_ms: default_base_delay_ms(),
      max_questions: default_max_questions(),
    }
  }
}

/// Attempt to load `EngineConfig` from ENGINE_CONFIG_PATH. On any parsing/IO
/// error, returns None and the caller falls back to defaults.
pub fn load_engine_config_from_env() -> Option<EngineConfig> {
  let path = std::env::var("ENGINE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<EngineConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quizsmith_backend", %path, "Loaded engine config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizsmith_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizsmith_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
