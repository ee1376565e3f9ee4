//! Domain models: generation requests, generated items, cache entries,
//! usage records, and the fixed provider set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two external backends we can call, for either capability.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
  Gemini,
  OpenAi,
}

impl ProviderId {
  /// The complement in the fixed two-provider set.
  pub fn secondary(self) -> ProviderId {
    match self {
      ProviderId::Gemini => ProviderId::OpenAi,
      ProviderId::OpenAi => ProviderId::Gemini,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ProviderId::Gemini => "gemini",
      ProviderId::OpenAi => "openai",
    }
  }
}

impl std::fmt::Display for ProviderId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Derived, never stored: `[preferred, secondary]`.
pub fn provider_order(preferred: ProviderId) -> [ProviderId; 2] {
  [preferred, preferred.secondary()]
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
  MultipleChoice,
  TrueFalse,
  ShortAnswer,
}

impl ItemType {
  pub fn as_str(self) -> &'static str {
    match self {
      ItemType::MultipleChoice => "multiple_choice",
      ItemType::TrueFalse => "true_false",
      ItemType::ShortAnswer => "short_answer",
    }
  }
}

/// Immutable per call. `context_seed` carries the prior item a regeneration
/// should vary from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
  pub topic: String,
  pub difficulty: Difficulty,
  pub item_type: ItemType,
  pub count: usize,
  #[serde(default)]
  pub context_seed: Option<GeneratedItem>,
}

/// One generated quiz item.
///
/// Invariants (enforced by moderation, not by construction):
/// - multiple_choice: exactly 4 distinct non-empty options, answer in A..D
/// - true_false: answer in {True, False}
/// - prompt_text ≤ 300 chars after moderation acceptance
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratedItem {
  #[serde(rename = "type")]
  pub item_type: ItemType,
  #[serde(rename = "question")]
  pub prompt_text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
  pub answer: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub explanation: Option<String>,
}

/// A quiz-building session. `latest_preview` is the working item list the
/// client iterates on before saving.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
  pub id: String,
  pub topic: String,
  /// Optional taxonomy label, stored verbatim.
  pub category: Option<String>,
  pub difficulty: Difficulty,
  pub counts: Vec<(ItemType, usize)>,
  pub latest_preview: Vec<GeneratedItem>,
  pub created_at: DateTime<Utc>,
}

/// One regeneration event for an item slot; both texts feed the dedup seen set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegenerationEvent {
  pub session_id: String,
  pub index: usize,
  pub old_item: Option<GeneratedItem>,
  pub new_item: GeneratedItem,
  pub created_at: DateTime<Utc>,
}

/// Content-addressed cache row (image path only).
/// Unique on (identity, prompt_hash); superseded, never updated in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
  pub identity: String,
  pub prompt: String,
  pub prompt_hash: String,
  pub artifact_ref: String,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

/// Insert-only usage log row. Cache reuses are logged with
/// `reused_from_cache = true` and never count against the daily quota.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRecord {
  pub identity: String,
  pub prompt: String,
  pub provider: ProviderId,
  pub artifact_ref: String,
  pub reused_from_cache: bool,
  pub estimated_cost_usd: f64,
  pub created_at: DateTime<Utc>,
}

/// Quota snapshot returned to callers alongside image responses.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateStatus {
  pub used: u32,
  pub remaining: u32,
  pub limit: u32,
}
