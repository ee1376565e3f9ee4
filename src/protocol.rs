//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Difficulty, GeneratedItem, ItemType, RateStatus};

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}

/// Requested item counts per type. Absent types default to zero.
#[derive(Debug, Default, Deserialize)]
pub struct CountsIn {
  #[serde(default)]
  pub multiple_choice: usize,
  #[serde(default)]
  pub true_false: usize,
  #[serde(default)]
  pub short_answer: usize,
}

impl CountsIn {
  pub fn as_pairs(&self) -> Vec<(ItemType, usize)> {
    vec![
      (ItemType::MultipleChoice, self.multiple_choice),
      (ItemType::TrueFalse, self.true_false),
      (ItemType::ShortAnswer, self.short_answer),
    ]
  }
}

#[derive(Debug, Deserialize)]
pub struct SessionCreateIn {
  pub topic: String,
  #[serde(default)]
  pub category: Option<String>,
  pub difficulty: Difficulty,
  pub counts: CountsIn,
}

#[derive(Serialize)]
pub struct SessionOut {
  #[serde(rename = "sessionId")]
  pub session_id: String,
  pub topic: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  pub difficulty: Difficulty,
  pub questions: Vec<GeneratedItem>,
  /// Absent on plain reads; only generation reports provenance.
  #[serde(rename = "providerUsed", skip_serializing_if = "Option::is_none")]
  pub provider_used: Option<String>,
  #[serde(rename = "fallbackUsed")]
  pub fallback_used: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateIn {
  #[serde(rename = "sessionId")]
  pub session_id: Option<String>,
  pub index: Option<usize>,
  pub topic: String,
  pub difficulty: Difficulty,
  #[serde(rename = "type")]
  pub item_type: ItemType,
  /// The item being replaced, used to seed variation.
  pub current: Option<GeneratedItem>,
  /// Extra phrasings the replacement must avoid.
  #[serde(default)]
  pub avoid: Vec<String>,
}

#[derive(Serialize)]
pub struct RegenerateOut {
  pub question: GeneratedItem,
  #[serde(rename = "providerUsed")]
  pub provider_used: Option<String>,
  #[serde(rename = "fallbackUsed")]
  pub fallback_used: bool,
  #[serde(rename = "forcedFallback")]
  pub forced_fallback: bool,
  #[serde(rename = "attemptsUsed")]
  pub attempts_used: u32,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmIn {
  #[serde(rename = "sessionId")]
  pub session_id: String,
  pub index: usize,
  pub question: GeneratedItem,
}

#[derive(Serialize)]
pub struct ConfirmOut {
  pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct CoverIn {
  pub prompt: String,
}

#[derive(Serialize)]
pub struct CoverOut {
  #[serde(rename = "imageRef")]
  pub image_ref: String,
  #[serde(rename = "providerUsed")]
  pub provider_used: String,
  #[serde(rename = "reusedFromCache")]
  pub reused_from_cache: bool,
  pub quota: QuotaOut,
}

#[derive(Serialize)]
pub struct QuotaOut {
  pub used: u32,
  pub remaining: u32,
  pub limit: u32,
}

impl From<RateStatus> for QuotaOut {
  fn from(s: RateStatus) -> Self {
    Self { used: s.used, remaining: s.remaining, limit: s.limit }
  }
}

#[derive(Serialize)]
pub struct ErrorOut {
  pub error: String,
  /// Present on quota refusals only.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub quota: Option<QuotaOut>,
}
