//! Capability-typed provider adapters.
//!
//! Each external backend is wrapped in a small client implementing
//! `TextProvider` and/or `ImageProvider`. The orchestrator only ever sees
//! these traits plus `ProviderId`, so provider selection is an explicit
//! enum, never runtime introspection.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Prompts;
use crate::domain::{GeneratedItem, GenerationRequest, ItemType, ProviderId};
use crate::error::ProviderError;
use crate::util::fill_template;

pub mod gemini;
pub mod openai;

/// Text-question generation capability.
#[async_trait]
pub trait TextProvider: Send + Sync {
  fn id(&self) -> ProviderId;

  /// Generate a batch of items for the request. Implementations parse and
  /// lightly normalize the model output but do NOT enforce the requested
  /// count; the orchestrator owns that rule.
  async fn generate_batch(
    &self,
    req: &GenerationRequest,
    prompts: &Prompts,
  ) -> Result<Vec<GeneratedItem>, ProviderError>;

  /// Generate a single replacement item, steering away from `avoid` texts.
  async fn generate_one(
    &self,
    req: &GenerationRequest,
    avoid: &[String],
    prompts: &Prompts,
  ) -> Result<GeneratedItem, ProviderError>;
}

/// Cover-image generation capability. Returns encoded image bytes; the
/// pipeline owns artifact persistence.
#[async_trait]
pub trait ImageProvider: Send + Sync {
  fn id(&self) -> ProviderId;

  async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;
}

// --- Shared prompt assembly ---

pub(crate) fn batch_prompt(req: &GenerationRequest, prompts: &Prompts) -> (String, String) {
  let user = fill_template(
    &prompts.batch_user_template,
    &[
      ("count", &req.count.to_string()),
      ("item_type", req.item_type.as_str()),
      ("topic", &req.topic),
      ("difficulty", req.difficulty.as_str()),
    ],
  );
  (prompts.batch_system.clone(), user)
}

pub(crate) fn regen_prompt(
  req: &GenerationRequest,
  avoid: &[String],
  prompts: &Prompts,
) -> (String, String) {
  let seed_clause = match &req.context_seed {
    Some(base) => {
      let base_json = serde_json::to_string(base).unwrap_or_default();
      format!(
        " Use this question as a conceptual reference but do NOT reuse its wording, examples, numbers or names; shift the focus to make a clearly different variant: {}",
        base_json
      )
    }
    None => String::new(),
  };
  let avoid_clause = if avoid.is_empty() {
    String::new()
  } else {
    fill_template(&prompts.regen_avoid_clause, &[("phrases", &avoid.join("; "))])
  };
  let user = fill_template(
    &prompts.regen_user_template,
    &[
      ("item_type", req.item_type.as_str()),
      ("topic", &req.topic),
      ("difficulty", req.difficulty.as_str()),
      ("seed_clause", &seed_clause),
      ("avoid_clause", &avoid_clause),
    ],
  );
  (prompts.regen_system.clone(), user)
}

// --- Shared response parsing ---

/// Parse `{"questions": [...]}` into items.
pub(crate) fn items_from_json(v: &Value, fallback_type: ItemType) -> Result<Vec<GeneratedItem>, ProviderError> {
  let arr = v
    .get("questions")
    .and_then(|q| q.as_array())
    .ok_or_else(|| ProviderError::Malformed("response missing 'questions' array".into()))?;
  arr.iter().map(|q| item_from_json(q, fallback_type)).collect()
}

/// Parse one question object, tolerating minor shape drift.
pub(crate) fn item_from_json(v: &Value, fallback_type: ItemType) -> Result<GeneratedItem, ProviderError> {
  let prompt_text = v
    .get("question")
    .and_then(|s| s.as_str())
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| ProviderError::Malformed("question object missing 'question' text".into()))?;

  let item_type = match v.get("type").and_then(|s| s.as_str()) {
    Some("multiple_choice") | Some("mcq") => ItemType::MultipleChoice,
    Some("true_false") | Some("vf") => ItemType::TrueFalse,
    Some("short_answer") | Some("short") => ItemType::ShortAnswer,
    _ => fallback_type,
  };

  let options = v.get("options").and_then(|o| o.as_array()).map(|a| {
    a.iter()
      .filter_map(|s| s.as_str())
      .map(|s| s.trim().to_string())
      .collect::<Vec<_>>()
  });

  let answer_raw = v
    .get("answer")
    .and_then(|s| s.as_str())
    .map(str::trim)
    .ok_or_else(|| ProviderError::Malformed("question object missing 'answer'".into()))?;

  // Light normalization only; structural validity is the moderator's job.
  let answer = match item_type {
    ItemType::MultipleChoice => answer_raw.to_uppercase().chars().take(1).collect(),
    ItemType::TrueFalse => {
      let mut a = answer_raw.to_lowercase();
      if let Some(first) = a.get_mut(0..1) {
        first.make_ascii_uppercase();
      }
      a
    }
    ItemType::ShortAnswer => answer_raw.to_string(),
  };

  let explanation = v
    .get("explanation")
    .and_then(|s| s.as_str())
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from);

  Ok(GeneratedItem {
    item_type,
    prompt_text: prompt_text.to_string(),
    options,
    answer,
    explanation,
  })
}
