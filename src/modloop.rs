//! Moderation loop: bounded re-generation until an item is acceptable, with
//! deterministic placeholders as the terminal degrade.
//!
//! Two regimes, intentionally asymmetric:
//! - batch post-processing allows exactly one regeneration per item (latency
//!   across many items wins);
//! - the user-initiated single-item loop retries up to 3 provider attempts
//!   before substituting the safe variant (getting a genuinely new item wins).
//!
//! Moderation never surfaces an error to the caller. Worst case is a visibly
//! generic placeholder item.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dedup::is_duplicate;
use crate::domain::{GeneratedItem, ItemType};
use crate::error::EngineError;
use crate::moderation::{review, severity, Severity};
use crate::util::normalize_for_compare;

/// Source of replacement candidates. The pipeline backs this with the
/// provider orchestrator; tests script it.
#[async_trait]
pub trait Regenerator: Send + Sync {
  async fn regenerate(
    &self,
    item_type: ItemType,
    base: Option<&GeneratedItem>,
    avoid: &[String],
  ) -> Result<GeneratedItem, EngineError>;
}

#[derive(Debug)]
pub struct ModerationOutcome {
  pub item: GeneratedItem,
  pub attempts_used: u32,
  pub forced_fallback: bool,
}

/// Batch post-processing for one raw item. `seen` accumulates accepted
/// texts so later items in the same batch are checked against earlier ones.
pub async fn accept_or_regenerate(
  raw: GeneratedItem,
  topic: &str,
  seen: &mut HashSet<String>,
  regen: &dyn Regenerator,
) -> ModerationOutcome {
  let issues = review(&raw);
  let sev = severity(&issues);
  let dup = is_duplicate(&raw, seen);

  let outcome = match (sev, dup) {
    (Severity::None, false) => ModerationOutcome { item: raw, attempts_used: 0, forced_fallback: false },

    (Severity::Severe, _) => {
      warn!(target: "moderation", ?issues, "Severe issues; regenerating once");
      let avoid: Vec<String> = seen.iter().cloned().collect();
      match regen.regenerate(raw.item_type, Some(&raw), &avoid).await {
        Ok(candidate) if severity(&review(&candidate)) != Severity::Severe => {
          ModerationOutcome { item: candidate, attempts_used: 1, forced_fallback: false }
        }
        Ok(_) => {
          warn!(target: "moderation", "Regenerated item still severe; substituting placeholder");
          ModerationOutcome {
            item: quality_placeholder(raw.item_type, topic),
            attempts_used: 1,
            forced_fallback: true,
          }
        }
        Err(e) => {
          warn!(target: "moderation", error = %e, "Regeneration failed; substituting placeholder");
          ModerationOutcome {
            item: quality_placeholder(raw.item_type, topic),
            attempts_used: 1,
            forced_fallback: true,
          }
        }
      }
    }

    // Minor blemish or duplicate: one regeneration attempt; prefer the
    // original blemish over an escalated replacement.
    (Severity::Minor, _) | (Severity::None, true) => {
      info!(target: "moderation", ?issues, duplicate = dup, "Minor/duplicate; one regeneration attempt");
      let avoid: Vec<String> = seen.iter().cloned().collect();
      match regen.regenerate(raw.item_type, Some(&raw), &avoid).await {
        Ok(candidate) if severity(&review(&candidate)) != Severity::Severe => {
          ModerationOutcome { item: candidate, attempts_used: 1, forced_fallback: false }
        }
        Ok(_) | Err(_) => ModerationOutcome { item: raw, attempts_used: 1, forced_fallback: false },
      }
    }
  };

  let n = normalize_for_compare(&outcome.item.prompt_text);
  if !n.is_empty() {
    seen.insert(n);
  }
  outcome
}

/// Strict single-item regeneration: up to `MAX_SINGLE_ATTEMPTS` provider
/// attempts, each rejected candidate's text joining the avoid set, then the
/// deterministic safe variant.
pub const MAX_SINGLE_ATTEMPTS: u32 = 3;

pub async fn regenerate_single(
  item_type: ItemType,
  topic: &str,
  base: Option<&GeneratedItem>,
  seen: &mut HashSet<String>,
  regen: &dyn Regenerator,
) -> ModerationOutcome {
  let mut attempts_used = 0;

  while attempts_used < MAX_SINGLE_ATTEMPTS {
    let avoid: Vec<String> = seen.iter().cloned().collect();
    attempts_used += 1;
    match regen.regenerate(item_type, base, &avoid).await {
      Ok(candidate) => {
        let issues = review(&candidate);
        let acceptable = issues.is_empty() && !is_duplicate(&candidate, seen);
        if acceptable {
          seen.insert(normalize_for_compare(&candidate.prompt_text));
          return ModerationOutcome { item: candidate, attempts_used, forced_fallback: false };
        }
        warn!(
          target: "moderation",
          attempt = attempts_used,
          ?issues,
          duplicate = is_duplicate(&candidate, seen),
          "Rejected regeneration candidate"
        );
        let n = normalize_for_compare(&candidate.prompt_text);
        if !n.is_empty() {
          seen.insert(n);
        }
      }
      Err(e) => {
        warn!(target: "moderation", attempt = attempts_used, error = %e, "Regeneration attempt failed");
      }
    }
  }

  warn!(target: "moderation", "Exhausted single-item attempts; substituting safe variant");
  ModerationOutcome {
    item: quality_placeholder(item_type, topic),
    attempts_used,
    forced_fallback: true,
  }
}

/// Hand-authored "adjusted for quality" item, scoped to the item type. The
/// short variant id keeps successive fallbacks textually distinct.
pub fn quality_placeholder(item_type: ItemType, topic: &str) -> GeneratedItem {
  let variant: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
  match item_type {
    ItemType::MultipleChoice => GeneratedItem {
      item_type,
      prompt_text: format!(
        "[{topic}] Select the statement that best describes a core concept of this topic (rev {variant})."
      ),
      options: Some(vec![
        "A) The correct definition for this concept.".into(),
        "B) A plausible but incorrect alternative.".into(),
        "C) A related but distinct concept.".into(),
        "D) An unrelated statement.".into(),
      ]),
      answer: "A".into(),
      explanation: Some("Adjusted for quality; review before publishing.".into()),
    },
    ItemType::TrueFalse => GeneratedItem {
      item_type,
      prompt_text: format!(
        "[{topic}] A fundamental property of this topic holds in the general case (rev {variant})."
      ),
      options: None,
      answer: "True".into(),
      explanation: Some("Adjusted for quality; review before publishing.".into()),
    },
    ItemType::ShortAnswer => GeneratedItem {
      item_type,
      prompt_text: format!(
        "[{topic}] Briefly explain the key concept of this topic (rev {variant})."
      ),
      options: None,
      answer: "A short expected answer stating the key concept.".into(),
      explanation: Some("Adjusted for quality; review before publishing.".into()),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  struct Scripted {
    queue: Mutex<VecDeque<Result<GeneratedItem, EngineError>>>,
    calls: Mutex<u32>,
  }

  impl Scripted {
    fn new(results: Vec<Result<GeneratedItem, EngineError>>) -> Self {
      Self { queue: Mutex::new(results.into()), calls: Mutex::new(0) }
    }

    fn calls(&self) -> u32 {
      *self.calls.lock().unwrap()
    }
  }

  #[async_trait]
  impl Regenerator for Scripted {
    async fn regenerate(
      &self,
      _item_type: ItemType,
      _base: Option<&GeneratedItem>,
      _avoid: &[String],
    ) -> Result<GeneratedItem, EngineError> {
      *self.calls.lock().unwrap() += 1;
      self
        .queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(EngineError::GenerationFailed("script exhausted".into())))
    }
  }

  fn clean_tf(text: &str) -> GeneratedItem {
    GeneratedItem {
      item_type: ItemType::TrueFalse,
      prompt_text: text.into(),
      options: None,
      answer: "True".into(),
      explanation: None,
    }
  }

  fn severe_tf() -> GeneratedItem {
    clean_tf("All programmers are lazy.")
  }

  fn minor_tf() -> GeneratedItem {
    clean_tf("Hash tables are usually O(1) for lookups.")
  }

  // Clean, non-duplicate input passes through unchanged.
  #[tokio::test]
  async fn clean_item_is_returned_unchanged() {
    let regen = Scripted::new(vec![]);
    let raw = clean_tf("A queue is FIFO.");
    let mut seen = HashSet::new();
    let out = accept_or_regenerate(raw.clone(), "data structures", &mut seen, &regen).await;
    assert_eq!(out.item, raw);
    assert_eq!(out.attempts_used, 0);
    assert!(!out.forced_fallback);
    assert_eq!(regen.calls(), 0);
    assert!(seen.contains("a queue is fifo"));
  }

  // Severe → severe regeneration is bounded to one attempt then placeholder.
  #[tokio::test]
  async fn double_severe_substitutes_placeholder_after_one_attempt() {
    let regen = Scripted::new(vec![Ok(severe_tf())]);
    let mut seen = HashSet::new();
    let out = accept_or_regenerate(severe_tf(), "teamwork", &mut seen, &regen).await;
    assert_eq!(regen.calls(), 1);
    assert_eq!(out.attempts_used, 1);
    assert!(out.forced_fallback);
    assert!(out.item.prompt_text.contains("[teamwork]"));
    assert!(review(&out.item).is_empty(), "placeholder must pass moderation");
  }

  #[tokio::test]
  async fn severe_item_accepts_clean_regeneration() {
    let replacement = clean_tf("A stack is LIFO.");
    let regen = Scripted::new(vec![Ok(replacement.clone())]);
    let mut seen = HashSet::new();
    let out = accept_or_regenerate(severe_tf(), "data structures", &mut seen, &regen).await;
    assert_eq!(out.item, replacement);
    assert!(!out.forced_fallback);
  }

  // Minor path: escalation on regeneration falls back to the original.
  #[tokio::test]
  async fn minor_item_keeps_original_when_regeneration_escalates() {
    let regen = Scripted::new(vec![Ok(severe_tf())]);
    let raw = minor_tf();
    let mut seen = HashSet::new();
    let out = accept_or_regenerate(raw.clone(), "hashing", &mut seen, &regen).await;
    assert_eq!(out.item, raw);
    assert_eq!(out.attempts_used, 1);
    assert!(!out.forced_fallback);
  }

  #[tokio::test]
  async fn duplicate_item_regenerates_once() {
    let replacement = clean_tf("A deque allows insertion at both ends.");
    let regen = Scripted::new(vec![Ok(replacement.clone())]);
    let raw = clean_tf("A queue is FIFO.");
    let mut seen = HashSet::new();
    seen.insert("a queue is fifo".to_string());
    let out = accept_or_regenerate(raw, "data structures", &mut seen, &regen).await;
    assert_eq!(out.item, replacement);
    assert_eq!(out.attempts_used, 1);
  }

  #[tokio::test]
  async fn regeneration_error_on_minor_path_keeps_original() {
    let regen = Scripted::new(vec![Err(EngineError::NoProvidersAvailable)]);
    let raw = minor_tf();
    let mut seen = HashSet::new();
    let out = accept_or_regenerate(raw.clone(), "hashing", &mut seen, &regen).await;
    assert_eq!(out.item, raw);
    assert!(!out.forced_fallback);
  }

  // The single-item loop performs at most 3 attempts, then the safe variant.
  #[tokio::test]
  async fn single_loop_is_bounded_to_three_attempts() {
    let regen = Scripted::new(vec![Ok(severe_tf()), Ok(minor_tf()), Ok(severe_tf())]);
    let mut seen = HashSet::new();
    let out = regenerate_single(ItemType::TrueFalse, "testing", None, &mut seen, &regen).await;
    assert_eq!(regen.calls(), 3);
    assert_eq!(out.attempts_used, 3);
    assert!(out.forced_fallback);
    assert!(review(&out.item).is_empty());
  }

  #[tokio::test]
  async fn single_loop_accepts_first_clean_candidate() {
    let good = clean_tf("Unit tests run in isolation.");
    let regen = Scripted::new(vec![Ok(good.clone())]);
    let mut seen = HashSet::new();
    let out = regenerate_single(ItemType::TrueFalse, "testing", None, &mut seen, &regen).await;
    assert_eq!(out.item, good);
    assert_eq!(out.attempts_used, 1);
    assert!(!out.forced_fallback);
  }

  #[tokio::test]
  async fn single_loop_rejects_duplicates_and_grows_avoid_set() {
    let dup = clean_tf("A queue is FIFO.");
    let fresh = clean_tf("A heap keeps the max on top.");
    let regen = Scripted::new(vec![Ok(dup.clone()), Ok(fresh.clone())]);
    let mut seen = HashSet::new();
    seen.insert("a queue is fifo".to_string());
    let out = regenerate_single(ItemType::TrueFalse, "data structures", None, &mut seen, &regen).await;
    assert_eq!(out.item, fresh);
    assert_eq!(out.attempts_used, 2);
  }

  #[test]
  fn placeholders_are_structurally_valid_and_distinct() {
    for t in [ItemType::MultipleChoice, ItemType::TrueFalse, ItemType::ShortAnswer] {
      let p = quality_placeholder(t, "algorithms");
      assert!(review(&p).is_empty(), "placeholder for {t:?} must pass moderation");
    }
    let a = quality_placeholder(ItemType::TrueFalse, "algorithms");
    let b = quality_placeholder(ItemType::TrueFalse, "algorithms");
    assert_ne!(a.prompt_text, b.prompt_text);
  }
}
