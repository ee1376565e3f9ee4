//! Provider orchestration: ordered fallback across the fixed provider set,
//! with per-provider retry and a unified terminal error taxonomy.
//!
//! Every provider attempt is wrapped in the RetryPolicy; only when a
//! provider's whole retry budget is spent do we record its terminal failure
//! and move to the next provider in order. If all providers fail, the
//! terminal state collapses into exactly two kinds: `NoProvidersAvailable`
//! when every recorded error was quota/billing, `ProvidersFailed` otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{provider_order, GeneratedItem, GenerationRequest, ProviderId};
use crate::error::{EngineError, ProviderError, ProviderFailure};
use crate::providers::{ImageProvider, TextProvider};
use crate::retry::RetryPolicy;

/// Successful batch outcome with provenance for the caller.
#[derive(Debug)]
pub struct BatchOutcome {
  pub items: Vec<GeneratedItem>,
  pub provider_used: ProviderId,
  pub fallback_used: bool,
  pub error_log: Vec<ProviderFailure>,
}

#[derive(Debug)]
pub struct SingleOutcome {
  pub item: GeneratedItem,
  pub provider_used: ProviderId,
  pub fallback_used: bool,
}

#[derive(Debug)]
pub struct ImageOutcome {
  pub bytes: Vec<u8>,
  pub provider_used: ProviderId,
  pub fallback_used: bool,
}

pub struct TextOrchestrator {
  providers: HashMap<ProviderId, Arc<dyn TextProvider>>,
  retry: RetryPolicy,
}

impl TextOrchestrator {
  pub fn new(providers: Vec<Arc<dyn TextProvider>>, retry: RetryPolicy) -> Self {
    let providers = providers.into_iter().map(|p| (p.id(), p)).collect();
    Self { providers, retry }
  }

  /// Generate a full batch, trying `[preferred, secondary]` in order.
  ///
  /// A provider delivering fewer items than requested is a failure for that
  /// provider (triggers retry, then fallback); delivering more is fine and
  /// the excess is truncated.
  #[instrument(level = "info", skip(self, req, prompts), fields(topic = %req.topic, count = req.count, %preferred))]
  pub async fn generate_batch(
    &self,
    req: &GenerationRequest,
    preferred: ProviderId,
    prompts: &Prompts,
  ) -> Result<BatchOutcome, EngineError> {
    let mut error_log: Vec<ProviderFailure> = Vec::new();

    for (idx, pid) in provider_order(preferred).into_iter().enumerate() {
      let Some(provider) = self.providers.get(&pid) else {
        warn!(target: "generation", provider = %pid, "Provider not configured; skipping");
        error_log.push(ProviderFailure {
          provider: pid,
          message: "provider not configured".into(),
          is_quota_error: false,
        });
        continue;
      };

      let attempt = self
        .retry
        .execute(move || {
          let provider = Arc::clone(provider);
          async move {
            let items = provider.generate_batch(req, prompts).await?;
            if items.len() < req.count {
              return Err(ProviderError::Malformed(format!(
                "expected {} items, got {}",
                req.count,
                items.len()
              )));
            }
            Ok(items)
          }
        })
        .await;

      match attempt {
        Ok(mut items) => {
          items.truncate(req.count);
          let fallback_used = idx > 0;
          info!(
            target: "generation",
            provider = %pid,
            fallback_used,
            items = items.len(),
            "Batch generated"
          );
          return Ok(BatchOutcome { items, provider_used: pid, fallback_used, error_log });
        }
        Err(e) => {
          error!(target: "generation", provider = %pid, error = %e, "Provider exhausted its retry budget");
          error_log.push(ProviderFailure {
            provider: pid,
            is_quota_error: e.is_quota(),
            message: e.to_string(),
          });
        }
      }
    }

    Err(terminal_error(error_log))
  }

  /// Single-item analogue of `generate_batch`, used by regeneration.
  #[instrument(level = "info", skip(self, req, avoid, prompts), fields(topic = %req.topic, %preferred, avoid = avoid.len()))]
  pub async fn generate_one(
    &self,
    req: &GenerationRequest,
    avoid: &[String],
    preferred: ProviderId,
    prompts: &Prompts,
  ) -> Result<SingleOutcome, EngineError> {
    let mut error_log: Vec<ProviderFailure> = Vec::new();

    for (idx, pid) in provider_order(preferred).into_iter().enumerate() {
      let Some(provider) = self.providers.get(&pid) else {
        error_log.push(ProviderFailure {
          provider: pid,
          message: "provider not configured".into(),
          is_quota_error: false,
        });
        continue;
      };

      let attempt = self
        .retry
        .execute(move || provider.generate_one(req, avoid, prompts))
        .await;

      match attempt {
        Ok(item) => {
          return Ok(SingleOutcome { item, provider_used: pid, fallback_used: idx > 0 });
        }
        Err(e) => {
          error!(target: "generation", provider = %pid, error = %e, "Provider exhausted its retry budget");
          error_log.push(ProviderFailure {
            provider: pid,
            is_quota_error: e.is_quota(),
            message: e.to_string(),
          });
        }
      }
    }

    Err(terminal_error(error_log))
  }
}

pub struct ImageOrchestrator {
  providers: HashMap<ProviderId, Arc<dyn ImageProvider>>,
  retry: RetryPolicy,
}

impl ImageOrchestrator {
  pub fn new(providers: Vec<Arc<dyn ImageProvider>>, retry: RetryPolicy) -> Self {
    let providers = providers.into_iter().map(|p| (p.id(), p)).collect();
    Self { providers, retry }
  }

  #[instrument(level = "info", skip(self, prompt), fields(prompt_len = prompt.len(), %preferred))]
  pub async fn generate_one(
    &self,
    prompt: &str,
    preferred: ProviderId,
  ) -> Result<ImageOutcome, EngineError> {
    let mut error_log: Vec<ProviderFailure> = Vec::new();

    for (idx, pid) in provider_order(preferred).into_iter().enumerate() {
      let Some(provider) = self.providers.get(&pid) else {
        error_log.push(ProviderFailure {
          provider: pid,
          message: "provider not configured".into(),
          is_quota_error: false,
        });
        continue;
      };

      match self.retry.execute(move || provider.generate_image(prompt)).await {
        Ok(bytes) => {
          let fallback_used = idx > 0;
          info!(target: "generation", provider = %pid, fallback_used, bytes = bytes.len(), "Image generated");
          return Ok(ImageOutcome { bytes, provider_used: pid, fallback_used });
        }
        Err(e) => {
          error!(target: "generation", provider = %pid, error = %e, "Image provider exhausted its retry budget");
          error_log.push(ProviderFailure {
            provider: pid,
            is_quota_error: e.is_quota(),
            message: e.to_string(),
          });
        }
      }
    }

    Err(terminal_error(error_log))
  }
}

/// Collapse per-provider terminal failures into the two caller-facing kinds.
fn terminal_error(error_log: Vec<ProviderFailure>) -> EngineError {
  if !error_log.is_empty() && error_log.iter().all(|f| f.is_quota_error) {
    EngineError::NoProvidersAvailable
  } else {
    EngineError::ProvidersFailed(error_log)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::Mutex;
  use std::time::Duration;

  use crate::domain::{Difficulty, ItemType};

  pub(crate) fn mcq(text: &str) -> GeneratedItem {
    GeneratedItem {
      item_type: ItemType::MultipleChoice,
      prompt_text: text.to_string(),
      options: Some(vec![
        "A) first".into(),
        "B) second".into(),
        "C) third".into(),
        "D) fourth".into(),
      ]),
      answer: "A".into(),
      explanation: Some("because".into()),
    }
  }

  pub(crate) fn request(count: usize) -> GenerationRequest {
    GenerationRequest {
      topic: "recursion".into(),
      difficulty: Difficulty::Medium,
      item_type: ItemType::MultipleChoice,
      count,
      context_seed: None,
    }
  }

  /// Scripted text provider: pops one result per call; exhausted scripts
  /// keep failing with a transient error.
  pub(crate) struct ScriptedText {
    pub id: ProviderId,
    pub batches: Mutex<VecDeque<Result<Vec<GeneratedItem>, ProviderError>>>,
    pub singles: Mutex<VecDeque<Result<GeneratedItem, ProviderError>>>,
  }

  impl ScriptedText {
    pub fn new(id: ProviderId) -> Self {
      Self { id, batches: Mutex::new(VecDeque::new()), singles: Mutex::new(VecDeque::new()) }
    }

    pub fn push_batch(&self, r: Result<Vec<GeneratedItem>, ProviderError>) {
      self.batches.lock().unwrap().push_back(r);
    }

    pub fn push_single(&self, r: Result<GeneratedItem, ProviderError>) {
      self.singles.lock().unwrap().push_back(r);
    }
  }

  #[async_trait]
  impl TextProvider for ScriptedText {
    fn id(&self) -> ProviderId {
      self.id
    }

    async fn generate_batch(
      &self,
      _req: &GenerationRequest,
      _prompts: &Prompts,
    ) -> Result<Vec<GeneratedItem>, ProviderError> {
      self
        .batches
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(ProviderError::Transient("script exhausted".into())))
    }

    async fn generate_one(
      &self,
      _req: &GenerationRequest,
      _avoid: &[String],
      _prompts: &Prompts,
    ) -> Result<GeneratedItem, ProviderError> {
      self
        .singles
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(ProviderError::Transient("script exhausted".into())))
    }
  }

  pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
  }

  fn orchestrator(a: ScriptedText, b: ScriptedText) -> TextOrchestrator {
    TextOrchestrator::new(vec![Arc::new(a), Arc::new(b)], fast_retry())
  }

  // Preferred fails on every attempt, secondary succeeds.
  #[tokio::test]
  async fn falls_back_to_secondary_in_order() {
    let a = ScriptedText::new(ProviderId::Gemini);
    let b = ScriptedText::new(ProviderId::OpenAi);
    b.push_batch(Ok(vec![mcq("q1"), mcq("q2")]));

    let out = orchestrator(a, b)
      .generate_batch(&request(2), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap();
    assert_eq!(out.provider_used, ProviderId::OpenAi);
    assert!(out.fallback_used);
    assert_eq!(out.items.len(), 2);
    assert_eq!(out.error_log.len(), 1);
  }

  // Scenario: preferred fails twice then succeeds within its own retry
  // budget; no fallback happens.
  #[tokio::test]
  async fn retry_success_on_preferred_is_not_a_fallback() {
    let a = ScriptedText::new(ProviderId::Gemini);
    a.push_batch(Err(ProviderError::Transient("timeout".into())));
    a.push_batch(Err(ProviderError::Transient("timeout".into())));
    a.push_batch(Ok(vec![mcq("q1"), mcq("q2"), mcq("q3")]));
    let b = ScriptedText::new(ProviderId::OpenAi);

    let out = orchestrator(a, b)
      .generate_batch(&request(3), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap();
    assert_eq!(out.provider_used, ProviderId::Gemini);
    assert!(!out.fallback_used);
    assert_eq!(out.items.len(), 3);
    for item in &out.items {
      let opts = item.options.as_ref().unwrap();
      assert_eq!(opts.len(), 4);
      assert!(["A", "B", "C", "D"].contains(&item.answer.as_str()));
    }
    assert!(out.error_log.is_empty());
  }

  // All-quota terminal errors vs mixed ones.
  #[tokio::test]
  async fn all_quota_failures_become_no_providers_available() {
    let a = ScriptedText::new(ProviderId::Gemini);
    let b = ScriptedText::new(ProviderId::OpenAi);
    for _ in 0..3 {
      a.push_batch(Err(ProviderError::Quota("quota exceeded".into())));
      b.push_batch(Err(ProviderError::Quota("insufficient_quota".into())));
    }

    let err = orchestrator(a, b)
      .generate_batch(&request(1), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::NoProvidersAvailable));
  }

  #[tokio::test]
  async fn mixed_failures_become_providers_failed() {
    let a = ScriptedText::new(ProviderId::Gemini);
    let b = ScriptedText::new(ProviderId::OpenAi);
    for _ in 0..3 {
      a.push_batch(Err(ProviderError::Quota("quota exceeded".into())));
      b.push_batch(Err(ProviderError::Transient("connection reset".into())));
    }

    let err = orchestrator(a, b)
      .generate_batch(&request(1), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap_err();
    match err {
      EngineError::ProvidersFailed(log) => {
        assert_eq!(log.len(), 2);
        assert!(log[0].is_quota_error);
        assert!(!log[1].is_quota_error);
      }
      other => panic!("expected ProvidersFailed, got {other:?}"),
    }
  }

  // Over-delivery is truncated, not failed.
  #[tokio::test]
  async fn excess_items_are_truncated() {
    let a = ScriptedText::new(ProviderId::Gemini);
    a.push_batch(Ok(vec![mcq("q1"), mcq("q2"), mcq("q3"), mcq("q4"), mcq("q5")]));
    let b = ScriptedText::new(ProviderId::OpenAi);

    let out = orchestrator(a, b)
      .generate_batch(&request(3), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap();
    assert_eq!(out.items.len(), 3);
    assert!(!out.fallback_used);
  }

  // Under-delivery is a failure for that provider and falls through.
  #[tokio::test]
  async fn under_delivery_triggers_fallback() {
    let a = ScriptedText::new(ProviderId::Gemini);
    for _ in 0..3 {
      a.push_batch(Ok(vec![mcq("only one")]));
    }
    let b = ScriptedText::new(ProviderId::OpenAi);
    b.push_batch(Ok(vec![mcq("q1"), mcq("q2")]));

    let out = orchestrator(a, b)
      .generate_batch(&request(2), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap();
    assert_eq!(out.provider_used, ProviderId::OpenAi);
    assert!(out.fallback_used);
    assert!(out.error_log[0].message.contains("expected 2 items"));
  }

  #[tokio::test]
  async fn missing_providers_fail_with_generic_taxonomy() {
    let orch = TextOrchestrator::new(vec![], fast_retry());
    let err = orch
      .generate_batch(&request(1), ProviderId::Gemini, &Prompts::default())
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::ProvidersFailed(log) if log.len() == 2));
  }
}
