//! Top-level use-case pipelines wiring the engine together.
//!
//! Question path: orchestrator -> moderation loop (seen set seeded from the
//! target session) -> session persistence.
//! Cover path: rate limiter -> content cache -> image orchestrator ->
//! artifact + cache + usage log -> fresh quota snapshot.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::cache::GenerationCache;
use crate::config::{EngineConfig, Prompts};
use crate::dedup::{build_seen_set, extend_with_phrases, MAX_REGEN_EVENTS};
use crate::domain::{
  Difficulty, GeneratedItem, GenerationRequest, ItemType, ProviderId, RateStatus,
  RegenerationEvent, Session,
};
use crate::error::EngineError;
use crate::modloop::{accept_or_regenerate, regenerate_single, Regenerator};
use crate::moderation::{review, IssueKind};
use crate::orchestrator::{ImageOrchestrator, TextOrchestrator};
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::{ArtifactStore, Store};

pub const DEFAULT_PROVIDER: ProviderId = ProviderId::Gemini;

/// Rough per-image cost attributed in the usage log, by provider.
fn estimated_cost_usd(provider: ProviderId) -> f64 {
  match provider {
    ProviderId::Gemini => 0.03,
    ProviderId::OpenAi => 0.04,
  }
}

pub struct GenerationEngine {
  text: TextOrchestrator,
  images: ImageOrchestrator,
  store: Arc<dyn Store>,
  artifacts: Arc<dyn ArtifactStore>,
  cache: GenerationCache,
  limiter: RateLimiter,
  config: EngineConfig,
}

#[derive(Debug)]
pub struct BatchResult {
  pub items: Vec<GeneratedItem>,
  pub provider_used: ProviderId,
  pub fallback_used: bool,
}

#[derive(Debug)]
pub struct SessionResult {
  pub session: Session,
  pub provider_used: ProviderId,
  pub fallback_used: bool,
}

#[derive(Debug)]
pub struct RegenResult {
  pub item: GeneratedItem,
  pub provider_used: Option<ProviderId>,
  pub fallback_used: bool,
  pub forced_fallback: bool,
  pub attempts_used: u32,
}

#[derive(Debug)]
pub struct CoverResult {
  pub artifact_ref: String,
  pub provider_used: ProviderId,
  pub reused_from_cache: bool,
  pub rate_status: RateStatus,
}

impl GenerationEngine {
  pub fn new(
    text_providers: Vec<Arc<dyn crate::providers::TextProvider>>,
    image_providers: Vec<Arc<dyn crate::providers::ImageProvider>>,
    store: Arc<dyn Store>,
    artifacts: Arc<dyn ArtifactStore>,
    config: EngineConfig,
  ) -> Self {
    let retry = RetryPolicy::new(
      config.limits.retry_attempts,
      Duration::from_millis(config.limits.base_delay_ms),
    );
    let cache = GenerationCache::new(store.clone(), artifacts.clone(), config.limits.cache_ttl_hours);
    let limiter = RateLimiter::new(store.clone(), config.limits.daily_image_limit);
    Self {
      text: TextOrchestrator::new(text_providers, retry),
      images: ImageOrchestrator::new(image_providers, retry),
      store,
      artifacts,
      cache,
      limiter,
      config,
    }
  }

  fn prompts(&self) -> &Prompts {
    &self.config.prompts
  }

  // --- Question batch pipeline ---

  /// Create a session and fill its preview by generating each requested
  /// (type, count) pair, moderating every item against a shared seen set.
  #[instrument(level = "info", skip(self, counts), fields(%topic, ?difficulty, %preferred))]
  pub async fn create_session(
    &self,
    topic: &str,
    category: Option<String>,
    difficulty: Difficulty,
    counts: Vec<(ItemType, usize)>,
    preferred: ProviderId,
  ) -> Result<SessionResult, EngineError> {
    validate_counts(&counts, self.config.limits.max_questions)?;

    let mut session = Session {
      id: uuid::Uuid::new_v4().to_string(),
      topic: topic.to_string(),
      category,
      difficulty,
      counts: counts.clone(),
      latest_preview: Vec::new(),
      created_at: Utc::now(),
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut provider_used = preferred;
    let mut fallback_used = false;

    for (item_type, count) in counts.into_iter().filter(|(_, c)| *c > 0) {
      let req = GenerationRequest {
        topic: topic.to_string(),
        difficulty,
        item_type,
        count,
        context_seed: None,
      };
      let batch = self.generate_batch_moderated(&req, preferred, &mut seen).await?;
      provider_used = batch.provider_used;
      fallback_used = fallback_used || batch.fallback_used;
      session.latest_preview.extend(batch.items);
    }

    self.store.put_session(&session).await?;
    info!(
      target: "generation",
      session = %session.id,
      items = session.latest_preview.len(),
      provider = %provider_used,
      fallback_used,
      "Session created"
    );
    Ok(SessionResult { session, provider_used, fallback_used })
  }

  /// One orchestrated batch passed item-by-item through the moderation loop.
  async fn generate_batch_moderated(
    &self,
    req: &GenerationRequest,
    preferred: ProviderId,
    seen: &mut HashSet<String>,
  ) -> Result<BatchResult, EngineError> {
    let outcome = self.text.generate_batch(req, preferred, self.prompts()).await?;

    let regen = OrchestratorRegenerator::new(
      &self.text,
      req.topic.clone(),
      req.difficulty,
      preferred,
      self.prompts(),
    );

    let mut items = Vec::with_capacity(outcome.items.len());
    for raw in outcome.items {
      let accepted = accept_or_regenerate(raw, &req.topic, seen, &regen).await;
      items.push(accepted.item);
    }

    Ok(BatchResult {
      items,
      provider_used: outcome.provider_used,
      fallback_used: outcome.fallback_used,
    })
  }

  // --- Single-item regeneration pipeline ---

  /// Strict user-initiated regeneration for one item slot. The seen set is
  /// seeded from the session (items + recent regeneration history) when a
  /// session is given, otherwise from caller-supplied avoid phrases.
  #[instrument(level = "info", skip(self, base, avoid_phrases), fields(session = ?session_id, ?item_type, %preferred))]
  pub async fn regenerate_question(
    &self,
    session_id: Option<&str>,
    index: Option<usize>,
    topic: &str,
    difficulty: Difficulty,
    item_type: ItemType,
    base: Option<GeneratedItem>,
    avoid_phrases: &[String],
    preferred: ProviderId,
  ) -> Result<RegenResult, EngineError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut session = None;

    if let Some(id) = session_id {
      match self.store.get_session(id).await? {
        Some(s) => {
          let events = self.store.recent_regenerations(id, MAX_REGEN_EVENTS).await?;
          seen = build_seen_set(&s.latest_preview, &events);
          session = Some(s);
        }
        None => {
          warn!(target: "generation", session = %id, "Session not found for regeneration; proceeding without history");
        }
      }
    }
    extend_with_phrases(&mut seen, avoid_phrases.iter().map(String::as_str));

    let regen = OrchestratorRegenerator::new(
      &self.text,
      topic.to_string(),
      difficulty,
      preferred,
      self.prompts(),
    );
    let outcome = regenerate_single(item_type, topic, base.as_ref(), &mut seen, &regen).await;
    let provenance = regen.last_provenance();

    if let (Some(s), Some(index)) = (&session, index) {
      self
        .store
        .append_regeneration(RegenerationEvent {
          session_id: s.id.clone(),
          index,
          old_item: base,
          new_item: outcome.item.clone(),
          created_at: Utc::now(),
        })
        .await?;
    }

    Ok(RegenResult {
      item: outcome.item,
      provider_used: provenance.map(|(p, _)| p),
      fallback_used: provenance.map(|(_, f)| f).unwrap_or(false),
      forced_fallback: outcome.forced_fallback,
      attempts_used: outcome.attempts_used,
    })
  }

  /// Client-confirmed slot replacement; the final swap is always explicit.
  #[instrument(level = "info", skip(self, item), fields(%session_id, index))]
  pub async fn confirm_replace(
    &self,
    session_id: &str,
    index: usize,
    item: GeneratedItem,
  ) -> Result<(), EngineError> {
    let issues = review(&item);
    if issues.contains(&IssueKind::StructuralInvalid) {
      return Err(EngineError::InvalidRequest("question is structurally invalid".into()));
    }

    let mut session = self
      .store
      .get_session(session_id)
      .await?
      .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

    if index > session.latest_preview.len() {
      return Err(EngineError::InvalidRequest(format!(
        "index {} out of range (have {} items)",
        index,
        session.latest_preview.len()
      )));
    }
    if index == session.latest_preview.len() {
      session.latest_preview.push(item);
    } else {
      session.latest_preview[index] = item;
    }
    self.store.put_session(&session).await
  }

  pub async fn get_session(&self, id: &str) -> Result<Session, EngineError> {
    self
      .store
      .get_session(id)
      .await?
      .ok_or_else(|| EngineError::NotFound(format!("session {id}")))
  }

  // --- Cover image pipeline ---

  /// Quota gate, then cache, then providers. Cache hits are logged as
  /// zero-cost reuse and never consume quota.
  #[instrument(level = "info", skip(self, prompt), fields(%identity, %preferred, prompt_len = prompt.len()))]
  pub async fn generate_cover(
    &self,
    identity: &str,
    prompt: &str,
    preferred: ProviderId,
  ) -> Result<CoverResult, EngineError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
      return Err(EngineError::InvalidRequest("prompt must not be empty".into()));
    }

    // Pre-flight quota check: no paid call if the day's budget is gone.
    let status = self.limiter.status(identity, Some(preferred)).await?;
    if status.remaining == 0 {
      info!(target: "quota", %identity, provider = %preferred, "Daily image quota exhausted; refusing");
      return Err(EngineError::QuotaExceeded { used: status.used, limit: status.limit });
    }

    if let Some(entry) = self.cache.lookup(identity, prompt).await? {
      self.log_usage(identity, prompt, preferred, &entry.artifact_ref, true).await?;
      let rate_status = self.limiter.status(identity, Some(preferred)).await?;
      info!(target: "image_cache", %identity, artifact = %entry.artifact_ref, "Serving cover from cache");
      return Ok(CoverResult {
        artifact_ref: entry.artifact_ref,
        provider_used: preferred,
        reused_from_cache: true,
        rate_status,
      });
    }

    let styled = format!("{}{}", prompt, self.config.prompts.cover_style_suffix);
    let outcome = self.images.generate_one(&styled, preferred).await?;
    if outcome.bytes.is_empty() {
      return Err(EngineError::GenerationFailed("image provider returned an empty payload".into()));
    }

    let artifact_ref = self.artifacts.save(&outcome.bytes).await?;
    self.cache.store(identity, prompt, &artifact_ref).await?;
    // Cost goes to the provider that actually produced the image.
    self.log_usage(identity, prompt, outcome.provider_used, &artifact_ref, false).await?;

    let rate_status = self.limiter.status(identity, Some(preferred)).await?;
    Ok(CoverResult {
      artifact_ref,
      provider_used: outcome.provider_used,
      reused_from_cache: false,
      rate_status,
    })
  }

  pub async fn cover_quota(
    &self,
    identity: &str,
    provider: Option<ProviderId>,
  ) -> Result<RateStatus, EngineError> {
    self.limiter.status(identity, provider).await
  }

  async fn log_usage(
    &self,
    identity: &str,
    prompt: &str,
    provider: ProviderId,
    artifact_ref: &str,
    reused_from_cache: bool,
  ) -> Result<(), EngineError> {
    self
      .store
      .append_usage(crate::domain::UsageRecord {
        identity: identity.to_string(),
        prompt: prompt.to_string(),
        provider,
        artifact_ref: artifact_ref.to_string(),
        reused_from_cache,
        estimated_cost_usd: if reused_from_cache { 0.0 } else { estimated_cost_usd(provider) },
        created_at: Utc::now(),
      })
      .await
  }
}

fn validate_counts(counts: &[(ItemType, usize)], max: usize) -> Result<(), EngineError> {
  let mut total = 0;
  for (item_type, count) in counts {
    if *count > max {
      return Err(EngineError::InvalidRequest(format!(
        "count for {} must be 0..{}",
        item_type.as_str(),
        max
      )));
    }
    total += count;
  }
  if total == 0 {
    return Err(EngineError::InvalidRequest("total questions must be > 0".into()));
  }
  if total > max {
    return Err(EngineError::InvalidRequest(format!(
      "total questions ({total}) exceed max {max}"
    )));
  }
  Ok(())
}

/// Regenerator backed by the text orchestrator; records the provenance of
/// the last successful provider call for the response metadata.
struct OrchestratorRegenerator<'a> {
  orchestrator: &'a TextOrchestrator,
  topic: String,
  difficulty: Difficulty,
  preferred: ProviderId,
  prompts: &'a Prompts,
  last_provenance: Mutex<Option<(ProviderId, bool)>>,
}

impl<'a> OrchestratorRegenerator<'a> {
  fn new(
    orchestrator: &'a TextOrchestrator,
    topic: String,
    difficulty: Difficulty,
    preferred: ProviderId,
    prompts: &'a Prompts,
  ) -> Self {
    Self { orchestrator, topic, difficulty, preferred, prompts, last_provenance: Mutex::new(None) }
  }

  fn last_provenance(&self) -> Option<(ProviderId, bool)> {
    *self.last_provenance.lock().expect("provenance lock")
  }
}

#[async_trait]
impl Regenerator for OrchestratorRegenerator<'_> {
  async fn regenerate(
    &self,
    item_type: ItemType,
    base: Option<&GeneratedItem>,
    avoid: &[String],
  ) -> Result<GeneratedItem, EngineError> {
    let req = GenerationRequest {
      topic: self.topic.clone(),
      difficulty: self.difficulty,
      item_type,
      count: 1,
      context_seed: base.cloned(),
    };
    let outcome = self
      .orchestrator
      .generate_one(&req, avoid, self.preferred, self.prompts)
      .await?;
    *self.last_provenance.lock().expect("provenance lock") =
      Some((outcome.provider_used, outcome.fallback_used));
    Ok(outcome.item)
  }
}
