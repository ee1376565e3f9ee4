//! Content-addressed generation cache (image path).
//!
//! Keyed by (identity, sha256 of the normalized prompt) with a 24h TTL.
//! Lookups verify that the referenced artifact still exists in the backing
//! store; a stale row whose artifact was removed reads as a miss. A fresh
//! store always replaces the older entry for the same key.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::domain::CacheEntry;
use crate::error::EngineError;
use crate::store::{ArtifactStore, Store};
use crate::util::normalize_prompt;

pub struct GenerationCache {
  store: Arc<dyn Store>,
  artifacts: Arc<dyn ArtifactStore>,
  ttl_hours: i64,
}

impl GenerationCache {
  pub fn new(store: Arc<dyn Store>, artifacts: Arc<dyn ArtifactStore>, ttl_hours: i64) -> Self {
    Self { store, artifacts, ttl_hours }
  }

  pub fn prompt_hash(prompt: &str) -> String {
    let normalized = normalize_prompt(prompt);
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{:x}", digest)
  }

  /// Newest non-expired entry for (identity, prompt), or None. Expiry and
  /// missing artifacts both read as misses.
  #[instrument(level = "debug", skip(self, prompt), fields(%identity))]
  pub async fn lookup(&self, identity: &str, prompt: &str) -> Result<Option<CacheEntry>, EngineError> {
    let hash = Self::prompt_hash(prompt);
    let Some(entry) = self.store.newest_cache_entry(identity, &hash).await? else {
      debug!(target: "image_cache", %identity, "Cache miss (no entry)");
      return Ok(None);
    };
    if entry.expires_at <= Utc::now() {
      debug!(target: "image_cache", %identity, "Cache miss (expired)");
      return Ok(None);
    }
    if !self.artifacts.exists(&entry.artifact_ref).await? {
      info!(target: "image_cache", %identity, artifact = %entry.artifact_ref, "Cache row is stale (artifact gone); treating as miss");
      return Ok(None);
    }
    debug!(target: "image_cache", %identity, artifact = %entry.artifact_ref, "Cache hit");
    Ok(Some(entry))
  }

  /// Upsert the (identity, prompt_hash) entry with a fresh TTL.
  #[instrument(level = "debug", skip(self, prompt, artifact_ref), fields(%identity))]
  pub async fn store(
    &self,
    identity: &str,
    prompt: &str,
    artifact_ref: &str,
  ) -> Result<CacheEntry, EngineError> {
    let now = Utc::now();
    let entry = CacheEntry {
      identity: identity.to_string(),
      prompt: prompt.to_string(),
      prompt_hash: Self::prompt_hash(prompt),
      artifact_ref: artifact_ref.to_string(),
      created_at: now,
      expires_at: now + Duration::hours(self.ttl_hours),
    };
    self.store.upsert_cache_entry(entry.clone()).await?;
    info!(target: "image_cache", %identity, artifact = %artifact_ref, "Cache entry stored");
    Ok(entry)
  }
}
