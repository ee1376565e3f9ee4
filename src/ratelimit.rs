//! Per-identity, per-provider daily quota over the usage log.
//!
//! "Used today" is the count of non-cache-reused usage records since UTC
//! midnight. Counters are never decremented; the window rolls over as the
//! day boundary moves. The pipeline checks `remaining > 0` before any paid
//! provider call.

use std::sync::Arc;

use chrono::{Datelike, TimeZone, Utc};
use tracing::{debug, instrument};

use crate::domain::{ProviderId, RateStatus};
use crate::error::EngineError;
use crate::store::Store;

pub struct RateLimiter {
  store: Arc<dyn Store>,
  limit: u32,
}

impl RateLimiter {
  pub fn new(store: Arc<dyn Store>, limit: u32) -> Self {
    Self { store, limit }
  }

  /// Quota snapshot for the current UTC calendar day.
  #[instrument(level = "debug", skip(self), fields(%identity, provider = ?provider))]
  pub async fn status(
    &self,
    identity: &str,
    provider: Option<ProviderId>,
  ) -> Result<RateStatus, EngineError> {
    let midnight = start_of_utc_day();
    let used = self.store.count_usage_since(identity, provider, midnight).await?;
    let remaining = self.limit.saturating_sub(used);
    debug!(target: "quota", %identity, used, remaining, limit = self.limit, "Quota status");
    Ok(RateStatus { used, remaining, limit: self.limit })
  }
}

fn start_of_utc_day() -> chrono::DateTime<Utc> {
  let now = Utc::now();
  Utc
    .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
    .single()
    .expect("UTC midnight is always valid")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::UsageRecord;
  use crate::store::MemoryStore;

  async fn log_usage(store: &MemoryStore, identity: &str, provider: ProviderId, reused: bool) {
    store
      .append_usage(UsageRecord {
        identity: identity.into(),
        prompt: "p".into(),
        provider,
        artifact_ref: String::new(),
        reused_from_cache: reused,
        estimated_cost_usd: if reused { 0.0 } else { 0.04 },
        created_at: Utc::now(),
      })
      .await
      .unwrap();
  }

  // Ten paid generations exhaust the daily provider quota.
  #[tokio::test]
  async fn ten_paid_generations_exhaust_quota() {
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(store.clone(), 10);

    for _ in 0..10 {
      log_usage(&store, "u1", ProviderId::Gemini, false).await;
    }

    let status = limiter.status("u1", Some(ProviderId::Gemini)).await.unwrap();
    assert_eq!(status, RateStatus { used: 10, remaining: 0, limit: 10 });

    // Other provider and other identity remain unaffected.
    let other = limiter.status("u1", Some(ProviderId::OpenAi)).await.unwrap();
    assert_eq!(other.remaining, 10);
    let u2 = limiter.status("u2", Some(ProviderId::Gemini)).await.unwrap();
    assert_eq!(u2.used, 0);
  }

  // Cache reuses do not consume quota.
  #[tokio::test]
  async fn cache_reuse_does_not_count() {
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(store.clone(), 10);

    log_usage(&store, "u1", ProviderId::Gemini, false).await;
    let before = limiter.status("u1", Some(ProviderId::Gemini)).await.unwrap();

    log_usage(&store, "u1", ProviderId::Gemini, true).await;
    let after = limiter.status("u1", Some(ProviderId::Gemini)).await.unwrap();

    assert_eq!(before.used, after.used);
    assert_eq!(after.used, 1);
  }

  #[tokio::test]
  async fn usage_from_previous_days_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(store.clone(), 10);

    store
      .append_usage(UsageRecord {
        identity: "u1".into(),
        prompt: "p".into(),
        provider: ProviderId::Gemini,
        artifact_ref: String::new(),
        reused_from_cache: false,
        estimated_cost_usd: 0.04,
        created_at: Utc::now() - chrono::Duration::days(1),
      })
      .await
      .unwrap();

    let status = limiter.status("u1", None).await.unwrap();
    assert_eq!(status.used, 0);
    assert_eq!(status.remaining, 10);
  }

  #[tokio::test]
  async fn remaining_never_goes_negative() {
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(store.clone(), 2);
    for _ in 0..5 {
      log_usage(&store, "u1", ProviderId::Gemini, false).await;
    }
    let status = limiter.status("u1", None).await.unwrap();
    assert_eq!(status.used, 5);
    assert_eq!(status.remaining, 0);
  }
}
