//! Error taxonomy for the generation engine.
//!
//! Two layers:
//! - `ProviderError`: what a single provider call can do to us. Carries the
//!   transient/quota/malformed classification the orchestrator needs.
//! - `EngineError`: what the engine surfaces to its callers. Terminal
//!   provider exhaustion collapses into exactly two kinds so the HTTP layer
//!   can pick a 503-style vs 500-style message without reading provider text.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
  /// Network/timeout/5xx. Retried locally, then drives fallback.
  #[error("provider transient error: {0}")]
  Transient(String),

  /// Billing/rate-limit signatures on the provider side.
  #[error("provider quota error: {0}")]
  Quota(String),

  /// Schema or count mismatch in an otherwise successful response.
  /// Treated like a transient error for fallback purposes.
  #[error("provider returned malformed output: {0}")]
  Malformed(String),
}

impl ProviderError {
  pub fn is_quota(&self) -> bool {
    matches!(self, ProviderError::Quota(_))
  }

  /// Classify a raw provider failure message. Quota/billing problems are
  /// detected with a fixed keyword table; everything else is transient.
  /// Brittle on purpose: flag to the product owner if providers change
  /// their error formats.
  pub fn classify(message: impl Into<String>) -> ProviderError {
    let message = message.into();
    if is_quota_message(&message) {
      ProviderError::Quota(message)
    } else {
      ProviderError::Transient(message)
    }
  }
}

const QUOTA_KEYWORDS: &[&str] = &[
  "quota",
  "insufficient",
  "billing",
  "payment required",
  "credit",
  "429",
  "402",
];

pub fn is_quota_message(message: &str) -> bool {
  let m = message.to_lowercase();
  QUOTA_KEYWORDS.iter().any(|k| m.contains(k))
}

/// One terminal failure per provider, kept for the error log the
/// orchestrator hands back.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
  pub provider: crate::domain::ProviderId,
  pub message: String,
  pub is_quota_error: bool,
}

#[derive(Error, Debug)]
pub enum EngineError {
  /// Every provider failed and every terminal error was quota/billing.
  /// Surfaces as "service temporarily saturated, try later" (503).
  #[error("no generation providers available (all out of credits)")]
  NoProvidersAvailable,

  /// Every provider failed with at least one non-quota error (500).
  #[error("all generation providers failed")]
  ProvidersFailed(Vec<ProviderFailure>),

  /// Our own daily cap, checked before any paid call. Distinct from a
  /// provider-side quota error.
  #[error("daily generation quota exceeded ({used}/{limit})")]
  QuotaExceeded { used: u32, limit: u32 },

  /// Anything else terminal on the image path (artifact store write, etc).
  #[error("generation failed: {0}")]
  GenerationFailed(String),

  #[error("storage error: {0}")]
  Storage(String),

  /// Request rejected before any provider call (400).
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("not found: {0}")]
  NotFound(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  // Fixed classifier table, matching the quota-vs-generic split the
  // orchestrator relies on.
  #[test]
  fn quota_keyword_table() {
    let quota = [
      "Quota exceeded for requests",
      "insufficient_quota",
      "Billing hard limit reached",
      "HTTP 429: too many requests",
      "Payment Required",
      "You have run out of credits",
      "HTTP 402",
    ];
    for m in quota {
      assert!(ProviderError::classify(m).is_quota(), "expected quota: {m}");
    }
    let transient = [
      "connection reset by peer",
      "HTTP 500: internal error",
      "timed out after 20s",
      "dns lookup failed",
    ];
    for m in transient {
      assert!(!ProviderError::classify(m).is_quota(), "expected transient: {m}");
    }
  }
}
