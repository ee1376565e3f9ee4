//! Provider credential pools with round-robin rotation.
//!
//! Multiple keys can be configured per provider (comma-separated env var);
//! rotation is a pure function of the pool plus an atomic cursor, so there
//! is no module-level mutable state and the pool is shareable across tasks.
//! Keys are only ever logged masked.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

#[derive(Debug)]
pub struct CredentialPool {
  keys: Vec<String>,
  cursor: AtomicUsize,
}

impl CredentialPool {
  pub fn new(keys: Vec<String>) -> Self {
    Self { keys, cursor: AtomicUsize::new(0) }
  }

  /// Read keys from `{var}S` (comma-separated list) falling back to the
  /// single `{var}` for backwards compatibility. Returns None if neither
  /// yields a non-empty key.
  pub fn from_env(var: &str) -> Option<Self> {
    let list_var = format!("{}S", var);
    let keys: Vec<String> = match std::env::var(&list_var) {
      Ok(raw) => raw
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect(),
      Err(_) => std::env::var(var)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .into_iter()
        .collect(),
    };

    if keys.is_empty() {
      warn!(target: "quizsmith_backend", %var, "No API key(s) configured");
      return None;
    }

    let masked: Vec<String> = keys.iter().map(|k| mask_key(k)).collect();
    info!(
      target: "quizsmith_backend",
      %var,
      count = keys.len(),
      keys = %masked.join(", "),
      "Loaded credential pool"
    );
    Some(Self::new(keys))
  }

  /// Next key in round-robin order. Pure rotation: the cursor advances by
  /// one per call regardless of which task calls.
  pub fn next_key(&self) -> &str {
    let i = self.cursor.fetch_add(1, Ordering::Relaxed);
    &self.keys[i % self.keys.len()]
  }
}

/// Mask a key for logging, e.g. "AIzaSyAm...rukk".
fn mask_key(key: &str) -> String {
  let k = key.trim();
  if k.is_empty() {
    return "<empty>".into();
  }
  if k.len() <= 10 {
    return format!("{}...", &k[..k.len().min(3)]);
  }
  format!("{}...{}", &k[..8], &k[k.len() - 4..])
}
