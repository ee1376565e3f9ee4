//! Bounded retry with deterministic exponential backoff.
//!
//! Provider-agnostic and capability-agnostic: any fallible async call can be
//! wrapped. The delay schedule is `base_delay * 2^attempt_index` with no
//! jitter; deterministic scheduling keeps tests reproducible. Thundering
//! herd under concurrent retries is an accepted trade-off.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
  attempts: u32,
  base_delay: Duration,
}

impl RetryPolicy {
  /// `attempts` is the total number of calls, not the number of retries.
  pub fn new(attempts: u32, base_delay: Duration) -> Self {
    Self { attempts: attempts.max(1), base_delay }
  }

  /// Call `f` until it succeeds or the attempt budget is exhausted, sleeping
  /// between attempts. The last captured error is returned unchanged. The
  /// sleep suspends only the calling task.
  pub async fn execute<T, E, F, Fut>(&self, mut f: F) -> Result<T, E>
  where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let mut last_err: Option<E> = None;
    for attempt in 0..self.attempts {
      match f().await {
        Ok(v) => return Ok(v),
        Err(e) => {
          let remaining = self.attempts - attempt - 1;
          if remaining > 0 {
            let delay = self.base_delay * 2u32.pow(attempt);
            warn!(
              target: "generation",
              attempt = attempt + 1,
              remaining,
              delay_ms = delay.as_millis() as u64,
              error = %e,
              "Attempt failed; backing off"
            );
            tokio::time::sleep(delay).await;
          }
          last_err = Some(e);
        }
      }
    }
    // attempts >= 1, so at least one error was captured.
    Err(last_err.expect("retry loop ran at least once"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(1))
  }

  #[tokio::test]
  async fn succeeds_without_retrying() {
    let calls = AtomicU32::new(0);
    let out: Result<u32, String> = fast_policy(3)
      .execute(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(7) }
      })
      .await;
    assert_eq!(out.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn retries_then_succeeds() {
    let calls = AtomicU32::new(0);
    let out: Result<&str, String> = fast_policy(3)
      .execute(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n < 2 { Err(format!("boom {n}")) } else { Ok("ok") }
        }
      })
      .await;
    assert_eq!(out.unwrap(), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn exhausts_budget_and_returns_last_error() {
    let calls = AtomicU32::new(0);
    let out: Result<(), String> = fast_policy(3)
      .execute(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move { Err(format!("failure {n}")) }
      })
      .await;
    assert_eq!(out.unwrap_err(), "failure 2");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn zero_attempts_is_clamped_to_one() {
    let calls = AtomicU32::new(0);
    let out: Result<(), String> = fast_policy(0)
      .execute(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err("nope".to_string()) }
      })
      .await;
    assert!(out.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
