//! Per-query configuration with explicit, documented defaults.

use std::time::Duration;

/// Bounded retry with exponential backoff for failed query fetches.
///
/// Only [`crate::FetchError::is_retryable`] errors are retried, and
/// mutations are never retried regardless of policy, since a write must not be
/// double-submitted.
///
/// The default is no retries. Production deployments that want backoff opt
/// in with [`RetryPolicy::backoff`]; tests keep the default for determinism.
/// This is an explicit configuration choice, not something inferred from the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Additional attempts after the first failure.
  pub max_retries: u32,
  /// Delay before the first retry; doubles on each subsequent attempt.
  pub base_delay: Duration,
  /// Upper bound on the backoff delay.
  pub max_delay: Duration,
}

impl RetryPolicy {
  /// No retries: the first failure is final.
  pub fn none() -> Self {
    RetryPolicy {
      max_retries: 0,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }

  /// `max_retries` attempts with 1s, 2s, 4s, ... backoff capped at 30s.
  pub fn backoff(max_retries: u32) -> Self {
    RetryPolicy {
      max_retries,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }

  /// Delay before retry number `attempt` (zero-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
    exp.min(self.max_delay)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy::none()
  }
}

/// Options controlling freshness, eviction, and fetch behavior for a query.
///
/// Defaults: `stale_time` 0 (every read revalidates), `gc_time` 5 minutes,
/// no retries, no refetch on focus, enabled.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// How long a successful result stays fresh before background revalidation.
  pub stale_time: Duration,
  /// How long an unobserved entry is retained before eviction.
  pub gc_time: Duration,
  /// Retry policy for failed fetches.
  pub retry: RetryPolicy,
  /// Refetch stale data when the consumer regains focus.
  pub refetch_on_focus: bool,
  /// A disabled query never calls its producer.
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    QueryOptions {
      stale_time: Duration::ZERO,
      gc_time: Duration::from_secs(5 * 60),
      retry: RetryPolicy::none(),
      refetch_on_focus: false,
      enabled: true,
    }
  }
}

impl QueryOptions {
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_refetch_on_focus(mut self, refetch_on_focus: bool) -> Self {
    self.refetch_on_focus = refetch_on_focus;
    self
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::backoff(5);
    assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    assert_eq!(policy.delay_for(10), Duration::from_secs(30));
  }

  #[test]
  fn test_defaults() {
    let opts = QueryOptions::default();
    assert_eq!(opts.stale_time, Duration::ZERO);
    assert_eq!(opts.gc_time, Duration::from_secs(300));
    assert_eq!(opts.retry.max_retries, 0);
    assert!(!opts.refetch_on_focus);
    assert!(opts.enabled);
  }
}
