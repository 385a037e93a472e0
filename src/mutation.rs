//! Mutation execution: optimistic apply, exact rollback, settlement
//! invalidation.
//!
//! The protocol is two-phase: an optional optimistic patch lands in the
//! cache synchronously before the network write, backed by a snapshot of
//! every touched entry. On success the patch stays authoritative until the
//! settlement invalidation refetches; on failure the snapshot is restored
//! verbatim before the error reaches the caller. Mutations are never
//! retried, since a write must not be double-submitted.
//!
//! Mutations that carry optimistic patches are serialized per client
//! through an async gate, so two overlapping mutations cannot interleave
//! their snapshots: the second one snapshots only after the first has
//! settled and either committed or rolled back.
//!
//! # Example
//!
//! ```ignore
//! let updated: Project = Mutation::new(&client)
//!   .optimistic(QueryKey::detail("projects", "p1"), |old| {
//!     old.map(|mut v| {
//!       v["status"] = json!("active");
//!       v
//!     })
//!   })
//!   .invalidate_on_settle(QueryKey::lists("projects"))
//!   .run(move || {
//!     let api = api.clone();
//!     async move { api.patch("projects/p1", &body).await }
//!   })
//!   .await?;
//! ```

use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::key::QueryKey;
use crate::query::QueryClient;

type Patch = Box<dyn FnOnce(Option<Value>) -> Option<Value> + Send>;
type SuccessHook<R> = Box<dyn FnOnce(&R) + Send>;
type ErrorHook = Box<dyn FnOnce(&FetchError) + Send>;

/// Builder for one mutation run.
pub struct Mutation<R> {
  client: QueryClient,
  optimistic: Vec<(QueryKey, Patch)>,
  invalidate_on_settle: Vec<QueryKey>,
  on_success: Option<SuccessHook<R>>,
  on_error: Option<ErrorHook>,
}

impl<R> Mutation<R> {
  pub fn new(client: &QueryClient) -> Self {
    Mutation {
      client: client.clone(),
      optimistic: Vec::new(),
      invalidate_on_settle: Vec::new(),
      on_success: None,
      on_error: None,
    }
  }

  /// Apply `patch` to `key` synchronously before the network write.
  /// The entry's pre-mutation state is snapshotted for rollback.
  pub fn optimistic<F>(mut self, key: QueryKey, patch: F) -> Self
  where
    F: FnOnce(Option<Value>) -> Option<Value> + Send + 'static,
  {
    self.optimistic.push((key, Box::new(patch)));
    self
  }

  /// Mark `prefix` stale once the mutation settles, success or failure,
  /// triggering lazy revalidation of everything the write may have changed.
  pub fn invalidate_on_settle(mut self, prefix: QueryKey) -> Self {
    self.invalidate_on_settle.push(prefix);
    self
  }

  /// Called with the producer's result after the cache has been reconciled.
  pub fn on_success<F>(mut self, hook: F) -> Self
  where
    F: FnOnce(&R) + Send + 'static,
  {
    self.on_success = Some(Box::new(hook));
    self
  }

  /// Called with the producer's error after rollback has completed.
  pub fn on_error<F>(mut self, hook: F) -> Self
  where
    F: FnOnce(&FetchError) + Send + 'static,
  {
    self.on_error = Some(Box::new(hook));
    self
  }

  /// Run the mutation: optimistic apply, one producer invocation, then
  /// commit or compensate.
  pub async fn run<F, Fut>(mut self, producer: F) -> Result<R, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, FetchError>>,
  {
    let store = self.client.store().clone();
    let defaults = self.client.defaults().clone();

    // Serialize optimistic mutations; see module docs. Plain mutations
    // don't contend for the gate.
    let _gate = if self.optimistic.is_empty() {
      None
    } else {
      Some(self.client.mutation_gate().lock().await)
    };

    let snapshot = if self.optimistic.is_empty() {
      None
    } else {
      let affected: Vec<QueryKey> = self.optimistic.iter().map(|(k, _)| k.clone()).collect();
      let snapshot = store.take_snapshot(&affected);
      for (key, patch) in self.optimistic.drain(..) {
        debug!(key = %key, "applying optimistic patch");
        store.update(&key, patch, defaults.stale_time, defaults.gc_time);
      }
      Some(snapshot)
    };

    match producer().await {
      Ok(result) => {
        if let Some(hook) = self.on_success.take() {
          hook(&result);
        }
        for prefix in &self.invalidate_on_settle {
          store.invalidate(prefix);
        }
        Ok(result)
      }
      Err(err) => {
        // Rollback is guaranteed to finish before the error is surfaced,
        // to the hook and to the caller alike.
        if let Some(snapshot) = snapshot {
          warn!(error = %err, "mutation failed; rolling back optimistic patches");
          store.restore_snapshot(snapshot);
        }
        if let Some(hook) = self.on_error.take() {
          hook(&err);
        }
        for prefix in &self.invalidate_on_settle {
          store.invalidate(prefix);
        }
        Err(err)
      }
    }
  }
}
