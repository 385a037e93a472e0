//! In-memory keyed cache store: entries, subscriptions, snapshots, eviction.
//!
//! The store is the single shared state of the cache layer. All reads and
//! writes go through its API; nothing here touches the network. Side effects
//! are limited to notification fan-out, and listeners are invoked after the
//! store lock is released, within the same task step as the triggering
//! change.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{FetchError, StoreError};
use crate::key::QueryKey;

/// A fetch future shared by every caller waiting on the same key.
///
/// At most one of these exists per key at any moment; concurrent callers
/// clone and await the same one, which is what collapses N logical requests
/// into one network call.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// No fetch has run for this key.
  Idle,
  /// First fetch in flight, no data yet.
  Pending,
  /// Last settled fetch succeeded; `data` is present.
  Success,
  /// Last settled fetch failed with no prior success; `error` is present.
  Error,
}

/// Immutable view of an entry, handed to subscribers and observers.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
  pub status: QueryStatus,
  pub data: Option<Value>,
  pub error: Option<FetchError>,
  pub fetched_at: Option<DateTime<Utc>>,
  /// True when the data needs background revalidation on next access.
  pub is_stale: bool,
  /// True while a fetch for this key is in flight.
  pub is_fetching: bool,
}

/// Saved pre-mutation state for a set of keys, restored verbatim on failure.
///
/// `None` means the entry did not exist when the snapshot was taken, so
/// restoring removes whatever an optimistic patch created.
pub struct OptimisticSnapshot {
  entries: Vec<(QueryKey, Option<EntryState>)>,
}

#[derive(Debug, Clone)]
struct EntryState {
  status: QueryStatus,
  data: Option<Value>,
  error: Option<FetchError>,
  fetched_at: Option<DateTime<Utc>>,
  fresh_until: Option<Instant>,
}

struct CacheEntry {
  state: EntryState,
  gc_at: Option<Instant>,
  ref_count: usize,
  in_flight: Option<SharedFetch>,
}

impl CacheEntry {
  fn new() -> Self {
    CacheEntry {
      state: EntryState {
        status: QueryStatus::Idle,
        data: None,
        error: None,
        fetched_at: None,
        fresh_until: None,
      },
      gc_at: None,
      ref_count: 0,
      in_flight: None,
    }
  }

  fn is_fresh(&self, now: Instant) -> bool {
    self.state.status == QueryStatus::Success
      && self.state.fresh_until.map(|t| now < t).unwrap_or(false)
  }

  fn snapshot(&self, now: Instant) -> EntrySnapshot {
    EntrySnapshot {
      status: self.state.status,
      data: self.state.data.clone(),
      error: self.state.error.clone(),
      fetched_at: self.state.fetched_at,
      is_stale: self.state.data.is_some() && !self.is_fresh(now),
      is_fetching: self.in_flight.is_some(),
    }
  }
}

type Listener = Arc<dyn Fn(&EntrySnapshot) + Send + Sync>;

struct StoreInner {
  entries: HashMap<QueryKey, CacheEntry>,
  listeners: HashMap<QueryKey, Vec<(u64, Listener)>>,
  next_listener_id: u64,
}

/// Result of a combined freshness check and fetch installation.
///
/// Computed under a single lock so that two concurrent callers can never
/// both install a fetch for the same key.
pub(crate) enum Lookup {
  /// Entry is fresh; serve it, no network.
  Fresh(Value),
  /// Stale data with a fetch already in flight; serve the stale data.
  StaleServe(Value),
  /// Fetch in flight and nothing cached yet; wait for it.
  Wait(SharedFetch),
  /// Stale data; a new fetch was installed. Serve the data, drive the fetch
  /// in the background.
  Revalidate { data: Value, fetch: SharedFetch },
  /// Nothing cached; a new fetch was installed and must be awaited.
  Started(SharedFetch),
}

/// Explicitly constructed, shareable cache store.
///
/// Clones share the same underlying state (the handle is an `Arc` inside),
/// so a client, its observers, and background tasks all see one cache.
/// Tests construct isolated stores instead of relying on process-wide state.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<Mutex<StoreInner>>,
}

impl CacheStore {
  pub fn new() -> Self {
    CacheStore {
      inner: Arc::new(Mutex::new(StoreInner {
        entries: HashMap::new(),
        listeners: HashMap::new(),
        next_listener_id: 0,
      })),
    }
  }

  /// Snapshot of the entry for `key`, exact structural match only.
  pub fn get(&self, key: &QueryKey) -> Option<EntrySnapshot> {
    let inner = self.lock();
    let now = Instant::now();
    inner.entries.get(key).map(|e| e.snapshot(now))
  }

  /// Number of live entries. Mainly useful for eviction accounting.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Write `value` for `key` directly, marking it a fresh success.
  ///
  /// This is the merge path for mutation results and optimistic writes; it
  /// does not interact with any in-flight fetch.
  pub fn set_data(&self, key: &QueryKey, value: Value, stale_time: Duration, gc_time: Duration) {
    let notification = {
      let mut inner = self.lock();
      let now = Instant::now();
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
      entry.state.status = QueryStatus::Success;
      entry.state.data = Some(value);
      entry.state.error = None;
      entry.state.fetched_at = Some(Utc::now());
      entry.state.fresh_until = Some(now + stale_time);
      if entry.ref_count == 0 {
        entry.gc_at = Some(now + gc_time);
      }
      let snapshot = entry.snapshot(now);
      Self::listeners_for(&inner, key, snapshot)
    };
    Self::fan_out(notification);
  }

  /// Apply a pure transform to the cached value for `key`, creating or
  /// clearing the entry as the transform dictates. Used for optimistic
  /// patches.
  pub fn update<F>(&self, key: &QueryKey, f: F, stale_time: Duration, gc_time: Duration)
  where
    F: FnOnce(Option<Value>) -> Option<Value>,
  {
    let notification = {
      let mut inner = self.lock();
      let now = Instant::now();
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
      match f(entry.state.data.take()) {
        Some(value) => {
          entry.state.status = QueryStatus::Success;
          entry.state.data = Some(value);
          entry.state.error = None;
          entry.state.fetched_at = Some(Utc::now());
          entry.state.fresh_until = Some(now + stale_time);
        }
        None => {
          entry.state.status = QueryStatus::Idle;
          entry.state.data = None;
          entry.state.fresh_until = None;
        }
      }
      if entry.ref_count == 0 {
        entry.gc_at = Some(now + gc_time);
      }
      let snapshot = entry.snapshot(now);
      Self::listeners_for(&inner, key, snapshot)
    };
    Self::fan_out(notification);
  }

  /// Mark every entry whose key starts with `prefix` as stale.
  ///
  /// Data is kept; the next read of an invalidated key serves the old value
  /// synchronously and triggers a background refetch. Returns the number of
  /// entries touched.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let notifications = {
      let mut inner = self.lock();
      let now = Instant::now();
      let keys: Vec<QueryKey> = inner
        .entries
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect();
      let mut out = Vec::with_capacity(keys.len());
      for key in keys {
        if let Some(entry) = inner.entries.get_mut(&key) {
          entry.state.fresh_until = None;
          let snapshot = entry.snapshot(now);
          out.push(Self::listeners_for(&inner, &key, snapshot));
        }
      }
      out
    };
    let count = notifications.len();
    debug!(prefix = %prefix, count, "invalidated cache entries");
    for notification in notifications {
      Self::fan_out(notification);
    }
    count
  }

  /// Remove the entry for `key` immediately.
  ///
  /// Fails while a fetch is in flight: waiters hold clones of the shared
  /// future and the settlement still needs an entry to land in.
  pub fn evict(&self, key: &QueryKey) -> Result<bool, StoreError> {
    let mut inner = self.lock();
    match inner.entries.get(key) {
      None => Ok(false),
      Some(entry) if entry.in_flight.is_some() => Err(StoreError::FetchInFlight {
        key: key.to_string(),
      }),
      Some(_) => {
        inner.entries.remove(key);
        Ok(true)
      }
    }
  }

  /// Register a listener for every state transition of `key`'s entry.
  /// Dropping the returned guard unsubscribes.
  pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
  where
    F: Fn(&EntrySnapshot) + Send + Sync + 'static,
  {
    let mut inner = self.lock();
    let id = inner.next_listener_id;
    inner.next_listener_id += 1;
    inner
      .listeners
      .entry(key.clone())
      .or_default()
      .push((id, Arc::new(listener)));
    Subscription {
      inner: Arc::clone(&self.inner),
      key: key.clone(),
      id,
    }
  }

  /// Record an active consumer of `key`, deferring eviction.
  pub fn retain(&self, key: &QueryKey) {
    let mut inner = self.lock();
    let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
    entry.ref_count += 1;
    entry.gc_at = None;
  }

  /// Drop an active consumer of `key`. When the last one goes away the
  /// entry becomes eligible for eviction after `gc_time`.
  pub fn release(&self, key: &QueryKey, gc_time: Duration) {
    let mut inner = self.lock();
    if let Some(entry) = inner.entries.get_mut(key) {
      entry.ref_count = entry.ref_count.saturating_sub(1);
      if entry.ref_count == 0 {
        entry.gc_at = Some(Instant::now() + gc_time);
      }
    }
  }

  /// Evict every unobserved entry whose GC deadline has passed. Entries
  /// with a fetch in flight are skipped. Returns the number evicted.
  pub fn collect_garbage(&self) -> usize {
    let mut inner = self.lock();
    let now = Instant::now();
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| {
      let expired = entry.ref_count == 0
        && entry.in_flight.is_none()
        && entry.gc_at.map(|t| t <= now).unwrap_or(false);
      !expired
    });
    let evicted = before - inner.entries.len();
    if evicted > 0 {
      debug!(evicted, "garbage-collected cache entries");
    }
    evicted
  }

  /// Save the current state of every key in `keys` for later rollback.
  pub fn take_snapshot(&self, keys: &[QueryKey]) -> OptimisticSnapshot {
    let inner = self.lock();
    OptimisticSnapshot {
      entries: keys
        .iter()
        .map(|key| {
          let state = inner.entries.get(key).map(|e| e.state.clone());
          (key.clone(), state)
        })
        .collect(),
    }
  }

  /// Restore every snapshotted entry verbatim, in one locked step.
  ///
  /// All-or-nothing: an entry's saved state comes back exactly, and entries
  /// that did not exist at snapshot time are removed
  /// again. Entries that have picked up a fetch or a consumer in the
  /// meantime are reset in place instead of removed.
  pub fn restore_snapshot(&self, snapshot: OptimisticSnapshot) {
    let notifications = {
      let mut inner = self.lock();
      let now = Instant::now();
      let mut out = Vec::with_capacity(snapshot.entries.len());
      for (key, saved) in snapshot.entries {
        match saved {
          Some(state) => {
            let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
            entry.state = state;
            let snap = entry.snapshot(now);
            out.push(Self::listeners_for(&inner, &key, snap));
          }
          None => {
            let keep = inner
              .entries
              .get(&key)
              .map(|e| e.ref_count > 0 || e.in_flight.is_some())
              .unwrap_or(false);
            if keep {
              if let Some(entry) = inner.entries.get_mut(&key) {
                entry.state = CacheEntry::new().state;
                let snap = entry.snapshot(now);
                out.push(Self::listeners_for(&inner, &key, snap));
              }
            } else {
              inner.entries.remove(&key);
            }
          }
        }
      }
      out
    };
    debug!("restored optimistic snapshot");
    for notification in notifications {
      Self::fan_out(notification);
    }
  }

  /// Combined freshness check and fetch installation, under one lock.
  ///
  /// `build` is only called when a new fetch must be installed; the future
  /// it returns is stored as the entry's single in-flight fetch. With
  /// `surface` false (the prefetch path) the entry keeps its current
  /// status: no `Pending` transition reaches subscribers.
  pub(crate) fn begin_or_attach<F>(&self, key: &QueryKey, surface: bool, build: F) -> Lookup
  where
    F: FnOnce() -> SharedFetch,
  {
    let (lookup, notification) = {
      let mut inner = self.lock();
      let now = Instant::now();
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);

      if entry.is_fresh(now) {
        // Unwrap is safe: Success implies data is present.
        let data = entry.state.data.clone().expect("success entry without data");
        (Lookup::Fresh(data), None)
      } else if let Some(fetch) = entry.in_flight.clone() {
        match entry.state.data.clone() {
          Some(data) => (Lookup::StaleServe(data), None),
          None => (Lookup::Wait(fetch), None),
        }
      } else {
        let fetch = build();
        entry.in_flight = Some(fetch.clone());
        match entry.state.data.clone() {
          Some(data) => (Lookup::Revalidate { data, fetch }, None),
          None if surface => {
            entry.state.status = QueryStatus::Pending;
            entry.state.error = None;
            let snapshot = entry.snapshot(now);
            (
              Lookup::Started(fetch),
              Some(Self::listeners_for(&inner, key, snapshot)),
            )
          }
          None => (Lookup::Started(fetch), None),
        }
      }
    };
    if let Some(notification) = notification {
      Self::fan_out(notification);
    }
    lookup
  }

  /// Settle the in-flight fetch for `key` and notify subscribers.
  ///
  /// A background-refetch failure on an entry that already has data keeps
  /// the old data visible, so there is no flicker to an error state. With
  /// `surface_error` false (the prefetch path) a failure leaves the entry
  /// state untouched and emits no notification at all.
  pub(crate) fn complete_fetch(
    &self,
    key: &QueryKey,
    result: &Result<Value, FetchError>,
    stale_time: Duration,
    gc_time: Duration,
    surface_error: bool,
  ) {
    let notification = {
      let mut inner = self.lock();
      let now = Instant::now();
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
      entry.in_flight = None;

      match result {
        Ok(value) => {
          entry.state.status = QueryStatus::Success;
          entry.state.data = Some(value.clone());
          entry.state.error = None;
          entry.state.fetched_at = Some(Utc::now());
          entry.state.fresh_until = Some(now + stale_time);
        }
        Err(err) if !surface_error => {
          debug!(key = %key, error = %err, "prefetch failed; discarding");
          if entry.ref_count == 0 {
            entry.gc_at = Some(now + gc_time);
          }
          return;
        }
        Err(err) => {
          if entry.state.data.is_some() {
            // Stale-while-revalidate: keep serving the last success.
            warn!(key = %key, error = %err, "background refetch failed; keeping stale data");
            entry.state.error = Some(err.clone());
          } else {
            entry.state.status = QueryStatus::Error;
            entry.state.error = Some(err.clone());
          }
        }
      }

      if entry.ref_count == 0 {
        entry.gc_at = Some(now + gc_time);
      }
      let snapshot = entry.snapshot(now);
      Self::listeners_for(&inner, key, snapshot)
    };
    Self::fan_out(notification);
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
    // Listener panics are the only poison source; propagating them is fine.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn listeners_for(
    inner: &StoreInner,
    key: &QueryKey,
    snapshot: EntrySnapshot,
  ) -> (Vec<Listener>, EntrySnapshot) {
    let listeners = inner
      .listeners
      .get(key)
      .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
      .unwrap_or_default();
    (listeners, snapshot)
  }

  /// Invoke listeners outside the store lock so they can re-enter the store.
  fn fan_out((listeners, snapshot): (Vec<Listener>, EntrySnapshot)) {
    for listener in listeners {
      listener(&snapshot);
    }
  }
}

impl Default for CacheStore {
  fn default() -> Self {
    CacheStore::new()
  }
}

/// Active subscription to one key's transitions; Drop unsubscribes.
pub struct Subscription {
  inner: Arc<Mutex<StoreInner>>,
  key: QueryKey,
  id: u64,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(listeners) = inner.listeners.get_mut(&self.key) {
      listeners.retain(|(id, _)| *id != self.id);
      if listeners.is_empty() {
        inner.listeners.remove(&self.key);
      }
    }
  }
}
