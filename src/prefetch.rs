//! Cache warm-up from UI-level signals: hover, navigation, viewport
//! visibility, and periodic background sync.
//!
//! Every trigger routes through the prefetch path of [`QueryClient`], so a
//! warm-up never forces a loading state on existing consumers of a key, and
//! a failed warm-up leaves no subscriber-visible error. Repeated triggers
//! inside `stale_time` collapse onto the cache and cost nothing.

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::key::QueryKey;
use crate::query::{erase_producer, ErasedProducer, QueryClient};

/// One warmable key with its producer, registered ahead of time so triggers
/// only pass signals around, not closures.
#[derive(Clone)]
pub struct PrefetchTask {
  key: QueryKey,
  producer: ErasedProducer,
  /// Overrides the client's default `stale_time` when set.
  stale_time: Option<Duration>,
}

impl PrefetchTask {
  pub fn new<T, F, Fut>(key: QueryKey, producer: F) -> Self
  where
    T: serde::Serialize,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, crate::error::FetchError>> + Send + 'static,
  {
    PrefetchTask {
      key,
      producer: erase_producer(producer),
      stale_time: None,
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  async fn run(&self, client: &QueryClient) {
    let mut options = client.defaults().clone();
    if let Some(stale_time) = self.stale_time {
      options.stale_time = stale_time;
    }
    client
      .prefetch_erased(&self.key, Arc::clone(&self.producer), &options)
      .await;
  }
}

/// Hover and route-change warm-up.
///
/// Routes are registered by section name; `on_route_change` extracts the
/// section from paths shaped `/dashboard/{section}` and warms that section's
/// tasks. Unknown sections are a no-op.
pub struct Prefetcher {
  client: QueryClient,
  routes: HashMap<String, Vec<PrefetchTask>>,
}

impl Prefetcher {
  pub fn new(client: &QueryClient) -> Self {
    Prefetcher {
      client: client.clone(),
      routes: HashMap::new(),
    }
  }

  pub fn with_route(mut self, section: &str, tasks: Vec<PrefetchTask>) -> Self {
    self.routes.insert(section.to_string(), tasks);
    self
  }

  /// Pointer entered a detail link: warm its detail entry and the related
  /// entries shown alongside it, in parallel.
  ///
  /// Idempotent within `stale_time`: a second hover finds the entries fresh
  /// and performs no fetch.
  pub async fn on_hover(&self, detail: &PrefetchTask, related: &[PrefetchTask]) {
    debug!(key = %detail.key, related = related.len(), "hover prefetch");
    let mut futs = Vec::with_capacity(related.len() + 1);
    futs.push(detail.run(&self.client));
    for task in related {
      futs.push(task.run(&self.client));
    }
    join_all(futs).await;
  }

  /// Navigation happened: warm the list/overview entries of the target
  /// section, once per navigation.
  pub async fn on_route_change(&self, path: &str) {
    let section = match path.split('/').nth(2) {
      Some(section) if !section.is_empty() => section,
      _ => return,
    };
    let tasks = match self.routes.get(section) {
      Some(tasks) => tasks,
      None => {
        debug!(section, "no prefetch tasks for route");
        return;
      }
    };
    debug!(section, tasks = tasks.len(), "route prefetch");
    join_all(tasks.iter().map(|task| task.run(&self.client))).await;
  }
}

/// Visibility ratio at which a marked element counts as seen.
const VISIBILITY_THRESHOLD: f64 = 0.5;

/// Warms an element's detail entry once, the first time the element becomes
/// at least half visible. Feed it visibility ratios from whatever observes
/// the viewport; call [`ViewportPrefetcher::disconnect`] on teardown.
pub struct ViewportPrefetcher {
  client: QueryClient,
  fired: Mutex<HashSet<QueryKey>>,
  disconnected: AtomicBool,
}

impl ViewportPrefetcher {
  pub fn new(client: &QueryClient) -> Self {
    ViewportPrefetcher {
      client: client.clone(),
      fired: Mutex::new(HashSet::new()),
      disconnected: AtomicBool::new(false),
    }
  }

  /// Report a visibility change for the element behind `task`. Fires at most
  /// once per key over the prefetcher's lifetime.
  pub async fn on_visibility(&self, task: &PrefetchTask, visible_ratio: f64) {
    if self.disconnected.load(Ordering::SeqCst) || visible_ratio < VISIBILITY_THRESHOLD {
      return;
    }
    {
      let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
      if !fired.insert(task.key.clone()) {
        return;
      }
    }
    debug!(key = %task.key, "viewport prefetch");
    task.run(&self.client).await;
  }

  /// Stop reacting to visibility reports. Idempotent.
  pub fn disconnect(&self) {
    self.disconnected.store(true, Ordering::SeqCst);
  }
}

/// Where the app currently runs: visible or hidden, online or offline.
/// Implemented over platform signals in real bindings; tests toggle flags.
pub trait SyncEnvironment: Send + Sync {
  fn is_visible(&self) -> bool;
  fn is_online(&self) -> bool;
}

/// Environment that is always visible and online.
pub struct AlwaysActive;

impl SyncEnvironment for AlwaysActive {
  fn is_visible(&self) -> bool {
    true
  }

  fn is_online(&self) -> bool {
    true
  }
}

/// Keeps a whitelist of critical keys from going long-stale: on an interval
/// and on visibility/online edges it invalidates them, so live subscribers
/// revalidate on their next read. Entirely suppressed while the app is
/// hidden or offline.
pub struct BackgroundSync {
  client: QueryClient,
  critical: Vec<QueryKey>,
  env: Arc<dyn SyncEnvironment>,
}

impl BackgroundSync {
  pub fn new(client: &QueryClient, critical: Vec<QueryKey>, env: Arc<dyn SyncEnvironment>) -> Self {
    BackgroundSync {
      client: client.clone(),
      critical,
      env,
    }
  }

  /// One sync pass: invalidate every critical prefix, or nothing at all when
  /// hidden or offline. Returns the number of entries marked stale.
  pub fn sync(&self) -> usize {
    if !self.env.is_visible() || !self.env.is_online() {
      debug!("sync skipped; hidden or offline");
      return 0;
    }
    let mut marked = 0;
    for key in &self.critical {
      marked += self.client.invalidate(key);
    }
    debug!(marked, "background sync pass");
    marked
  }

  /// The document became visible again; catch up immediately.
  pub fn on_visibility_change(&self) -> usize {
    self.sync()
  }

  /// Connectivity came back; catch up immediately.
  pub fn on_online(&self) -> usize {
    self.sync()
  }

  /// Run sync passes on a fixed interval until the handle is aborted.
  pub fn start(self, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "background sync started");
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // The first tick fires immediately; skip it so starting the loop is
      // not itself a sync pass.
      ticker.tick().await;
      loop {
        ticker.tick().await;
        self.sync();
      }
    })
  }
}
