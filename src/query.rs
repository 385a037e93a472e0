//! Query execution with request de-duplication, stale-while-revalidate
//! semantics, and bounded retry.
//!
//! [`QueryClient`] is the imperative entry point: `fetch_query` resolves a
//! key through the shared [`CacheStore`], collapsing concurrent callers of
//! the same key onto one in-flight fetch. [`Query`] is the observable handle
//! a consumer holds onto; it re-emits through its subscription whenever the
//! underlying entry changes.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::new();
//! let key = QueryKey::list("projects", filter);
//! let api = fetch_client.clone();
//! let projects: ProjectPage = client
//!   .fetch_query(&key, move || {
//!     let api = api.clone();
//!     async move { api.get("projects?status=active").await }
//!   }, &QueryOptions::default().with_stale_time(Duration::from_secs(300)))
//!   .await?;
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::QueryOptions;
use crate::error::FetchError;
use crate::key::QueryKey;
use crate::store::{
  CacheStore, EntrySnapshot, Lookup, QueryStatus, SharedFetch, Subscription,
};

/// Type-erased producer: the store caches `serde_json::Value`, so one store
/// holds every entity type.
pub(crate) type ErasedProducer =
  Arc<dyn Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

/// Erase a typed producer into the JSON-valued form the store works with.
pub(crate) fn erase_producer<T, F, Fut>(producer: F) -> ErasedProducer
where
  T: Serialize,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
  Arc::new(move || {
    let fut = producer();
    async move {
      let value = fut.await?;
      serde_json::to_value(value).map_err(|e| FetchError::Decode(e.to_string()))
    }
    .boxed()
  })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, FetchError> {
  serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Handle to one cache store plus default query options.
///
/// Cheap to clone; clones share the same store. Construct one per
/// application (or per test, for isolation) and pass it down; there is no
/// ambient global client.
#[derive(Clone)]
pub struct QueryClient {
  store: CacheStore,
  defaults: QueryOptions,
  mutation_gate: Arc<AsyncMutex<()>>,
}

impl QueryClient {
  /// Client over a fresh, isolated store with default options.
  pub fn new() -> Self {
    Self::with_defaults(QueryOptions::default())
  }

  /// Client over a fresh store with the given default options.
  pub fn with_defaults(defaults: QueryOptions) -> Self {
    QueryClient {
      store: CacheStore::new(),
      defaults,
      mutation_gate: Arc::new(AsyncMutex::new(())),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn defaults(&self) -> &QueryOptions {
    &self.defaults
  }

  /// Gate serializing optimistic mutations; see `mutation.rs`.
  pub(crate) fn mutation_gate(&self) -> &AsyncMutex<()> {
    &self.mutation_gate
  }

  /// Resolve `key`, using the cache when possible.
  ///
  /// Fresh entries are served without a network call. Stale entries are
  /// served immediately while a refetch runs in the background. A miss
  /// awaits the single shared in-flight fetch; concurrent callers for the
  /// same key never trigger a second producer invocation.
  pub async fn fetch_query<T, F, Fut>(
    &self,
    key: &QueryKey,
    producer: F,
    options: &QueryOptions,
  ) -> Result<T, FetchError>
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let erased = erase_producer(producer);
    let value = self.fetch_erased(key, erased, options, true).await?;
    decode(value)
  }

  /// Warm the cache for `key` without surfacing failures.
  ///
  /// Existing consumers never see a loading state from this: entries with
  /// data keep their success status during revalidation, and a failed
  /// prefetch leaves no error in subscriber-visible status. The failure is
  /// logged and swallowed.
  pub async fn prefetch_query<T, F, Fut>(&self, key: &QueryKey, producer: F, options: &QueryOptions)
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let erased = erase_producer(producer);
    self.prefetch_erased(key, erased, options).await;
  }

  pub(crate) async fn prefetch_erased(
    &self,
    key: &QueryKey,
    producer: ErasedProducer,
    options: &QueryOptions,
  ) {
    if let Err(e) = self.fetch_erased(key, producer, options, false).await {
      debug!(key = %key, error = %e, "prefetch failed");
    }
  }

  pub(crate) async fn fetch_erased(
    &self,
    key: &QueryKey,
    producer: ErasedProducer,
    options: &QueryOptions,
    surface_error: bool,
  ) -> Result<Value, FetchError> {
    let lookup = self.store.begin_or_attach(key, surface_error, || {
      self.build_fetch(key.clone(), producer, options, surface_error)
    });

    match lookup {
      Lookup::Fresh(value) => {
        trace!(key = %key, "cache hit (fresh)");
        Ok(value)
      }
      Lookup::StaleServe(value) => {
        trace!(key = %key, "cache hit (stale, refetch already in flight)");
        Ok(value)
      }
      Lookup::Wait(fetch) => fetch.await,
      Lookup::Revalidate { data, fetch } => {
        trace!(key = %key, "cache hit (stale); revalidating in background");
        tokio::spawn(fetch);
        Ok(data)
      }
      Lookup::Started(fetch) => {
        // Drive the fetch from its own task as well, so a caller going away
        // mid-await cannot cancel it for everyone else.
        tokio::spawn(fetch.clone());
        fetch.await
      }
    }
  }

  /// Wrap the producer with retry and store write-back, as one shareable
  /// future. The write-back runs inside the future, so it happens exactly
  /// once no matter how many callers await the shared handle.
  fn build_fetch(
    &self,
    key: QueryKey,
    producer: ErasedProducer,
    options: &QueryOptions,
    surface_error: bool,
  ) -> SharedFetch {
    let store = self.store.clone();
    let retry = options.retry.clone();
    let stale_time = options.stale_time;
    let gc_time = options.gc_time;

    async move {
      let mut attempt = 0u32;
      let result = loop {
        match producer().await {
          Ok(value) => break Ok(value),
          Err(e) if attempt < retry.max_retries && e.is_retryable() => {
            let delay = retry.delay_for(attempt);
            debug!(key = %key, attempt, error = %e, delay_ms = delay.as_millis() as u64, "fetch failed; retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
          }
          Err(e) => break Err(e),
        }
      };
      store.complete_fetch(&key, &result, stale_time, gc_time, surface_error);
      result
    }
    .boxed()
    .shared()
  }

  /// Write a value for `key` directly, e.g. merging a mutation response
  /// into the detail cache.
  pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, value: &T) -> Result<(), FetchError> {
    let value = serde_json::to_value(value).map_err(|e| FetchError::Decode(e.to_string()))?;
    self
      .store
      .set_data(key, value, self.defaults.stale_time, self.defaults.gc_time);
    Ok(())
  }

  /// Mark every entry under `prefix` stale; data stays visible until the
  /// next read revalidates it. Returns the number of entries touched.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    self.store.invalidate(prefix)
  }

  /// Periodically evict unobserved entries past their GC deadline. Abort
  /// the returned handle at shutdown.
  pub fn start_gc(&self, interval: Duration) -> JoinHandle<()> {
    let store = self.store.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        store.collect_garbage();
      }
    })
  }
}

impl Default for QueryClient {
  fn default() -> Self {
    QueryClient::new()
  }
}

/// Observed value of a query: status plus whatever data and error the entry
/// currently carries. With stale-while-revalidate both can be present at
/// once, e.g. old data staying visible while a background refetch fails.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  pub data: Option<T>,
  pub error: Option<FetchError>,
  pub is_stale: bool,
}

impl<T> QueryState<T> {
  fn idle() -> Self {
    QueryState {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      is_stale: false,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Pending
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }
}

/// Observable handle to one query.
///
/// Holding a `Query` counts as an active consumer of its key: the entry is
/// retained for as long as the handle lives, and dropping the handle starts
/// the GC clock. Dropping it does not cancel an in-flight fetch; other
/// consumers may still be waiting on it.
pub struct Query<T> {
  client: QueryClient,
  key: QueryKey,
  producer: ErasedProducer,
  options: QueryOptions,
  enabled: bool,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Query<T> {
  pub fn new<F, Fut>(client: &QueryClient, key: QueryKey, producer: F, options: QueryOptions) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    client.store().retain(&key);
    let enabled = options.enabled;
    Query {
      client: client.clone(),
      key,
      producer: erase_producer(producer),
      options,
      enabled,
      _marker: PhantomData,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current observed state, straight from the store.
  ///
  /// A cached value that no longer decodes as `T` is reported as an error
  /// state carrying `FetchError::Decode`, never as a silent `None`.
  pub fn state(&self) -> QueryState<T> {
    let snap = match self.client.store().get(&self.key) {
      None => return QueryState::idle(),
      Some(snap) => snap,
    };
    let (data, decode_error) = match snap.data {
      None => (None, None),
      Some(value) => match serde_json::from_value(value) {
        Ok(data) => (Some(data), None),
        Err(e) => (None, Some(FetchError::Decode(e.to_string()))),
      },
    };
    match decode_error {
      None => QueryState {
        status: snap.status,
        data,
        error: snap.error,
        is_stale: snap.is_stale,
      },
      Some(err) => QueryState {
        status: QueryStatus::Error,
        data: None,
        error: Some(err),
        is_stale: snap.is_stale,
      },
    }
  }

  /// Make sure the entry is populated, fetching if needed.
  ///
  /// Disabled queries stay idle and return `None` without touching the
  /// producer. Re-running `ensure` while a fetch is pending attaches to the
  /// same in-flight fetch instead of issuing another.
  pub async fn ensure(&self) -> Result<Option<T>, FetchError> {
    if !self.enabled {
      return Ok(None);
    }
    let value = self
      .client
      .fetch_erased(&self.key, Arc::clone(&self.producer), &self.options, true)
      .await?;
    decode(value).map(Some)
  }

  /// Force a refetch regardless of freshness.
  pub async fn refetch(&self) -> Result<Option<T>, FetchError> {
    if !self.enabled {
      return Ok(None);
    }
    self.client.store().invalidate(&self.key);
    self.ensure().await
  }

  /// Enable or disable the query. Turning it on fetches exactly once;
  /// repeated transitions while the fetch is pending de-duplicate onto it.
  pub async fn set_enabled(&mut self, enabled: bool) -> Result<Option<T>, FetchError> {
    let was_enabled = self.enabled;
    self.enabled = enabled;
    if enabled && !was_enabled {
      self.ensure().await
    } else {
      Ok(None)
    }
  }

  /// Consumer regained focus; revalidate if configured to.
  pub async fn on_focus(&self) -> Result<Option<T>, FetchError> {
    if self.enabled && self.options.refetch_on_focus {
      self.ensure().await
    } else {
      Ok(None)
    }
  }

  /// Listen for every transition of this query's entry. The listener runs
  /// in the same task step as the change; UI bindings batch re-renders.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&EntrySnapshot) + Send + Sync + 'static,
  {
    self.client.store().subscribe(&self.key, listener)
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    self.client.store().release(&self.key, self.options.gc_time);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  /// Route `RUST_LOG`-filtered traces to the test harness output.
  fn init_logging() {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  }

  fn counting_producer(
    calls: Arc<AtomicU32>,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync + Clone + 'static {
    move || {
      let calls = Arc::clone(&calls);
      async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
        Ok(json!({ "version": n }))
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_callers_share_one_fetch() {
    let client = QueryClient::new();
    let key = QueryKey::list("projects", Default::default());
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().with_stale_time(Duration::from_secs(300));

    let started = tokio::time::Instant::now();
    let producer = counting_producer(Arc::clone(&calls), Duration::from_millis(50));
    let (a, b): (Result<Value, _>, Result<Value, _>) = tokio::join!(
      client.fetch_query(&key, producer.clone(), &opts),
      client.fetch_query(&key, producer, &opts),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(100));
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_caller_joins_in_flight_fetch() {
    // A producer that resolves after 50ms; a second caller arriving at 10ms
    // must receive the same resolved value at ~50ms, not at 50ms + 50ms.
    let client = QueryClient::new();
    let key = QueryKey::list(
      "projects",
      crate::key::Filter::from_iter([(
        "status".to_string(),
        crate::key::FilterValue::from("active"),
      )]),
    );
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().with_stale_time(Duration::from_secs(300));

    let producer = {
      let calls = Arc::clone(&calls);
      move || {
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok(json!({ "items": [{ "id": "p1" }], "total": 1, "has_more": false }))
        }
        .boxed()
      }
    };

    let started = tokio::time::Instant::now();
    let (a, b): (Result<Value, _>, Result<Value, _>) = tokio::join!(
      client.fetch_query(&key, producer.clone(), &opts),
      async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.fetch_query(&key, producer, &opts).await
      },
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
  }

  #[tokio::test]
  async fn test_stale_while_revalidate() {
    init_logging();
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    // stale_time zero: every read after the first serves stale data and
    // revalidates in the background.
    let opts = QueryOptions::default();

    let producer = counting_producer(Arc::clone(&calls), Duration::ZERO);
    let first: Value = client.fetch_query(&key, producer.clone(), &opts).await.unwrap();
    assert_eq!(first, json!({ "version": 1 }));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let _sub = client.store().subscribe(&key, move |snap| {
      seen_clone.lock().unwrap().push(snap.data.clone());
    });

    // Old value comes back synchronously from the cache.
    let second: Value = client.fetch_query(&key, producer, &opts).await.unwrap();
    assert_eq!(second, json!({ "version": 1 }));

    // The background refetch lands and subscribers see the new value.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let snap = client.store().get(&key).unwrap();
    assert_eq!(snap.data, Some(json!({ "version": 2 })));
    assert!(seen
      .lock()
      .unwrap()
      .iter()
      .any(|d| d == &Some(json!({ "version": 2 }))));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_with_backoff_until_success() {
    init_logging();
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().with_retry(crate::RetryPolicy::backoff(3));

    let producer = {
      let calls = Arc::clone(&calls);
      move || {
        let calls = Arc::clone(&calls);
        async move {
          let n = calls.fetch_add(1, Ordering::SeqCst);
          if n < 2 {
            Err(FetchError::Network("connection reset".into()))
          } else {
            Ok(json!("ok"))
          }
        }
        .boxed()
      }
    };

    let result: Value = client.fetch_query(&key, producer, &opts).await.unwrap();
    assert_eq!(result, json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_application_errors_are_not_retried() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().with_retry(crate::RetryPolicy::backoff(3));

    let producer = {
      let calls = Arc::clone(&calls);
      move || {
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Err::<Value, _>(FetchError::Http {
            status: 400,
            message: "validation failed".into(),
          })
        }
        .boxed()
      }
    };

    let result: Result<Value, _> = client.fetch_query(&key, producer, &opts).await;
    assert_eq!(result.unwrap_err().status(), Some(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let snap = client.store().get(&key).unwrap();
    assert_eq!(snap.status, QueryStatus::Error);
    assert!(snap.error.is_some());
  }

  #[tokio::test]
  async fn test_failed_prefetch_never_touches_visible_status() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let opts = QueryOptions::default();

    // A surfaced failure first, so the entry sits in Error status.
    let result: Result<Value, _> = client
      .fetch_query(
        &key,
        || async {
          Err(FetchError::Http { status: 404, message: "missing".into() })
        },
        &opts,
      )
      .await;
    assert!(result.is_err());
    assert_eq!(client.store().get(&key).unwrap().status, QueryStatus::Error);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let _sub = client.store().subscribe(&key, move |snap| {
      seen_clone.lock().unwrap().push(snap.status);
    });

    // The failing warm-up must not flash Pending, settle to Idle, or erase
    // the recorded error.
    client
      .prefetch_query::<Value, _, _>(&key, || async { Err(FetchError::Timeout) }, &opts)
      .await;

    let snap = client.store().get(&key).unwrap();
    assert_eq!(snap.status, QueryStatus::Error);
    assert_eq!(snap.error.unwrap().status(), Some(404));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_background_failure_keeps_previous_data() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let producer = {
      let calls = Arc::clone(&calls);
      move || {
        let calls = Arc::clone(&calls);
        async move {
          let n = calls.fetch_add(1, Ordering::SeqCst);
          if n == 0 {
            Ok(json!({ "id": "p1" }))
          } else {
            Err(FetchError::Network("offline".into()))
          }
        }
        .boxed()
      }
    };

    let first: Value = client.fetch_query(&key, producer.clone(), &opts).await.unwrap();
    assert_eq!(first, json!({ "id": "p1" }));

    // Stale read: serves the old data, background refetch fails.
    let second: Value = client.fetch_query(&key, producer, &opts).await.unwrap();
    assert_eq!(second, json!({ "id": "p1" }));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snap = client.store().get(&key).unwrap();
    assert_eq!(snap.status, QueryStatus::Success);
    assert_eq!(snap.data, Some(json!({ "id": "p1" })));
    assert!(snap.error.is_some());
  }

  #[tokio::test]
  async fn test_disabled_query_stays_idle_until_enabled() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default()
      .with_stale_time(Duration::from_secs(300))
      .with_enabled(false);

    let mut query: Query<Value> = Query::new(
      &client,
      key.clone(),
      counting_producer(Arc::clone(&calls), Duration::ZERO),
      opts,
    );

    assert!(query.ensure().await.unwrap().is_none());
    assert!(query.ensure().await.unwrap().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(query.state().status, QueryStatus::Idle);

    // Enabling fetches exactly once.
    let data = query.set_enabled(true).await.unwrap();
    assert_eq!(data, Some(json!({ "version": 1 })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Re-enabling and re-ensuring hit the fresh cache.
    query.set_enabled(true).await.unwrap();
    query.ensure().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_refetch_bypasses_freshness() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().with_stale_time(Duration::from_secs(300));

    let query: Query<Value> = Query::new(
      &client,
      key,
      counting_producer(Arc::clone(&calls), Duration::ZERO),
      opts,
    );

    query.ensure().await.unwrap();
    query.ensure().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    query.refetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_state_surfaces_decode_failure() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    client
      .set_query_data(&key, &json!({ "id": "p1" }))
      .unwrap();

    // The cached value is an object; a numeric view of it cannot decode.
    let query: Query<u64> = Query::new(
      &client,
      key,
      || async { Ok(7u64) },
      QueryOptions::default(),
    );

    let state = query.state();
    assert!(state.is_error());
    assert!(state.data.is_none());
    assert!(matches!(state.error, Some(FetchError::Decode(_))));
  }

  #[tokio::test]
  async fn test_dropping_query_starts_gc_clock() {
    let client = QueryClient::new();
    let key = QueryKey::detail("projects", "p1");
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().with_gc_time(Duration::ZERO);

    let query: Query<Value> = Query::new(
      &client,
      key.clone(),
      counting_producer(Arc::clone(&calls), Duration::ZERO),
      opts,
    );
    query.ensure().await.unwrap();

    // Observed: survives a sweep.
    assert_eq!(client.store().collect_garbage(), 0);

    drop(query);
    assert_eq!(client.store().collect_garbage(), 1);
    assert!(client.store().get(&key).is_none());
  }
}
