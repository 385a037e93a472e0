//! `refetch` is a client-side query cache: structured keys, request
//! de-duplication, stale-while-revalidate reads, optimistic mutations with
//! rollback, cursor pagination, and prefetch triggers, all over one shared
//! in-memory store.
//!
//! The pieces:
//!
//! - [`QueryKey`] / [`Segment`] / [`Filter`]: hierarchical cache keys with
//!   prefix-based invalidation (`["projects", "list", {...}]`).
//! - [`CacheStore`]: the entry map. Freshness, subscriptions, snapshots,
//!   reference counts, garbage collection.
//! - [`QueryClient`]: fetch execution. Concurrent callers of one key share
//!   one in-flight fetch; stale entries serve cached data while revalidating
//!   in the background.
//! - [`Query`]: an observable per-key handle for UI bindings.
//! - [`Mutation`]: writes with optimistic cache patches that roll back
//!   exactly on failure.
//! - [`InfiniteQuery`]: cursor-chained page sequences under one key prefix.
//! - [`Prefetcher`], [`ViewportPrefetcher`], [`BackgroundSync`]: cache
//!   warm-up from hover, navigation, visibility, and timer signals.
//! - [`FetchClient`]: a thin JSON-over-HTTP client for producers to build on.
//!
//! # Example
//!
//! ```ignore
//! use refetch::{QueryClient, QueryKey, QueryOptions};
//! use std::time::Duration;
//!
//! let client = QueryClient::new();
//! let options = QueryOptions::default().with_stale_time(Duration::from_secs(300));
//!
//! let key = QueryKey::detail("projects", "p1");
//! let project: Project = client
//!   .fetch_query(&key, move || fetch_project("p1"), &options)
//!   .await?;
//!
//! // A later call inside stale_time is a synchronous cache hit; a call
//! // after it returns the cached value and revalidates in the background.
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod infinite;
pub mod key;
pub mod mutation;
pub mod prefetch;
pub mod query;
pub mod store;

pub use config::{QueryOptions, RetryPolicy};
pub use error::{FetchError, StoreError};
pub use fetch::FetchClient;
pub use infinite::{Cursor, InfiniteQuery, Page};
pub use key::{Filter, FilterValue, QueryKey, Segment};
pub use mutation::Mutation;
pub use prefetch::{
  AlwaysActive, BackgroundSync, PrefetchTask, Prefetcher, SyncEnvironment, ViewportPrefetcher,
};
pub use query::{Query, QueryClient, QueryState};
pub use store::{CacheStore, EntrySnapshot, QueryStatus, Subscription};
