//! Infinite pagination: cursor-chained pages under a shared key prefix.
//!
//! Each page is an ordinary cache entry keyed `[...prefix, cursor]` and
//! fetched through the query executor, so page fetches de-duplicate and
//! revalidate like any other query. The controller owns the ordered list of
//! cursors; flattening pages into one sequence is a pure projection that
//! never reorders them.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::QueryOptions;
use crate::error::FetchError;
use crate::key::{QueryKey, Segment};
use crate::query::QueryClient;

/// Opaque position token for the next page, taken from a page response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
  /// Page-number cursor, used by offset-paginated endpoints.
  Index(u64),
  /// Server-issued opaque token.
  Token(String),
}

impl From<Cursor> for Segment {
  fn from(cursor: Cursor) -> Self {
    match cursor {
      Cursor::Index(n) => Segment::Int(n as i64),
      Cursor::Token(t) => Segment::Str(t),
    }
  }
}

/// One fetched page of an infinite list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// The cursor this page was fetched with.
  pub cursor: Cursor,
  /// Cursor for the following page, as reported by the server. The
  /// controller never derives it by arithmetic of its own; server-side
  /// re-ordering would break that.
  pub next_cursor: Option<Cursor>,
  pub has_more: bool,
  /// Total item count across all pages, when the server reports one.
  pub total: Option<u64>,
}

/// Producer for one page, given its cursor.
type PageProducer<T> =
  Arc<dyn Fn(Cursor) -> BoxFuture<'static, Result<Page<T>, FetchError>> + Send + Sync>;

/// Controller chaining page queries into one logical ordered sequence.
pub struct InfiniteQuery<T> {
  client: QueryClient,
  prefix: QueryKey,
  producer: PageProducer<T>,
  options: QueryOptions,
  initial_cursor: Cursor,
  /// Cursors in fetch order; index 0 is always the first page.
  cursors: Vec<Cursor>,
}

impl<T> InfiniteQuery<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
  /// Controller for pages under `prefix`, starting at `Cursor::Index(0)`.
  pub fn new<F, Fut>(client: &QueryClient, prefix: QueryKey, producer: F, options: QueryOptions) -> Self
  where
    F: Fn(Cursor) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Page<T>, FetchError>> + Send + 'static,
  {
    Self::with_initial_cursor(client, prefix, producer, options, Cursor::Index(0))
  }

  /// Controller starting from an explicit initial cursor.
  pub fn with_initial_cursor<F, Fut>(
    client: &QueryClient,
    prefix: QueryKey,
    producer: F,
    options: QueryOptions,
    initial_cursor: Cursor,
  ) -> Self
  where
    F: Fn(Cursor) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Page<T>, FetchError>> + Send + 'static,
  {
    let producer: PageProducer<T> = Arc::new(move |cursor| {
      let fut = producer(cursor);
      Box::pin(fut)
    });
    InfiniteQuery {
      client: client.clone(),
      prefix,
      producer,
      options,
      initial_cursor,
      cursors: Vec::new(),
    }
  }

  fn page_key(&self, cursor: &Cursor) -> QueryKey {
    self.prefix.append(cursor.clone())
  }

  /// Read a page back from the cache. Pages are retained while the
  /// controller lives, so a miss only happens before the first fetch.
  fn cached_page(&self, cursor: &Cursor) -> Option<Page<T>> {
    let snap = self.client.store().get(&self.page_key(cursor))?;
    let value = snap.data?;
    serde_json::from_value(value).ok()
  }

  async fn fetch_page(&self, cursor: Cursor) -> Result<Page<T>, FetchError> {
    let key = self.page_key(&cursor);
    let producer = Arc::clone(&self.producer);
    let page_cursor = cursor.clone();
    self
      .client
      .fetch_query(
        &key,
        move || producer(page_cursor.clone()),
        &self.options,
      )
      .await
  }

  /// Fetch the first page if it is not present yet.
  pub async fn fetch_first_page(&mut self) -> Result<Page<T>, FetchError> {
    let cursor = self.initial_cursor.clone();
    let key = self.page_key(&cursor);
    let page = self.fetch_page(cursor.clone()).await?;
    if !self.cursors.contains(&cursor) {
      self.client.store().retain(&key);
      self.cursors.insert(0, cursor);
    }
    Ok(page)
  }

  /// Cursor for the page after the last fetched one, straight from the
  /// last page's response. `None` at the end of the list.
  fn next_cursor_candidate(&self) -> Option<Cursor> {
    let page = self.cursors.last().and_then(|c| self.cached_page(c))?;
    if !page.has_more {
      return None;
    }
    if page.next_cursor.is_none() {
      // Server claims more data but gave no cursor to reach it.
      warn!(prefix = %self.prefix, "page has_more without next_cursor; treating as end");
    }
    page.next_cursor
  }

  /// Cursor for the page before the first fetched one. Only index cursors
  /// have a backward direction; token sequences return `None`.
  fn previous_cursor_candidate(&self) -> Option<Cursor> {
    match self.cursors.first() {
      Some(Cursor::Index(n)) if *n > 0 => Some(Cursor::Index(n - 1)),
      _ => None,
    }
  }

  /// Fetch the page after the last fetched one.
  ///
  /// The next cursor comes strictly from the last page's response. Returns
  /// `Ok(None)` once the end is reached (or before the first page exists).
  pub async fn fetch_next_page(&mut self) -> Result<Option<Page<T>>, FetchError> {
    if self.cursors.is_empty() {
      return self.fetch_first_page().await.map(Some);
    }

    let next = match self.next_cursor_candidate() {
      Some(cursor) => cursor,
      None => return Ok(None),
    };
    if self.cursors.contains(&next) {
      return Ok(None);
    }

    let page = self.fetch_page(next.clone()).await?;
    self.client.store().retain(&self.page_key(&next));
    self.cursors.push(next);
    Ok(Some(page))
  }

  /// Fetch the page before the first fetched one, prepending it.
  pub async fn fetch_previous_page(&mut self) -> Result<Option<Page<T>>, FetchError> {
    let previous = match self.previous_cursor_candidate() {
      Some(cursor) => cursor,
      None => return Ok(None),
    };
    if self.cursors.contains(&previous) {
      return Ok(None);
    }

    let page = self.fetch_page(previous.clone()).await?;
    self.client.store().retain(&self.page_key(&previous));
    self.cursors.insert(0, previous);
    Ok(Some(page))
  }

  /// Refetch the first page and mark deeper pages stale.
  ///
  /// Already-fetched deeper pages are kept. They revalidate lazily on
  /// their next access instead of disappearing from the list.
  pub async fn refetch_first_page(&mut self) -> Result<Option<Page<T>>, FetchError> {
    let first = match self.cursors.first().cloned() {
      Some(cursor) => cursor,
      None => return Ok(None),
    };
    self.client.store().invalidate(&self.page_key(&first));
    let page = self.fetch_page(first).await?;
    for cursor in self.cursors.iter().skip(1) {
      self.client.store().invalidate(&self.page_key(cursor));
    }
    Ok(Some(page))
  }

  /// All fetched pages, in fetch order.
  pub fn pages(&self) -> Vec<Page<T>> {
    self
      .cursors
      .iter()
      .filter_map(|c| self.cached_page(c))
      .collect()
  }

  /// Flattened view of every fetched item, preserving page order and
  /// within-page order. Pure projection; pages are never mutated.
  pub fn items(&self) -> Vec<T> {
    self
      .pages()
      .into_iter()
      .flat_map(|page| page.items)
      .collect()
  }

  /// Total count reported by the first page, if any.
  pub fn total(&self) -> Option<u64> {
    self
      .cursors
      .first()
      .and_then(|c| self.cached_page(c))
      .and_then(|p| p.total)
  }

  /// False iff the last fetched page said there is nothing further.
  pub fn has_next_page(&self) -> bool {
    self
      .cursors
      .last()
      .and_then(|c| self.cached_page(c))
      .map(|p| p.has_more)
      .unwrap_or(true)
  }

  /// Whether a fetch for the next page is in flight, as recorded by the
  /// store. Any controller over the same prefix observes the same answer,
  /// including one whose sibling started the fetch.
  pub fn is_fetching_next_page(&self) -> bool {
    self
      .next_cursor_candidate()
      .and_then(|c| self.client.store().get(&self.page_key(&c)))
      .map(|snap| snap.is_fetching)
      .unwrap_or(false)
  }

  /// Whether a fetch for the previous page is in flight.
  pub fn is_fetching_previous_page(&self) -> bool {
    self
      .previous_cursor_candidate()
      .and_then(|c| self.client.store().get(&self.page_key(&c)))
      .map(|snap| snap.is_fetching)
      .unwrap_or(false)
  }
}

impl<T> Drop for InfiniteQuery<T> {
  fn drop(&mut self) {
    for cursor in &self.cursors {
      let key = self.prefix.append(cursor.clone());
      self.client.store().release(&key, self.options.gc_time);
    }
  }
}
