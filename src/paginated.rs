//! Page-aware queries: a query composed with a pagination slice.
//!
//! Every fetch injects `page` and `page_size` from the pagination state after
//! the caller's own parameters, so the slice stays the single source of truth
//! and caller parameters can never silently override the current page. Since
//! parameters are part of the resolved cache key, each page addresses its own
//! cache entry.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::cache::{CacheStore, Subscription};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::pagination::{PaginationState, PaginationStore};
use crate::params::Params;
use crate::query::{Query, QueryBuilder, QueryOptions, QueryState, ResponseBody};
use crate::scope::Scope;

/// Builder for a [`PaginatedQuery`].
pub struct PaginatedQueryBuilder<T> {
  inner: QueryBuilder<Vec<T>>,
  pagination: Arc<PaginationStore>,
  table: Option<String>,
  scope: Option<Scope>,
  base_key: QueryKey,
}

impl<T> PaginatedQueryBuilder<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub(crate) fn new<F, Fut>(
    store: Arc<CacheStore>,
    pagination: Arc<PaginationStore>,
    base_key: QueryKey,
    fetcher: F,
  ) -> Self
  where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseBody<Vec<T>>, QueryError>> + Send + 'static,
  {
    Self {
      inner: QueryBuilder::new(store, base_key.clone(), fetcher),
      pagination,
      table: None,
      scope: None,
      base_key,
    }
  }

  /// Table identifier keying the pagination slice. Defaults to the query key.
  pub fn table(mut self, table: impl Into<String>) -> Self {
    self.table = Some(table.into());
    self
  }

  /// Caller query parameters, merged under the injected page parameters.
  pub fn params(mut self, defaults: Params) -> Self {
    self.inner = self.inner.params(defaults);
    self
  }

  pub fn options(mut self, options: QueryOptions<Vec<T>>) -> Self {
    self.inner = self.inner.options(options);
    self
  }

  pub(crate) fn default_debounce(mut self, window: std::time::Duration) -> Self {
    self.inner = self.inner.default_debounce(window);
    self
  }

  pub(crate) fn default_retry(mut self, retry: u32) -> Self {
    self.inner = self.inner.default_retry(retry);
    self
  }

  /// Bind to a scope: pending fetches stop writing once it ends, and the
  /// pagination slice reverts to its defaults.
  pub fn scope(mut self, scope: &Scope) -> Self {
    self.inner = self.inner.scope(scope);
    self.scope = Some(scope.clone());
    self
  }

  pub fn build(self) -> PaginatedQuery<T> {
    let table = self.table.unwrap_or_else(|| self.base_key.to_string());
    if let Some(scope) = &self.scope {
      scope.register_table(&table);
    }

    // The one place fetch results may write pagination state.
    let pagination = Arc::clone(&self.pagination);
    let sync_table = table.clone();
    let inner = self
      .inner
      .after_commit(Arc::new(move |body: &ResponseBody<Vec<T>>| {
        pagination.record_result(&sync_table, body.data.len() as u32, body.total);
      }))
      .build();

    PaginatedQuery {
      query: inner,
      pagination: self.pagination,
      table,
    }
  }
}

/// A query whose fetches follow a pagination slice.
pub struct PaginatedQuery<T> {
  query: Query<Vec<T>>,
  pagination: Arc<PaginationStore>,
  table: String,
}

impl<T> Clone for PaginatedQuery<T> {
  fn clone(&self) -> Self {
    Self {
      query: self.query.clone(),
      pagination: Arc::clone(&self.pagination),
      table: self.table.clone(),
    }
  }
}

impl<T> PaginatedQuery<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn table(&self) -> &str {
    &self.table
  }

  /// Current pagination slice for this table.
  pub fn pagination(&self) -> PaginationState {
    self.pagination.get(&self.table)
  }

  fn page_overrides(&self) -> Params {
    let state = self.pagination.get(&self.table);
    Params::new()
      .with("page", state.page)
      .with("page_size", state.page_size)
  }

  /// Cached state for the current page, without fetching.
  pub fn state(&self) -> QueryState<Vec<T>> {
    self.query.state_with(&self.page_overrides())
  }

  /// Subscribe to state changes of the current page's cache entry.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(QueryState<Vec<T>>) + Send + Sync + 'static,
  {
    self.query.subscribe_with(&self.page_overrides(), callback)
  }

  /// Fetch the current page.
  pub async fn fetch(&self) -> QueryState<Vec<T>> {
    self.query.fetch_with(self.page_overrides()).await
  }

  /// Move to page `page` (page size unchanged) and fetch it.
  pub async fn fetch_page(&self, page: u32) -> QueryState<Vec<T>> {
    self.pagination.set_page(&self.table, page);
    self.fetch().await
  }

  /// Change the page size, reset to page 1, and fetch.
  pub async fn fetch_page_size(&self, page_size: u32) -> QueryState<Vec<T>> {
    self.pagination.set_page_size(&self.table, page_size);
    self.fetch().await
  }

  /// Debounced forced refetch of the current page.
  pub async fn refetch(&self) -> QueryState<Vec<T>> {
    self.query.refetch_with(self.page_overrides()).await
  }
}
