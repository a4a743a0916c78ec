//! The query client: one cache store, one pagination store, one notifier.
//!
//! The client is the injection point for the whole layer. Construct one at
//! app start, hand clones of its builders to features, and drop it on
//! shutdown; tests construct their own throwaway clients.

use chrono::Duration;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::mutation::{MutationBuilder, Notifier, NoopNotifier};
use crate::paginated::PaginatedQueryBuilder;
use crate::pagination::{PaginationDefaults, PaginationStore};
use crate::params::Params;
use crate::query::{QueryBuilder, ResponseBody};
use crate::scope::Scope;

/// Client-wide configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  /// Seconds before committed data is considered stale.
  pub stale_secs: u64,
  /// Seconds an unsubscribed entry survives before garbage collection.
  pub gc_idle_secs: u64,
  /// Debounce window for manual refetches, in milliseconds.
  pub debounce_ms: u64,
  /// Extra attempts after a failed fetch, unless a query overrides it.
  pub retry: u32,
  pub default_page: u32,
  pub default_page_size: u32,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      stale_secs: 300,
      gc_idle_secs: 600,
      debounce_ms: 400,
      retry: 0,
      default_page: 1,
      default_page_size: 10,
    }
  }
}

/// Entry point wiring the stores and the notifier together.
#[derive(Clone)]
pub struct QueryClient {
  store: Arc<CacheStore>,
  pagination: Arc<PaginationStore>,
  notifier: Arc<dyn Notifier>,
  config: ClientConfig,
}

impl QueryClient {
  pub fn new(config: ClientConfig) -> Self {
    let store = CacheStore::new()
      .with_stale_time(Duration::seconds(config.stale_secs as i64))
      .with_gc_idle(Duration::seconds(config.gc_idle_secs as i64));
    let pagination = PaginationStore::new(PaginationDefaults {
      page: config.default_page,
      page_size: config.default_page_size,
    });
    Self {
      store: Arc::new(store),
      pagination: Arc::new(pagination),
      notifier: Arc::new(NoopNotifier),
      config,
    }
  }

  /// Replace the notification sink (toasts, snackbars).
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  pub fn pagination(&self) -> &Arc<PaginationStore> {
    &self.pagination
  }

  /// Open a new UI scope. End it when the owning UI region unmounts.
  pub fn scope(&self) -> Scope {
    Scope::new(Arc::clone(&self.pagination))
  }

  /// Start building a query over `key`.
  pub fn query<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> QueryBuilder<T>
  where
    T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseBody<T>, QueryError>> + Send + 'static,
  {
    QueryBuilder::new(Arc::clone(&self.store), key, fetcher)
      .default_debounce(std::time::Duration::from_millis(self.config.debounce_ms))
      .default_retry(self.config.retry)
  }

  /// Start building a paginated query over `key`.
  pub fn paginated<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> PaginatedQueryBuilder<T>
  where
    T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseBody<Vec<T>>, QueryError>> + Send + 'static,
  {
    PaginatedQueryBuilder::new(
      Arc::clone(&self.store),
      Arc::clone(&self.pagination),
      key,
      fetcher,
    )
    .default_debounce(std::time::Duration::from_millis(self.config.debounce_ms))
    .default_retry(self.config.retry)
  }

  /// Start building a mutation.
  pub fn mutation<T, F, Fut>(&self, mutate: F) -> MutationBuilder<T>
  where
    T: Clone + Send + Sync + 'static,
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseBody<T>, QueryError>> + Send + 'static,
  {
    MutationBuilder::new(Arc::clone(&self.store), Arc::clone(&self.notifier), mutate)
  }

  /// Mark every entry under `key` stale; subscribers see it before this
  /// returns.
  pub fn invalidate(&self, key: &QueryKey) -> usize {
    self.store.invalidate(key)
  }

  /// Drop idle, unsubscribed entries past their GC period.
  pub fn sweep(&self) -> usize {
    self.store.sweep()
  }

  /// Spawn a background task sweeping the cache at `interval`.
  /// Abort the returned handle on shutdown.
  pub fn spawn_gc(&self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    let store = Arc::clone(&self.store);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let removed = store.sweep();
        if removed > 0 {
          debug!(removed, "background gc pass");
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_defaults() {
    let config = ClientConfig::default();
    assert_eq!(config.stale_secs, 300);
    assert_eq!(config.default_page, 1);
    assert_eq!(config.default_page_size, 10);
  }

  #[test]
  fn test_config_deserializes_with_partial_fields() {
    let config: ClientConfig =
      serde_json::from_value(serde_json::json!({ "default_page_size": 25 })).expect("config");
    assert_eq!(config.default_page_size, 25);
    assert_eq!(config.stale_secs, 300);
  }

  #[tokio::test]
  async fn test_client_query_roundtrip() {
    let client = QueryClient::new(ClientConfig::default());
    let query = client
      .query(QueryKey::new("lessons"), |_| async {
        Ok(ResponseBody::new(vec!["intro".to_string()]))
      })
      .build();

    let state = query.fetch().await;
    assert_eq!(state.data().map(|d| d.len()), Some(1));
    assert_eq!(client.store().len(), 1);
  }
}
