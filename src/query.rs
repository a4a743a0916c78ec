//! Query handles: deduplicated, cache-backed async data fetching.
//!
//! A [`Query`] wraps a fetch function and a cache key into a reusable accessor
//! over one shared cache entry. Concurrent fetches for the same resolved key
//! collapse into a single network call; results commit to the store, which
//! notifies subscribers synchronously. Fetch failures are captured into the
//! query state, never thrown at the caller.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::new(ClientConfig::default());
//! let courses = client
//!   .query(QueryKey::new("courses"), |params| async move {
//!     http.get("/courses", params).await
//!   })
//!   .build();
//!
//! let state = courses.fetch().await;
//! if let Some(data) = state.data() {
//!   render(data);
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheStore, EntrySnapshot, FetchTicket, QueryStatus, Subscription};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::params::Params;
use crate::scope::Scope;

/// Response envelope produced by fetch functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody<T> {
  pub data: T,
  /// Server-reported total item count, present on paginated list endpoints.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total: Option<u64>,
  /// Optional server-supplied message.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

impl<T> ResponseBody<T> {
  pub fn new(data: T) -> Self {
    Self {
      data,
      total: None,
      message: None,
    }
  }

  pub fn with_total(mut self, total: u64) -> Self {
    self.total = Some(total);
    self
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }
}

/// A fetch function: parameters in, response envelope out.
pub(crate) type FetchFn<T> =
  Arc<dyn Fn(Params) -> BoxFuture<'static, Result<ResponseBody<T>, QueryError>> + Send + Sync>;

type HookFn<T> =
  Arc<dyn Fn(ResponseBody<T>) -> BoxFuture<'static, Result<(), QueryError>> + Send + Sync>;

pub(crate) type AfterCommitFn<T> = Arc<dyn Fn(&ResponseBody<T>) + Send + Sync>;

/// Per-query configuration and lifecycle hooks.
///
/// On a successful fetch the hooks run in fixed order, each awaited before the
/// next: `on_before_set_state`, the state commit, `on_after_set_state`, then
/// `on_success`. A failure in `on_before_set_state` aborts the commit and
/// surfaces as the fetch's error; failures in the later hooks are logged and
/// do not undo the commit.
pub struct QueryOptions<T> {
  /// Extra attempts after a failed fetch. Most reads are triggered by
  /// explicit navigation, so the default is no retry.
  pub retry: u32,
  /// Per-query stale time overriding the store default.
  pub stale_time: Option<Duration>,
  /// Trailing-edge debounce window for [`Query::refetch`].
  pub debounce_window: std::time::Duration,
  on_before_set_state: Option<HookFn<T>>,
  on_after_set_state: Option<HookFn<T>>,
  on_success: Option<HookFn<T>>,
}

impl<T> Default for QueryOptions<T> {
  fn default() -> Self {
    Self {
      retry: 0,
      stale_time: None,
      debounce_window: std::time::Duration::from_millis(400),
      on_before_set_state: None,
      on_after_set_state: None,
      on_success: None,
    }
  }
}

impl<T> Clone for QueryOptions<T> {
  fn clone(&self) -> Self {
    Self {
      retry: self.retry,
      stale_time: self.stale_time,
      debounce_window: self.debounce_window,
      on_before_set_state: self.on_before_set_state.clone(),
      on_after_set_state: self.on_after_set_state.clone(),
      on_success: self.on_success.clone(),
    }
  }
}

impl<T> QueryOptions<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn retry(mut self, retry: u32) -> Self {
    self.retry = retry;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn debounce_window(mut self, window: std::time::Duration) -> Self {
    self.debounce_window = window;
    self
  }

  /// Hook awaited after a successful fetch, before the state commit.
  /// An error here aborts the commit.
  pub fn on_before_set_state<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(ResponseBody<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
  {
    self.on_before_set_state = Some(Arc::new(move |body| Box::pin(hook(body))));
    self
  }

  /// Hook awaited right after the state commit.
  pub fn on_after_set_state<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(ResponseBody<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
  {
    self.on_after_set_state = Some(Arc::new(move |body| Box::pin(hook(body))));
    self
  }

  /// Caller-supplied continuation, awaited last.
  pub fn on_success<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(ResponseBody<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
  {
    self.on_success = Some(Arc::new(move |body| Box::pin(hook(body))));
    self
  }
}

/// Typed view of a query's cache entry.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  /// Latest successful data; kept across later errors.
  pub data: Option<T>,
  pub error: Option<QueryError>,
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T: DeserializeOwned> QueryState<T> {
  fn from_snapshot(snapshot: &EntrySnapshot) -> Self {
    let data = snapshot
      .data
      .as_ref()
      .and_then(|value| match serde_json::from_value(value.clone()) {
        Ok(data) => Some(data),
        Err(e) => {
          warn!(error = %e, "cached value does not decode to the query's type");
          None
        }
      });
    Self {
      status: snapshot.status,
      data,
      error: snapshot.error.clone(),
      fetched_at: snapshot.fetched_at,
    }
  }
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
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

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }
}

struct DebounceInner<T> {
  deadline: Option<Instant>,
  overrides: Params,
  waiters: Vec<oneshot::Sender<QueryState<T>>>,
  running: bool,
}

impl<T> DebounceInner<T> {
  fn new() -> Self {
    Self {
      deadline: None,
      overrides: Params::new(),
      waiters: Vec::new(),
      running: false,
    }
  }
}

struct QueryShared<T> {
  store: Arc<CacheStore>,
  base_key: QueryKey,
  fetcher: FetchFn<T>,
  defaults: Params,
  options: QueryOptions<T>,
  scope: Option<Scope>,
  debounce: Mutex<DebounceInner<T>>,
  /// Internal post-commit callback (pagination metadata sync).
  after_commit: Option<AfterCommitFn<T>>,
}

/// Builder for a [`Query`].
pub struct QueryBuilder<T> {
  store: Arc<CacheStore>,
  base_key: QueryKey,
  fetcher: FetchFn<T>,
  defaults: Params,
  options: QueryOptions<T>,
  scope: Option<Scope>,
  after_commit: Option<AfterCommitFn<T>>,
}

impl<T> QueryBuilder<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub(crate) fn new<F, Fut>(store: Arc<CacheStore>, base_key: QueryKey, fetcher: F) -> Self
  where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseBody<T>, QueryError>> + Send + 'static,
  {
    Self {
      store,
      base_key,
      fetcher: Arc::new(move |params| Box::pin(fetcher(params))),
      defaults: Params::new(),
      options: QueryOptions::default(),
      scope: None,
      after_commit: None,
    }
  }

  /// Default parameters merged under every call's overrides.
  pub fn params(mut self, defaults: Params) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn options(mut self, options: QueryOptions<T>) -> Self {
    self.options = options;
    self
  }

  /// Bind the query to a scope; once it ends, pending fetches stop writing.
  pub fn scope(mut self, scope: &Scope) -> Self {
    self.scope = Some(scope.clone());
    self
  }

  pub(crate) fn after_commit(mut self, callback: AfterCommitFn<T>) -> Self {
    self.after_commit = Some(callback);
    self
  }

  /// Seed the client-configured debounce window; a later `options()` call
  /// replaces it wholesale.
  pub(crate) fn default_debounce(mut self, window: std::time::Duration) -> Self {
    self.options.debounce_window = window;
    self
  }

  pub(crate) fn default_retry(mut self, retry: u32) -> Self {
    self.options.retry = retry;
    self
  }

  pub fn build(self) -> Query<T> {
    Query {
      shared: Arc::new(QueryShared {
        store: self.store,
        base_key: self.base_key,
        fetcher: self.fetcher,
        defaults: self.defaults,
        options: self.options,
        scope: self.scope,
        debounce: Mutex::new(DebounceInner::new()),
        after_commit: self.after_commit,
      }),
    }
  }
}

/// A reusable, shareable accessor over one cached resource.
pub struct Query<T> {
  shared: Arc<QueryShared<T>>,
}

impl<T> Clone for Query<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  /// The logical (unparameterized) key this query was built with.
  pub fn key(&self) -> &QueryKey {
    &self.shared.base_key
  }

  fn lock_debounce(&self) -> MutexGuard<'_, DebounceInner<T>> {
    self
      .shared
      .debounce
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn scope_alive(&self) -> bool {
    self
      .shared
      .scope
      .as_ref()
      .map(Scope::is_alive)
      .unwrap_or(true)
  }

  /// Effective parameters and the cache key they resolve to.
  fn effective(&self, overrides: &Params) -> (Params, QueryKey) {
    let params = overrides.merged_over(&self.shared.defaults);
    let key = params.resolve_key(&self.shared.base_key);
    (params, key)
  }

  /// Current state for the default parameters, without fetching.
  pub fn state(&self) -> QueryState<T> {
    self.state_with(&Params::new())
  }

  /// Current state for the given overrides, without fetching.
  pub fn state_with(&self, overrides: &Params) -> QueryState<T> {
    let (_, key) = self.effective(overrides);
    QueryState::from_snapshot(&self.shared.store.snapshot(&key))
  }

  /// Subscribe to state changes for the default parameters.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(QueryState<T>) + Send + Sync + 'static,
  {
    self.subscribe_with(&Params::new(), callback)
  }

  /// Subscribe to state changes for the entry the overrides resolve to.
  pub fn subscribe_with<F>(&self, overrides: &Params, callback: F) -> Subscription
  where
    F: Fn(QueryState<T>) + Send + Sync + 'static,
  {
    let (_, key) = self.effective(overrides);
    Arc::clone(&self.shared.store).subscribe(&key, move |snapshot| {
      callback(QueryState::from_snapshot(snapshot))
    })
  }

  /// Fetch with the default parameters. Serves fresh cache without a network
  /// call; otherwise joins or starts a deduplicated fetch.
  pub async fn fetch(&self) -> QueryState<T> {
    self.fetch_with(Params::new()).await
  }

  /// Fetch with per-call overrides merged over the defaults. Overrides that
  /// change the effective parameters address a distinct cache entry.
  pub async fn fetch_with(&self, overrides: Params) -> QueryState<T> {
    self.fetch_inner(overrides, false).await
  }

  /// Debounced forced refetch (trailing edge).
  ///
  /// Calls within the debounce window collapse into a single network call
  /// issued with the latest call's overrides; every caller in the window
  /// observes that one call's outcome.
  pub async fn refetch(&self) -> QueryState<T> {
    self.refetch_with(Params::new()).await
  }

  /// Debounced forced refetch with overrides. See [`Query::refetch`].
  pub async fn refetch_with(&self, overrides: Params) -> QueryState<T> {
    let window = self.shared.options.debounce_window;
    let (rx, start_driver) = {
      let mut debounce = self.lock_debounce();
      debounce.deadline = Some(Instant::now() + window);
      debounce.overrides = overrides;
      let (tx, rx) = oneshot::channel();
      debounce.waiters.push(tx);
      let start = !debounce.running;
      debounce.running = true;
      (rx, start)
    };

    if start_driver {
      let query = self.clone();
      tokio::spawn(async move { query.drive_debounce().await });
    }

    match rx.await {
      Ok(state) => state,
      // Driver went away without firing (scope ended mid-window).
      Err(_) => self.state(),
    }
  }

  /// Debounce driver task: sleeps until the window closes, re-arming when new
  /// calls extend the deadline, then performs one forced fetch.
  async fn drive_debounce(&self) {
    loop {
      let deadline = match self.lock_debounce().deadline {
        Some(deadline) => deadline,
        None => return,
      };
      tokio::time::sleep_until(deadline).await;

      let fired = {
        let mut debounce = self.lock_debounce();
        let closed = debounce
          .deadline
          .map(|d| Instant::now() >= d)
          .unwrap_or(true);
        if closed {
          debounce.deadline = None;
          debounce.running = false;
          Some((
            std::mem::take(&mut debounce.overrides),
            std::mem::take(&mut debounce.waiters),
          ))
        } else {
          None
        }
      };

      if let Some((overrides, waiters)) = fired {
        debug!(key = %self.shared.base_key, callers = waiters.len(), "debounce window closed");
        let state = self.fetch_inner(overrides, true).await;
        for waiter in waiters {
          let _ = waiter.send(state.clone());
        }
        return;
      }
    }
  }

  async fn fetch_inner(&self, overrides: Params, force: bool) -> QueryState<T> {
    let (params, key) = self.effective(&overrides);

    if !self.scope_alive() {
      return QueryState::from_snapshot(&self.shared.store.snapshot(&key));
    }

    if !force
      && self
        .shared
        .store
        .is_fresh(&key, self.shared.options.stale_time)
    {
      debug!(key = %key, "serving fresh cache");
      return QueryState::from_snapshot(&self.shared.store.snapshot(&key));
    }

    match self.shared.store.begin_fetch(&key, force) {
      FetchTicket::Follower(rx) => {
        // Outcome lands in the store before waiters resolve; re-read it.
        let _ = rx.await;
        QueryState::from_snapshot(&self.shared.store.snapshot(&key))
      }
      FetchTicket::Leader { generation } => self.lead_fetch(key, params, generation).await,
    }
  }

  /// Run the network fetch as the leader and settle the entry.
  async fn lead_fetch(&self, key: QueryKey, params: Params, generation: u64) -> QueryState<T> {
    let result = self.run_fetch(&key, params).await;

    if !self.scope_alive() {
      // Owning scope unmounted while in flight: resolve silently, write nothing.
      self.shared.store.abandon(&key, generation);
      return QueryState::from_snapshot(&self.shared.store.snapshot(&key));
    }

    match result {
      Ok(body) => {
        if let Some(hook) = &self.shared.options.on_before_set_state {
          if let Err(error) = hook(body.clone()).await {
            warn!(key = %key, %error, "on_before_set_state failed, aborting commit");
            self.shared.store.settle_error(&key, generation, error);
            return QueryState::from_snapshot(&self.shared.store.snapshot(&key));
          }
        }

        let value = match serde_json::to_value(&body.data) {
          Ok(value) => value,
          Err(e) => {
            let error = QueryError::Hook(format!("response not serializable: {}", e));
            self.shared.store.settle_error(&key, generation, error);
            return QueryState::from_snapshot(&self.shared.store.snapshot(&key));
          }
        };

        let committed = self.shared.store.settle_success(&key, generation, value);
        if committed {
          if let Some(callback) = &self.shared.after_commit {
            callback(&body);
          }
          if let Some(hook) = &self.shared.options.on_after_set_state {
            if let Err(error) = hook(body.clone()).await {
              warn!(key = %key, %error, "on_after_set_state failed");
            }
          }
          if let Some(hook) = &self.shared.options.on_success {
            if let Err(error) = hook(body).await {
              warn!(key = %key, %error, "on_success continuation failed");
            }
          }
        }
        QueryState::from_snapshot(&self.shared.store.snapshot(&key))
      }
      Err(error) => {
        self.shared.store.settle_error(&key, generation, error);
        QueryState::from_snapshot(&self.shared.store.snapshot(&key))
      }
    }
  }

  async fn run_fetch(&self, key: &QueryKey, params: Params) -> Result<ResponseBody<T>, QueryError> {
    let mut attempt = 0;
    loop {
      match (self.shared.fetcher)(params.clone()).await {
        Ok(body) => return Ok(body),
        Err(error) if attempt < self.shared.options.retry => {
          attempt += 1;
          warn!(key = %key, attempt, %error, "fetch failed, retrying");
        }
        Err(error) => return Err(error),
      }
    }
  }
}

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.shared.base_key.to_string())
      .finish_non_exhaustive()
  }
}
