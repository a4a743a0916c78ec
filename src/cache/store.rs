//! The cache store: subscriptions, fetch deduplication, invalidation and GC.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

use super::entry::{EntrySnapshot, EntryState, QueryStatus};
use crate::error::QueryError;
use crate::key::QueryKey;

/// Outcome of one network fetch, shared between the leader and its followers.
pub(crate) type FetchOutcome = Result<Value, QueryError>;

type SubscriberFn = Arc<dyn Fn(&EntrySnapshot) + Send + Sync>;

/// An in-flight fetch for one key.
struct Inflight {
  /// Generation this fetch commits under. Bumped when a forced refetch
  /// supersedes it, which silently discards the older commit.
  generation: u64,
  /// Followers waiting on the leader's outcome.
  waiters: Vec<oneshot::Sender<FetchOutcome>>,
}

struct Entry {
  key: QueryKey,
  state: EntryState,
  inflight: Option<Inflight>,
  subscribers: HashMap<u64, SubscriberFn>,
}

struct Inner {
  entries: HashMap<String, Entry>,
  next_subscriber_id: u64,
}

/// Ticket handed to a fetch caller by [`CacheStore::begin_fetch`].
pub(crate) enum FetchTicket {
  /// This caller runs the network fetch and settles the entry.
  Leader { generation: u64 },
  /// Another fetch is already in flight; await its outcome.
  Follower(oneshot::Receiver<FetchOutcome>),
}

/// Process-wide (per client) cache of server state.
///
/// All mutation goes through explicit operations; subscribers are notified
/// synchronously after every committed state change. The store guarantees at
/// most one in-flight fetch per key and last-issued-wins commit ordering.
pub struct CacheStore {
  inner: Mutex<Inner>,
  stale_time: Duration,
  gc_idle: Duration,
}

impl CacheStore {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        entries: HashMap::new(),
        next_subscriber_id: 0,
      }),
      stale_time: Duration::minutes(5),
      gc_idle: Duration::minutes(10),
    }
  }

  /// Set how long committed data stays fresh.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Set how long an unsubscribed entry survives before [`sweep`](Self::sweep)
  /// collects it.
  pub fn with_gc_idle(mut self, gc_idle: Duration) -> Self {
    self.gc_idle = gc_idle;
    self
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn entry_mut<'a>(inner: &'a mut Inner, hash: &str, key: &QueryKey) -> &'a mut Entry {
    inner
      .entries
      .entry(hash.to_string())
      .or_insert_with(|| Entry {
        key: key.clone(),
        state: EntryState::new(Utc::now()),
        inflight: None,
        subscribers: HashMap::new(),
      })
  }

  /// Current view of the entry for `key`; an idle snapshot if none exists.
  pub fn snapshot(&self, key: &QueryKey) -> EntrySnapshot {
    let inner = self.lock();
    match inner.entries.get(&key.cache_hash()) {
      Some(entry) => entry.state.snapshot(self.stale_time, Utc::now()),
      None => EntrySnapshot::idle(),
    }
  }

  /// Whether `key` holds committed data that is neither invalidated nor aged
  /// past the stale time (per-query override wins over the store default).
  pub fn is_fresh(&self, key: &QueryKey, stale_override: Option<Duration>) -> bool {
    let stale_time = stale_override.unwrap_or(self.stale_time);
    let inner = self.lock();
    inner
      .entries
      .get(&key.cache_hash())
      .map(|e| {
        e.state.status == QueryStatus::Success && !e.state.is_stale(stale_time, Utc::now())
      })
      .unwrap_or(false)
  }

  /// Subscribe to state changes for `key`, creating the entry if needed.
  ///
  /// The callback runs synchronously after every committed change. Dropping
  /// the returned handle unsubscribes; once the last subscriber is gone the
  /// entry becomes eligible for garbage collection.
  pub fn subscribe<F>(self: Arc<Self>, key: &QueryKey, callback: F) -> Subscription
  where
    F: Fn(&EntrySnapshot) + Send + Sync + 'static,
  {
    let hash = key.cache_hash();
    let id = {
      let mut inner = self.lock();
      inner.next_subscriber_id += 1;
      let id = inner.next_subscriber_id;
      let entry = Self::entry_mut(&mut inner, &hash, key);
      entry.subscribers.insert(id, Arc::new(callback));
      entry.state.idle_since = None;
      id
    };
    Subscription {
      store: self,
      hash,
      id,
    }
  }

  fn unsubscribe(&self, hash: &str, id: u64) {
    let mut inner = self.lock();
    if let Some(entry) = inner.entries.get_mut(hash) {
      entry.subscribers.remove(&id);
      if entry.subscribers.is_empty() {
        entry.state.idle_since = Some(Utc::now());
      }
    }
  }

  /// Join or start a fetch for `key`.
  ///
  /// If a fetch is already in flight the caller becomes a follower sharing its
  /// outcome, unless `force` is set, in which case the running fetch is
  /// superseded: its eventual commit is discarded and its waiters roll over to
  /// the new fetch.
  pub(crate) fn begin_fetch(&self, key: &QueryKey, force: bool) -> FetchTicket {
    let hash = key.cache_hash();
    let (ticket, notify) = {
      let mut inner = self.lock();
      let stale_time = self.stale_time;
      let entry = Self::entry_mut(&mut inner, &hash, key);

      if let Some(inflight) = entry.inflight.as_mut() {
        if force {
          entry.state.issued += 1;
          inflight.generation = entry.state.issued;
          debug!(key = %key, generation = entry.state.issued, "superseding in-flight fetch");
          (
            FetchTicket::Leader {
              generation: entry.state.issued,
            },
            None,
          )
        } else {
          let (tx, rx) = oneshot::channel();
          inflight.waiters.push(tx);
          (FetchTicket::Follower(rx), None)
        }
      } else {
        entry.state.issued += 1;
        entry.inflight = Some(Inflight {
          generation: entry.state.issued,
          waiters: Vec::new(),
        });
        entry.state.status = QueryStatus::Loading;
        let subs: Vec<SubscriberFn> = entry.subscribers.values().cloned().collect();
        let snapshot = entry.state.snapshot(stale_time, Utc::now());
        (
          FetchTicket::Leader {
            generation: entry.state.issued,
          },
          Some((subs, snapshot)),
        )
      }
    };

    if let Some((subs, snapshot)) = notify {
      for sub in &subs {
        sub(&snapshot);
      }
    }
    ticket
  }

  /// Commit a successful fetch. Returns `false` if the fetch was superseded,
  /// in which case nothing is written and no waiter is resolved.
  pub(crate) fn settle_success(&self, key: &QueryKey, generation: u64, value: Value) -> bool {
    let hash = key.cache_hash();
    let settled = {
      let mut inner = self.lock();
      let stale_time = self.stale_time;
      let entry = match inner.entries.get_mut(&hash) {
        Some(entry) => entry,
        None => return false,
      };
      match entry.inflight.as_ref() {
        Some(inflight) if inflight.generation == generation => {}
        _ => {
          debug!(key = %key, generation, "discarding superseded fetch result");
          return false;
        }
      }
      let waiters = entry.inflight.take().map(|i| i.waiters).unwrap_or_default();
      entry.state.status = QueryStatus::Success;
      entry.state.data = Some(value.clone());
      entry.state.error = None;
      entry.state.fetched_at = Some(Utc::now());
      // A commit issued before the last invalidation does not clear it.
      if generation > entry.state.invalidated_issue {
        entry.state.invalidated = false;
      }
      let subs: Vec<SubscriberFn> = entry.subscribers.values().cloned().collect();
      let snapshot = entry.state.snapshot(stale_time, Utc::now());
      (waiters, subs, snapshot)
    };

    let (waiters, subs, snapshot) = settled;
    for sub in &subs {
      sub(&snapshot);
    }
    for waiter in waiters {
      let _ = waiter.send(Ok(value.clone()));
    }
    true
  }

  /// Record a failed fetch. Previous data is kept; only status and error
  /// change. Returns `false` if the fetch was superseded.
  pub(crate) fn settle_error(&self, key: &QueryKey, generation: u64, error: QueryError) -> bool {
    let hash = key.cache_hash();
    let settled = {
      let mut inner = self.lock();
      let stale_time = self.stale_time;
      let entry = match inner.entries.get_mut(&hash) {
        Some(entry) => entry,
        None => return false,
      };
      match entry.inflight.as_ref() {
        Some(inflight) if inflight.generation == generation => {}
        _ => {
          debug!(key = %key, generation, "discarding superseded fetch error");
          return false;
        }
      }
      let waiters = entry.inflight.take().map(|i| i.waiters).unwrap_or_default();
      entry.state.status = QueryStatus::Error;
      entry.state.error = Some(error.clone());
      let subs: Vec<SubscriberFn> = entry.subscribers.values().cloned().collect();
      let snapshot = entry.state.snapshot(stale_time, Utc::now());
      (waiters, subs, snapshot)
    };

    let (waiters, subs, snapshot) = settled;
    for sub in &subs {
      sub(&snapshot);
    }
    for waiter in waiters {
      let _ = waiter.send(Err(error.clone()));
    }
    true
  }

  /// Drop an in-flight fetch whose owning scope has ended.
  ///
  /// No state is written and no subscriber is notified; followers are resolved
  /// with [`QueryError::Cancelled`] so nobody awaits forever.
  pub(crate) fn abandon(&self, key: &QueryKey, generation: u64) {
    let hash = key.cache_hash();
    let waiters = {
      let mut inner = self.lock();
      let entry = match inner.entries.get_mut(&hash) {
        Some(entry) => entry,
        None => return,
      };
      match entry.inflight.as_ref() {
        Some(inflight) if inflight.generation == generation => {}
        _ => return,
      }
      let waiters = entry.inflight.take().map(|i| i.waiters).unwrap_or_default();
      // Leave the entry as it was before the fetch started.
      entry.state.status = if entry.state.data.is_some() {
        QueryStatus::Success
      } else {
        QueryStatus::Idle
      };
      waiters
    };
    for waiter in waiters {
      let _ = waiter.send(Err(QueryError::Cancelled));
    }
  }

  /// Mark every entry whose key starts with `key` as stale.
  ///
  /// Subscribers of affected entries are notified before this returns, so no
  /// read after an awaited invalidation can miss it. A fetch already in flight
  /// for a matched entry still commits, but the entry stays stale, so the next
  /// read refetches. Returns the number of entries invalidated.
  pub fn invalidate(&self, key: &QueryKey) -> usize {
    let notifications = {
      let mut inner = self.lock();
      let stale_time = self.stale_time;
      let now = Utc::now();
      let mut notifications = Vec::new();
      for entry in inner.entries.values_mut() {
        if entry.key.starts_with(key) {
          entry.state.invalidated = true;
          entry.state.invalidated_issue = entry.state.issued;
          let subs: Vec<SubscriberFn> = entry.subscribers.values().cloned().collect();
          notifications.push((subs, entry.state.snapshot(stale_time, now)));
        }
      }
      notifications
    };

    let count = notifications.len();
    debug!(key = %key, count, "invalidated cache entries");
    for (subs, snapshot) in &notifications {
      for sub in subs {
        sub(snapshot);
      }
    }
    count
  }

  /// Collect entries nobody subscribes to that have been idle longer than the
  /// configured period. Returns the number of entries removed.
  pub fn sweep(&self) -> usize {
    let mut inner = self.lock();
    let now = Utc::now();
    let gc_idle = self.gc_idle;
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| {
      let expired = entry.subscribers.is_empty()
        && entry.inflight.is_none()
        && entry
          .state
          .idle_since
          .map(|t| now - t > gc_idle)
          .unwrap_or(false);
      !expired
    });
    let removed = before - inner.entries.len();
    if removed > 0 {
      debug!(removed, "swept idle cache entries");
    }
    removed
  }

  /// Number of live entries, fresh or not.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle for one registered subscriber; unsubscribes on drop.
pub struct Subscription {
  store: Arc<CacheStore>,
  hash: String,
  id: u64,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.store.unsubscribe(&self.hash, self.id);
  }
}
