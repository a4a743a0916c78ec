//! Cache entry state and the snapshots handed out to subscribers.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::QueryError;

/// The lifecycle status of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// No fetch has been started
  Idle,
  /// A fetch is in flight
  Loading,
  /// The last fetch succeeded
  Success,
  /// The last fetch failed
  Error,
}

/// An immutable view of one cache entry.
///
/// Snapshots are what subscribers receive on every committed state change and
/// what query handles decode their typed state from.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
  pub status: QueryStatus,
  /// Latest successful response data, kept across later errors.
  pub data: Option<Value>,
  pub error: Option<QueryError>,
  /// When the data was last committed.
  pub fetched_at: Option<DateTime<Utc>>,
  /// Whether the entry has been invalidated or aged past its stale time.
  pub is_stale: bool,
}

impl EntrySnapshot {
  pub(crate) fn idle() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      is_stale: false,
    }
  }
}

/// Internal entry state, owned exclusively by the store.
#[derive(Debug)]
pub(crate) struct EntryState {
  pub status: QueryStatus,
  pub data: Option<Value>,
  pub error: Option<QueryError>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub invalidated: bool,
  /// Highest issued generation at the time of the last invalidation. A commit
  /// from a generation at or below this leaves the entry stale.
  pub invalidated_issue: u64,
  /// Generation of the most recently issued fetch. Commits from older
  /// generations are discarded (last-issued-wins).
  pub issued: u64,
  /// Set while no subscriber holds the entry; drives garbage collection.
  pub idle_since: Option<DateTime<Utc>>,
}

impl EntryState {
  pub fn new(now: DateTime<Utc>) -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      invalidated: false,
      invalidated_issue: 0,
      issued: 0,
      idle_since: Some(now),
    }
  }

  pub fn is_stale(&self, stale_time: Duration, now: DateTime<Utc>) -> bool {
    if self.invalidated {
      return true;
    }
    match self.status {
      QueryStatus::Success => self
        .fetched_at
        .map(|t| now - t > stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  pub fn snapshot(&self, stale_time: Duration, now: DateTime<Utc>) -> EntrySnapshot {
    EntrySnapshot {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      is_stale: self.is_stale(stale_time, now),
    }
  }
}
