//! Keyed pagination state, one slice per table identifier.
//!
//! Slices are created lazily with the configured defaults on first access and
//! revert to those defaults when the owning scope ends, so page position never
//! leaks across navigations. `total` is only ever written from fetch results
//! (via [`PaginationStore::record_result`]); every other change is an explicit
//! user-driven page or page-size update.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Pagination state for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
  /// Current page, 1-indexed.
  pub page: u32,
  /// Items per page, always > 0.
  pub page_size: u32,
  /// Items returned in the last page fetched.
  pub count: u32,
  /// Server-reported total item count.
  pub total: u64,
}

/// Defaults applied on first access and on reset.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PaginationDefaults {
  pub page: u32,
  pub page_size: u32,
}

impl Default for PaginationDefaults {
  fn default() -> Self {
    Self {
      page: 1,
      page_size: 10,
    }
  }
}

impl PaginationDefaults {
  fn initial_state(&self) -> PaginationState {
    PaginationState {
      page: self.page.max(1),
      page_size: self.page_size.max(1),
      count: 0,
      total: 0,
    }
  }
}

/// Lifetime-scoped map of pagination slices keyed by table identifier.
pub struct PaginationStore {
  defaults: PaginationDefaults,
  slices: Mutex<HashMap<String, PaginationState>>,
}

impl PaginationStore {
  pub fn new(defaults: PaginationDefaults) -> Self {
    Self {
      defaults,
      slices: Mutex::new(HashMap::new()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, PaginationState>> {
    self.slices.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current state for `table`, created with the defaults on first access.
  pub fn get(&self, table: &str) -> PaginationState {
    *self
      .lock()
      .entry(table.to_string())
      .or_insert_with(|| self.defaults.initial_state())
  }

  /// Move to page `page` (clamped to 1). Page size is unchanged.
  pub fn set_page(&self, table: &str, page: u32) -> PaginationState {
    let mut slices = self.lock();
    let state = slices
      .entry(table.to_string())
      .or_insert_with(|| self.defaults.initial_state());
    state.page = page.max(1);
    *state
  }

  /// Change the page size and reset to page 1.
  ///
  /// The reset is required: keeping the old page with a new size could
  /// address a page past the end of the collection.
  pub fn set_page_size(&self, table: &str, page_size: u32) -> PaginationState {
    let mut slices = self.lock();
    let state = slices
      .entry(table.to_string())
      .or_insert_with(|| self.defaults.initial_state());
    state.page_size = page_size.max(1);
    state.page = 1;
    *state
  }

  /// Record the outcome of a page fetch: items returned and the
  /// server-reported total. A response without a total keeps the previous one.
  pub fn record_result(&self, table: &str, count: u32, total: Option<u64>) -> PaginationState {
    let mut slices = self.lock();
    let state = slices
      .entry(table.to_string())
      .or_insert_with(|| self.defaults.initial_state());
    state.count = count;
    if let Some(total) = total {
      state.total = total;
    }
    *state
  }

  /// Revert `table` to the configured defaults.
  pub fn reset(&self, table: &str) {
    self.lock().remove(table);
  }
}
