//! UI scopes: the lifetime boundary for queries and pagination state.
//!
//! A scope models one mounted UI region (a route, a panel). Queries built
//! inside a scope stop writing state once the scope ends; a fetch that is
//! still in flight resolves silently, neither committing nor erroring.
//! Pagination slices registered with the scope revert to their defaults.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::pagination::PaginationStore;

/// Cloneable handle to one UI scope.
#[derive(Clone)]
pub struct Scope {
  alive: Arc<AtomicBool>,
  pagination: Arc<PaginationStore>,
  tables: Arc<Mutex<Vec<String>>>,
}

impl Scope {
  pub(crate) fn new(pagination: Arc<PaginationStore>) -> Self {
    Self {
      alive: Arc::new(AtomicBool::new(true)),
      pagination,
      tables: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Register a pagination slice to reset when this scope ends.
  pub(crate) fn register_table(&self, table: &str) {
    let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
    if !tables.iter().any(|t| t == table) {
      tables.push(table.to_string());
    }
  }

  /// End the scope: block further state writes from its queries and revert
  /// its pagination slices to their defaults. Idempotent.
  pub fn end(&self) {
    if !self.alive.swap(false, Ordering::SeqCst) {
      return;
    }
    let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
    for table in tables.iter() {
      self.pagination.reset(table);
    }
    debug!(tables = tables.len(), "scope ended");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pagination::PaginationDefaults;

  #[test]
  fn test_end_resets_registered_tables() {
    let pagination = Arc::new(PaginationStore::new(PaginationDefaults::default()));
    let scope = Scope::new(pagination.clone());
    scope.register_table("courses");
    pagination.set_page("courses", 9);

    scope.end();
    assert!(!scope.is_alive());
    assert_eq!(pagination.get("courses").page, 1);
  }

  #[test]
  fn test_end_is_idempotent_across_clones() {
    let pagination = Arc::new(PaginationStore::new(PaginationDefaults::default()));
    let scope = Scope::new(pagination);
    let clone = scope.clone();
    scope.end();
    clone.end();
    assert!(!clone.is_alive());
  }
}
