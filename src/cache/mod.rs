//! In-memory cache store for server state.
//!
//! The store owns every cache entry exclusively; consumers hold
//! subscriptions, never copies they mutate. Entries are created on first use,
//! marked stale by invalidation, and garbage-collected after a configurable
//! idle period once nothing subscribes to them.

mod entry;
mod store;

pub use entry::{EntrySnapshot, QueryStatus};
pub use store::{CacheStore, Subscription};

pub(crate) use store::FetchTicket;
