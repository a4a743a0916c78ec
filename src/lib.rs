//! Server-state synchronization for client applications.
//!
//! `requery` keeps a client's view of server data consistent: queries fetch
//! through a shared cache with at-most-one in-flight request per key,
//! mutations declare which cached keys their writes invalidate, paginated
//! queries keep page state and server-reported totals in sync, and scopes
//! make pending work harmless once the owning UI region unmounts.
//!
//! The layer treats the transport as opaque: a fetch function takes a
//! [`Params`] map and returns a [`ResponseBody`]. Notifications go through
//! the [`Notifier`] trait; UI bindings observe state through subscriptions.
//!
//! ```ignore
//! let client = QueryClient::new(ClientConfig::default()).with_notifier(Arc::new(Toasts));
//! let scope = client.scope();
//!
//! let courses = client
//!   .paginated(QueryKey::new("courses"), fetch_courses)
//!   .table("courses")
//!   .scope(&scope)
//!   .build();
//!
//! courses.fetch_page(2).await;
//!
//! let publish = client
//!   .mutation(publish_course)
//!   .invalidates(QueryKey::new("courses"))
//!   .success_message("Course published")
//!   .build();
//! publish.mutate(Params::new().with("id", 7)).await?;
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod key;
pub mod mutation;
pub mod paginated;
pub mod pagination;
pub mod params;
pub mod query;
pub mod scope;

pub use cache::{CacheStore, EntrySnapshot, QueryStatus, Subscription};
pub use client::{ClientConfig, QueryClient};
pub use error::{QueryError, GENERIC_ERROR};
pub use key::{QueryKey, Segment};
pub use mutation::{Mutation, MutationBuilder, Notifier, NoopNotifier, DEFAULT_SUCCESS_MESSAGE};
pub use paginated::{PaginatedQuery, PaginatedQueryBuilder};
pub use pagination::{PaginationDefaults, PaginationState, PaginationStore};
pub use params::Params;
pub use query::{Query, QueryBuilder, QueryOptions, QueryState, ResponseBody};
pub use scope::Scope;
