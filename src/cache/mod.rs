//! Client-side cache of query results.
//!
//! The store owns every entry exclusively. All changes are applied through
//! the merge functions in [`crate::merge`], atomically per key set, and
//! pushed to observers as [`CacheNotification`]s. Readers only ever see
//! committed values.

mod store;
mod types;
mod value;

pub use store::CacheStore;
pub use types::{CacheEntry, CacheKey, CacheNotification, CacheObserver, CacheValue, ObserverId};
