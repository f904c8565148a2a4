//! Merge algorithms shared by every cache call site.
//!
//! - [`merge`] inserts one entity with identity-based deduplication
//! - [`replace_pending`] reconciles a placeholder with its confirmed form
//! - [`merge_page`] extends a list with a fetched page
//!
//! All functions are generic over [`Identified`](crate::types::Identified),
//! so the same code handles message lists, group lists and mixed entity
//! collections.

mod pagination;
mod update;

pub use pagination::{merge_page, next_offset};
pub use update::{
    merge, remove_by_key, remove_pending, replace_pending, InsertPolicy, MergeOutcome,
};
