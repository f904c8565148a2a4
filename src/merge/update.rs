//! Identity-based merging of single entities into ordered collections.
//!
//! Whichever of a push notification and a mutation echo arrives first
//! performs the insert; the other is a no-op.

use crate::error::{Result, SyncError};
use crate::types::{Entity, Identified, PendingId};
use tracing::error;

/// Where new entries go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Newest-first (messages).
    Prepend,
    /// Insertion order (groups).
    Append,
}

impl InsertPolicy {
    /// Policy of the collection an entity kind lives in.
    pub fn for_entity(entity: &Entity) -> Self {
        match entity {
            Entity::Message(_) => InsertPolicy::Prepend,
            Entity::Group(_) | Entity::User(_) => InsertPolicy::Append,
        }
    }
}

/// What a merge did to the collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was inserted.
    Inserted,
    /// A placeholder was overwritten in place by its confirmed form.
    Replaced,
    /// The confirmed id was already present; nothing was added.
    Duplicate,
    /// The value had no collection the entity belongs in.
    NotApplicable,
}

impl MergeOutcome {
    /// Whether the collection changed.
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Replaced)
    }
}

fn insert<T>(collection: &mut Vec<T>, item: T, policy: InsertPolicy) {
    match policy {
        InsertPolicy::Prepend => collection.insert(0, item),
        InsertPolicy::Append => collection.push(item),
    }
}

/// Count entries carrying `key`, failing if the collection already holds
/// it more than once.
fn occurrences<T: Identified>(collection: &[T], key: T::Key) -> Result<usize> {
    let count = collection.iter().filter(|e| e.key() == Some(key)).count();
    if count > 1 {
        error!(key = ?key, count, "duplicate confirmed id in collection");
        return Err(SyncError::MergeInvariantViolation {
            key: key.into(),
            count,
        });
    }
    Ok(count)
}

/// Merge one entity into `collection`.
///
/// Placeholders are always inserted. A confirmed entity is inserted only
/// if its id is not already present.
pub fn merge<T: Identified>(
    collection: &mut Vec<T>,
    incoming: T,
    policy: InsertPolicy,
) -> Result<MergeOutcome> {
    let Some(key) = incoming.key() else {
        insert(collection, incoming, policy);
        return Ok(MergeOutcome::Inserted);
    };

    if occurrences(collection, key)? > 0 {
        return Ok(MergeOutcome::Duplicate);
    }
    insert(collection, incoming, policy);
    Ok(MergeOutcome::Inserted)
}

/// Swap the placeholder tagged `tag` for its confirmed form.
///
/// If the confirmed id is already present (a push raced ahead of the
/// mutation response) the placeholder is discarded instead. Without a
/// placeholder this is a plain [`merge`].
pub fn replace_pending<T: Identified>(
    collection: &mut Vec<T>,
    tag: PendingId,
    confirmed: T,
    policy: InsertPolicy,
) -> Result<MergeOutcome> {
    let key = confirmed
        .key()
        .ok_or_else(|| SyncError::InvalidEntity("confirmation carries no id".into()))?;
    let existing = occurrences(collection, key)?;

    match collection.iter().position(|e| e.pending() == Some(tag)) {
        Some(pos) if existing > 0 => {
            collection.remove(pos);
            Ok(MergeOutcome::Duplicate)
        }
        Some(pos) => {
            collection[pos] = confirmed;
            Ok(MergeOutcome::Replaced)
        }
        None => merge(collection, confirmed, policy),
    }
}

/// Remove the placeholder tagged `tag`.
pub fn remove_pending<T: Identified>(collection: &mut Vec<T>, tag: PendingId) -> bool {
    let before = collection.len();
    collection.retain(|e| e.pending() != Some(tag));
    before != collection.len()
}

/// Remove every entry with confirmed id `key`.
pub fn remove_by_key<T: Identified>(collection: &mut Vec<T>, key: T::Key) -> bool {
    let before = collection.len();
    collection.retain(|e| e.key() != Some(key));
    before != collection.len()
}
