//! Optimistic mutations and their reconciliation.
//!
//! A mutation's optimistic entity is merged into every cache key the
//! mutation is declared to affect as soon as it is issued. The
//! authoritative answer then either replaces the placeholder in place or
//! removes it from every key at once.

use crate::cache::{CacheKey, CacheStore};
use crate::error::{Result, SyncError};
use crate::merge::MergeOutcome;
use crate::types::{Entity, Identified, PendingId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maps a mutation's variables to the cache keys it affects.
pub type KeyResolver = Arc<dyn Fn(&Value) -> Vec<CacheKey> + Send + Sync>;

struct PendingMutation {
    mutation: String,
    keys: Vec<CacheKey>,
    issued_at: Instant,
}

/// Handle for one issued mutation, consumed by its resolution.
#[derive(Debug)]
pub struct PendingHandle {
    pub id: PendingId,
    pub mutation: String,
    keys: Vec<CacheKey>,
}

impl PendingHandle {
    /// Cache keys the placeholder was merged into.
    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }
}

/// Applies optimistic values and reconciles them with the authoritative
/// result.
pub struct MutationReconciler {
    store: Arc<CacheStore>,
    declarations: RwLock<HashMap<String, KeyResolver>>,
    pending: Mutex<HashMap<PendingId, PendingMutation>>,
    next_tag: AtomicU64,
    timeout: Duration,
}

impl MutationReconciler {
    /// Create a reconciler over an initialized store.
    pub fn new(store: Arc<CacheStore>, timeout: Duration) -> Self {
        Self {
            store,
            declarations: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            timeout,
        }
    }

    /// Declare which cache keys `mutation` affects.
    pub fn declare<F>(&self, mutation: impl Into<String>, resolver: F)
    where
        F: Fn(&Value) -> Vec<CacheKey> + Send + Sync + 'static,
    {
        self.declarations
            .write()
            .insert(mutation.into(), Arc::new(resolver));
    }

    fn affected_keys(&self, mutation: &str, variables: &Value) -> Result<Vec<CacheKey>> {
        let resolver = self
            .declarations
            .read()
            .get(mutation)
            .cloned()
            .ok_or_else(|| SyncError::UndeclaredMutation(mutation.to_string()))?;
        Ok(resolver(variables))
    }

    /// Number of mutations awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Merge `optimistic` into every affected key and track the mutation.
    pub fn issue(&self, mutation: &str, variables: &Value, optimistic: Entity) -> Result<PendingHandle> {
        let keys = self.affected_keys(mutation, variables)?;
        let tag = PendingId(self.next_tag.fetch_add(1, Ordering::SeqCst));
        let placeholder = optimistic.into_pending(tag).map_err(|entity| {
            SyncError::InvalidEntity(format!(
                "optimistic {} must not carry a confirmed id",
                entity.kind()
            ))
        })?;

        self.store
            .update_many(&keys, |_, value| value.merge_entity(placeholder.clone()))?;
        self.pending.lock().insert(
            tag,
            PendingMutation {
                mutation: mutation.to_string(),
                keys: keys.clone(),
                issued_at: Instant::now(),
            },
        );
        debug!(mutation, pending = tag.0, keys = keys.len(), "mutation issued");

        Ok(PendingHandle {
            id: tag,
            mutation: mutation.to_string(),
            keys,
        })
    }

    /// Replace the placeholder with the confirmed entity in every key.
    ///
    /// Where a push already delivered the confirmed id the placeholder is
    /// discarded instead. A confirmation arriving after the mutation timed
    /// out is merged like any other incoming entity.
    pub fn on_success(&self, handle: PendingHandle, confirmed: Entity) -> Result<Vec<MergeOutcome>> {
        if confirmed.key().is_none() {
            return Err(SyncError::InvalidEntity(format!(
                "confirmed {} carries no id",
                confirmed.kind()
            )));
        }

        let tracked = self.pending.lock().remove(&handle.id).is_some();
        let result = if tracked {
            self.store.update_many(&handle.keys, |_, value| {
                value.replace_pending(handle.id, confirmed.clone())
            })
        } else {
            debug!(mutation = %handle.mutation, pending = handle.id.0, "late confirmation");
            self.store
                .update_many(&handle.keys, |_, value| value.merge_entity(confirmed.clone()))
        };

        if let Err(ref e) = result {
            error!(mutation = %handle.mutation, error = %e, "confirmation failed, rolling back");
            self.rollback(&handle.keys, handle.id);
        }
        result
    }

    /// Roll the mutation back in every affected key and return the error
    /// to surface to the caller.
    pub fn on_failure(&self, handle: PendingHandle, reason: impl Into<String>) -> SyncError {
        let reason = reason.into();
        self.pending.lock().remove(&handle.id);
        self.rollback(&handle.keys, handle.id);
        warn!(mutation = %handle.mutation, pending = handle.id.0, %reason, "mutation rolled back");

        SyncError::MutationFailure {
            mutation: handle.mutation,
            reason,
        }
    }

    fn rollback(&self, keys: &[CacheKey], tag: PendingId) {
        if let Err(e) = self
            .store
            .update_many(keys, |_, value| Ok(value.remove_pending(tag)))
        {
            error!(pending = tag.0, error = %e, "rollback failed");
        }
    }

    /// Apply a confirmed removal (e.g. a deleted or left group) to the
    /// keys `mutation` affects. Returns how many keys changed.
    pub fn apply_removal(&self, mutation: &str, variables: &Value, removed: &Entity) -> Result<usize> {
        let key = removed.key().ok_or_else(|| {
            SyncError::InvalidEntity(format!("removed {} carries no id", removed.kind()))
        })?;
        let keys = self.affected_keys(mutation, variables)?;
        self.store.remove_entity(&keys, key)
    }

    /// Roll back every mutation pending longer than the timeout.
    pub fn expire_overdue(&self) -> Vec<SyncError> {
        self.expire_overdue_at(Instant::now())
    }

    /// [`expire_overdue`](Self::expire_overdue) against an explicit clock.
    pub fn expire_overdue_at(&self, now: Instant) -> Vec<SyncError> {
        let expired: Vec<(PendingId, PendingMutation)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<PendingId> = pending
                .iter()
                .filter(|(_, m)| now.saturating_duration_since(m.issued_at) >= self.timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|m| (id, m)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(tag, m)| {
                self.rollback(&m.keys, tag);
                warn!(mutation = %m.mutation, pending = tag.0, "mutation timed out");
                SyncError::MutationFailure {
                    mutation: m.mutation,
                    reason: format!("no response within {:?}", self.timeout),
                }
            })
            .collect()
    }
}
