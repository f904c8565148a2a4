//! Client-side wiring: cache store, push routing and mutations.

use crate::cache::{CacheKey, CacheStore, CacheValue};
use crate::error::{Result, SyncError};
use crate::merge::MergeOutcome;
use crate::reconciler::{MutationReconciler, PendingHandle};
use crate::schema;
use crate::subscriptions::Outbound;
use crate::types::{Entity, Group, Identified, Message, RegistrationId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Max buffered notifications per cache observer.
    /// Default: 256
    pub observer_buffer_size: usize,

    /// How long a mutation may wait for an answer before it is rolled
    /// back, in milliseconds.
    /// Default: 30s
    pub mutation_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            observer_buffer_size: 256,
            mutation_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }
}

/// The client half: an injected cache store plus the machinery that
/// merges query results, pushes and mutation answers into it.
pub struct SyncClient {
    store: Arc<CacheStore>,
    reconciler: MutationReconciler,
    /// Cache keys each live registration's deliveries merge into.
    routes: RwLock<HashMap<RegistrationId, Vec<CacheKey>>>,
}

impl SyncClient {
    /// Build a client over an already-initialized store, with the chat
    /// mutations declared.
    pub fn new(store: Arc<CacheStore>, config: &ClientConfig) -> Self {
        let reconciler = MutationReconciler::new(Arc::clone(&store), config.mutation_timeout());
        schema::declare_chat_mutations(&reconciler);
        Self {
            store,
            reconciler,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// A client with a fresh store sized from `config`.
    pub fn with_config(config: &ClientConfig) -> Self {
        Self::new(
            Arc::new(CacheStore::with_observer_buffer(config.observer_buffer_size)),
            config,
        )
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &MutationReconciler {
        &self.reconciler
    }

    // --- Queries ---

    /// Store a query response.
    pub fn hydrate(&self, key: CacheKey, value: impl Into<CacheValue>) {
        self.store.write(key, value.into());
    }

    /// Merge a fetched page into `key`. `None` marks the end of the list.
    pub fn fetch_more(&self, key: &CacheKey, page: Option<Vec<Entity>>) -> Result<usize> {
        self.store.merge_page(key, page)
    }

    /// Offset to request the next page of `key` at.
    pub fn next_offset(&self, key: &CacheKey) -> usize {
        self.store.read(key).map_or(0, |entry| entry.value.next_offset())
    }

    // --- Pushes ---

    /// Merge deliveries of `registration` into `keys`.
    pub fn route(&self, registration: RegistrationId, keys: Vec<CacheKey>) {
        self.routes.write().insert(registration, keys);
    }

    /// Stop merging deliveries of `registration`.
    pub fn unroute(&self, registration: RegistrationId) -> bool {
        self.routes.write().remove(&registration).is_some()
    }

    /// Apply one message from the outbound channel.
    pub fn apply_outbound(&self, message: &Outbound) -> Result<Vec<MergeOutcome>> {
        match message {
            Outbound::Data {
                registration,
                entity,
                ..
            } => {
                let Some(keys) = self.routes.read().get(registration).cloned() else {
                    debug!(registration = registration.0, "delivery for unrouted registration");
                    return Ok(Vec::new());
                };
                self.apply_push(&keys, entity.as_ref().clone())
            }
            Outbound::Dropped { registration, reason } => {
                debug!(registration = registration.0, ?reason, "registration dropped");
                self.unroute(*registration);
                Ok(Vec::new())
            }
        }
    }

    /// Merge a pushed entity into `keys`, atomically.
    pub fn apply_push(&self, keys: &[CacheKey], entity: Entity) -> Result<Vec<MergeOutcome>> {
        if entity.key().is_none() {
            return Err(SyncError::InvalidEntity(format!(
                "pushed {} carries no id",
                entity.kind()
            )));
        }
        self.store
            .update_many(keys, |_, value| value.merge_entity(entity.clone()))
    }

    // --- Mutations ---

    /// Optimistically send a message.
    pub fn create_message(&self, draft: Message) -> Result<PendingHandle> {
        let variables = json!({ "groupId": draft.group_id.0, "text": draft.text });
        self.reconciler
            .issue(schema::CREATE_MESSAGE, &variables, draft.into())
    }

    /// Optimistically create a group.
    pub fn create_group(&self, draft: Group) -> Result<PendingHandle> {
        let user_ids: Vec<u64> = draft.members.iter().map(|u| u.0).collect();
        let variables = json!({ "name": draft.name, "userIds": user_ids });
        self.reconciler
            .issue(schema::CREATE_GROUP, &variables, draft.into())
    }

    /// The authoritative source accepted a mutation.
    pub fn confirm(&self, handle: PendingHandle, confirmed: Entity) -> Result<Vec<MergeOutcome>> {
        self.reconciler.on_success(handle, confirmed)
    }

    /// The authoritative source rejected a mutation.
    pub fn reject(&self, handle: PendingHandle, reason: impl Into<String>) -> SyncError {
        self.reconciler.on_failure(handle, reason)
    }

    /// A group was deleted (`deleteGroup`) or left (`leaveGroup`) by `user`.
    pub fn remove_group(&self, mutation: &str, group: &Group, user: UserId) -> Result<usize> {
        let id = group.id.confirmed().map(|g| g.0);
        let variables = json!({ "id": id, "userId": user.0 });
        self.reconciler
            .apply_removal(mutation, &variables, &group.clone().into())
    }

    /// Roll back mutations that waited too long.
    pub fn expire_overdue(&self) -> Vec<SyncError> {
        self.reconciler.expire_overdue()
    }
}
