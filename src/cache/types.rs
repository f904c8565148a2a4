//! Cache keys, values and entries.

use crate::types::{Entity, Identified};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identity of one cached query result: operation name plus variables.
///
/// Variables are stored in canonical JSON (object keys sorted) so equal
/// variable sets always produce equal keys.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub operation: String,
    pub variables: String,
}

impl CacheKey {
    pub fn new(operation: impl Into<String>, variables: &Value) -> Self {
        Self {
            operation: operation.into(),
            variables: canonical(variables).to_string(),
        }
    }

    /// Decode the variables back into JSON.
    pub fn variables(&self) -> crate::error::Result<Value> {
        Ok(serde_json::from_str(&self.variables)?)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({}{})", self.operation, self.variables)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.variables)
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// The last known result of a query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum CacheValue {
    /// A single entity (e.g. `group(id)` with its message page).
    Entity(Entity),
    /// An ordered list of entities.
    Collection(Vec<Entity>),
}

impl CacheValue {
    /// Whether the value holds any optimistic placeholder.
    pub fn has_pending(&self) -> bool {
        fn entity_pending(entity: &Entity) -> bool {
            entity.pending().is_some()
                || matches!(entity, Entity::Group(g) if g.messages.iter().any(|m| m.pending().is_some()))
        }

        match self {
            CacheValue::Entity(entity) => entity_pending(entity),
            CacheValue::Collection(items) => items.iter().any(entity_pending),
        }
    }
}

impl From<Entity> for CacheValue {
    fn from(entity: Entity) -> Self {
        CacheValue::Entity(entity)
    }
}

impl From<Vec<Entity>> for CacheValue {
    fn from(items: Vec<Entity>) -> Self {
        CacheValue::Collection(items)
    }
}

/// A cached value as seen by readers and observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CacheValue,
    /// True while an optimistic placeholder is present.
    pub pending: bool,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: CacheValue) -> Self {
        let pending = value.has_pending();
        Self {
            key,
            value,
            pending,
        }
    }
}

/// Notifications delivered to observers of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheNotification {
    /// The key holds a new value.
    Updated(CacheEntry),
    /// The key was invalidated and must be re-fetched.
    Invalidated(CacheKey),
}

/// Identifier of one observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Receiving end of an observation.
pub struct CacheObserver {
    pub id: ObserverId,
    pub key: CacheKey,
    /// Channel to receive notifications.
    pub receiver: crossbeam_channel::Receiver<CacheNotification>,
}

impl CacheObserver {
    /// Receive the next notification (blocking).
    pub fn recv(&self) -> Result<CacheNotification, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification (non-blocking).
    pub fn try_recv(&self) -> Result<CacheNotification, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<CacheNotification, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<CacheNotification> {
        self.receiver.try_iter().collect()
    }
}
