//! The client-side cache store.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{
    CacheEntry, CacheKey, CacheNotification, CacheObserver, CacheValue, ObserverId,
};
use crate::error::Result;
use crate::merge::MergeOutcome;
use crate::types::{Entity, EntityKey};

/// Default observer buffer (notifications).
const DEFAULT_OBSERVER_BUFFER: usize = 256;

struct Observer {
    id: ObserverId,
    sender: Sender<CacheNotification>,
}

/// Maps query identities to their last known results.
///
/// Every change goes through [`CacheStore::update_many`], which applies
/// closures to working copies under the write lock and commits all of
/// them or none. Observers are notified while the lock is held, so they
/// see changes to a key in commit order.
///
/// Lock order is `entries` before `observers`.
pub struct CacheStore {
    entries: RwLock<HashMap<CacheKey, CacheValue>>,
    observers: Mutex<HashMap<CacheKey, Vec<Observer>>>,
    next_observer: AtomicU64,
    observer_buffer: usize,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_observer_buffer(DEFAULT_OBSERVER_BUFFER)
    }

    /// Create an empty store whose observers buffer `size` notifications.
    pub fn with_observer_buffer(size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
            observer_buffer: size.max(1),
        }
    }

    // --- Reads ---

    /// Read the current entry for `key`.
    pub fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .get(key)
            .map(|value| CacheEntry::new(key.clone(), value.clone()))
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // --- Writes ---

    /// Store a query result, replacing whatever `key` held.
    pub fn write(&self, key: CacheKey, value: CacheValue) {
        let mut entries = self.entries.write();
        self.notify(&key, || CacheNotification::Updated(CacheEntry::new(key.clone(), value.clone())));
        entries.insert(key, value);
    }

    /// Drop a cached result. Observers are told to re-fetch.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.remove(key).is_some();
        if removed {
            debug!(%key, "cache entry invalidated");
            self.notify(key, || CacheNotification::Invalidated(key.clone()));
        }
        removed
    }

    /// Atomically apply `f` to one key. Returns `None` if the key is absent.
    pub fn update<F, R>(&self, key: &CacheKey, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut CacheValue) -> Result<R>,
    {
        let mut f = Some(f);
        let mut results = self.update_many(std::slice::from_ref(key), |_, value| {
            // Called at most once for a single key.
            match f.take() {
                Some(f) => f(value).map(Some),
                None => Ok(None),
            }
        })?;
        Ok(results.pop().flatten())
    }

    /// Atomically apply `f` to every present key in `keys`.
    ///
    /// Absent keys are skipped. If `f` fails for any key nothing is
    /// committed. Returns one result per present key, in `keys` order.
    pub fn update_many<F, R>(&self, keys: &[CacheKey], mut f: F) -> Result<Vec<R>>
    where
        F: FnMut(&CacheKey, &mut CacheValue) -> Result<R>,
    {
        let mut entries = self.entries.write();
        let mut staged: Vec<(CacheKey, CacheValue)> = Vec::new();
        let mut results = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                continue;
            }
            let Some(current) = entries.get(key) else {
                continue;
            };
            let mut working = current.clone();
            results.push(f(key, &mut working)?);
            if working != *current {
                staged.push((key.clone(), working));
            }
        }

        for (key, value) in staged {
            self.notify(&key, || CacheNotification::Updated(CacheEntry::new(key.clone(), value.clone())));
            entries.insert(key, value);
        }

        Ok(results)
    }

    /// Merge one incoming entity into `key`.
    pub fn merge_entity(&self, key: &CacheKey, entity: Entity) -> Result<MergeOutcome> {
        Ok(self
            .update(key, |value| value.merge_entity(entity))?
            .unwrap_or(MergeOutcome::NotApplicable))
    }

    /// Extend `key`'s paginated list with a fetched page.
    pub fn merge_page(&self, key: &CacheKey, page: Option<Vec<Entity>>) -> Result<usize> {
        Ok(self.update(key, |value| value.merge_page(page))?.unwrap_or(0))
    }

    /// Remove a confirmed entity from every key in `keys`.
    pub fn remove_entity(&self, keys: &[CacheKey], entity: EntityKey) -> Result<usize> {
        let removed = self.update_many(keys, |_, value| Ok(value.remove_entity(entity)))?;
        Ok(removed.into_iter().filter(|r| *r).count())
    }

    // --- Observation ---

    /// Observe changes to `key`.
    pub fn observe(&self, key: &CacheKey) -> CacheObserver {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.observer_buffer);
        self.observers
            .lock()
            .entry(key.clone())
            .or_default()
            .push(Observer { id, sender });

        CacheObserver {
            id,
            key: key.clone(),
            receiver,
        }
    }

    /// Stop an observation.
    pub fn unobserve(&self, observer: &CacheObserver) -> bool {
        let mut observers = self.observers.lock();
        let Some(list) = observers.get_mut(&observer.key) else {
            return false;
        };
        let before = list.len();
        list.retain(|o| o.id != observer.id);
        let removed = before != list.len();
        if list.is_empty() {
            observers.remove(&observer.key);
        }
        removed
    }

    /// Number of live observers of `key`.
    pub fn observer_count(&self, key: &CacheKey) -> usize {
        self.observers.lock().get(key).map_or(0, Vec::len)
    }

    /// Notify observers of `key`. Observers that cannot keep up are dropped.
    fn notify<F>(&self, key: &CacheKey, make: F)
    where
        F: Fn() -> CacheNotification,
    {
        let mut observers = self.observers.lock();
        let Some(list) = observers.get_mut(key) else {
            return;
        };

        list.retain(|observer| match observer.sender.try_send(make()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%key, observer = observer.id.0, "dropping slow cache observer");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if list.is_empty() {
            observers.remove(key);
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
