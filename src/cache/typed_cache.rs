//! Generic single-flight, content-addressed cache (spec §4.1).

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{CacheError, SerializationError};
use crate::hash::Fingerprint;
use crate::lifetime::{ResourceScope, SharedHandle};

/// Name, persistence and teardown surface every concrete cache exposes to
/// the registry, independent of its value/parameter types (spec §6.2).
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// Destroy every entry's GPU-owned resources. Must run before the owning
    /// device is destroyed.
    fn cleanup(&self);

    /// Persist this cache's entries to `path`. A no-op that reports success
    /// is a valid implementation for caches with nothing worth persisting.
    fn serialize_to(&self, path: &Path) -> Result<bool, SerializationError>;

    /// Load previously persisted entries from `path`, rematerialising GPU
    /// resources as needed. A no-op that reports success (nothing to load)
    /// is a valid implementation.
    fn deserialize_from(&self, path: &Path) -> Result<bool, SerializationError>;

    fn as_any(&self) -> &dyn Any;
}

/// A single in-flight `get_or_create` call; awaiters block on `wait` rather
/// than the cache's own locks.
struct Promise<V: Send + 'static> {
    result: Mutex<Option<Result<SharedHandle<V>, CacheError>>>,
    condvar: Condvar,
}

impl<V: Send + 'static> Promise<V> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<SharedHandle<V>, CacheError> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            self.condvar.wait(&mut guard);
        }
    }

    fn complete(&self, result: Result<SharedHandle<V>, CacheError>) {
        *self.result.lock() = Some(result);
        self.condvar.notify_all();
    }
}

enum Claim<V: Send + 'static> {
    Winner(Arc<Promise<V>>),
    Waiter(Arc<Promise<V>>),
}

/// Content-addressed store of `SharedHandle<V>`, keyed by a [`Fingerprint`]
/// computed from `P` by the owning concrete cache. Construction is
/// single-flight: concurrent `get_or_create` calls for the same key share
/// one in-flight `Create`.
pub struct TypedCache<V: Send + Sync + 'static, P: Clone + PartialEq + Send + Sync + 'static> {
    name: String,
    entries: RwLock<HashMap<Fingerprint, (P, SharedHandle<V>)>>,
    pending: Mutex<HashMap<Fingerprint, Arc<Promise<V>>>>,
}

impl<V: Send + Sync + 'static, P: Clone + PartialEq + Send + Sync + 'static> TypedCache<V, P> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fast_path(&self, key: Fingerprint, params: &P) -> Option<SharedHandle<V>> {
        let entries = self.entries.read();
        let (existing_params, handle) = entries.get(&key)?;
        self.debug_check_collision(key, existing_params, params);
        Some(handle.clone())
    }

    /// Debug-only collision guard: the same key must always map to equal
    /// params. A divergence here means the key function is not injective
    /// enough for this cache's identity fields (spec §4.1 collision
    /// detection, realised here as direct `P` comparison rather than a
    /// secondary hash, an equivalent guarantee with no extra hashing pass).
    #[cfg(debug_assertions)]
    fn debug_check_collision(&self, key: Fingerprint, existing: &P, incoming: &P) {
        debug_assert!(
            existing == incoming,
            "cache key collision in '{}': key {:016x} maps to two different parameter sets",
            self.name,
            key
        );
    }

    #[cfg(not(debug_assertions))]
    fn debug_check_collision(&self, _key: Fingerprint, _existing: &P, _incoming: &P) {}

    fn claim_or_wait(&self, key: Fingerprint) -> Claim<V> {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(&key) {
            Claim::Waiter(Arc::clone(existing))
        } else {
            let promise = Arc::new(Promise::new());
            pending.insert(key, Arc::clone(&promise));
            Claim::Winner(promise)
        }
    }

    /// `get_or_create` per spec §4.1: shared-lock fast path, single-flight
    /// coalescing for concurrent misses, then `create` runs with no locks
    /// held.
    pub fn get_or_create(
        &self,
        key: Fingerprint,
        params: P,
        scope: ResourceScope,
        create: impl FnOnce(&P) -> Result<V, CacheError>,
    ) -> Result<SharedHandle<V>, CacheError> {
        if let Some(handle) = self.fast_path(key, &params) {
            return Ok(handle);
        }

        match self.claim_or_wait(key) {
            Claim::Waiter(promise) => promise.wait(),
            Claim::Winner(promise) => {
                // Another thread may have inserted between our fast-path
                // miss and winning the claim.
                if let Some(handle) = self.fast_path(key, &params) {
                    self.pending.lock().remove(&key);
                    promise.complete(Ok(handle.clone()));
                    return Ok(handle);
                }

                let result = create(&params).map(|value| SharedHandle::new(value, scope));
                if let Ok(handle) = &result {
                    self.entries.write().insert(key, (params.clone(), handle.clone()));
                }
                self.pending.lock().remove(&key);
                promise.complete(result.clone());
                result
            }
        }
    }

    pub fn has(&self, key: Fingerprint) -> bool {
        self.entries.read().contains_key(&key)
    }

    pub fn get(&self, key: Fingerprint) -> Option<SharedHandle<V>> {
        self.entries.read().get(&key).map(|(_, handle)| handle.clone())
    }

    /// Like [`Self::get`], but also returns the identity params the entry was
    /// created with, used by persistable caches whose `serialize_to` needs
    /// to round-trip more than just the key (e.g. [`crate::cache::shader_compilation`]).
    pub fn get_with_params(&self, key: Fingerprint) -> Option<(P, SharedHandle<V>)> {
        self.entries.read().get(&key).map(|(params, handle)| (params.clone(), handle.clone()))
    }

    pub fn erase(&self, key: Fingerprint) -> bool {
        self.entries.write().remove(&key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Low-level insertion path used while deserialising a persisted cache:
    /// no single-flight coalescing, the caller is assumed to hold whatever
    /// exclusivity the load path needs.
    pub fn insert(&self, key: Fingerprint, params: P, value: V, scope: ResourceScope) -> SharedHandle<V> {
        let handle = SharedHandle::new(value, scope);
        self.entries.write().insert(key, (params, handle.clone()));
        handle
    }

    /// Run `destroy` against every entry's payload, then drop all entries.
    pub fn cleanup_with(&self, mut destroy: impl FnMut(&V)) {
        let entries = self.entries.read();
        for (_, handle) in entries.values() {
            handle.with(|v| destroy(v));
        }
        drop(entries);
        self.clear();
    }

    pub fn keys(&self) -> Vec<Fingerprint> {
        self.entries.read().keys().copied().collect()
    }
}
