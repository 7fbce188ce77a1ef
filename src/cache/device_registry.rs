//! Per-device collection of caches, manifest-driven save/load (spec §4.4,
//! §6.2, §6.3).

use std::any::Any;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::RwLock;

use super::typed_cache::Cache;
use crate::device::Device;
use crate::device_id::DeviceId;
use crate::lifetime::DeferredDestroyQueue;

const MANIFEST_FILE: &str = "cacher_registry.txt";

/// Type-erased storage for one registered cache instance: a `dyn Cache`
/// handle for generic operations plus the same `Arc<C>` boxed as `Any` so
/// [`DeviceRegistry::get_or_create_cache`] can hand back the concrete type.
pub(crate) struct CacheSlot {
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) typed: Box<dyn Any + Send + Sync>,
}

impl CacheSlot {
    pub(crate) fn new<C: Cache + 'static>(cache: Arc<C>) -> Self {
        Self {
            cache: cache.clone() as Arc<dyn Cache>,
            typed: Box::new(cache),
        }
    }
}

/// Owns every cache instance bound to one physical device, plus the frame
/// counter and deferred-destroy queue they share.
pub struct DeviceRegistry {
    device: Arc<Device>,
    pub(crate) caches: RwLock<Vec<CacheSlot>>,
    current_frame: Arc<AtomicU64>,
    destroy_queue: Arc<DeferredDestroyQueue>,
}

impl DeviceRegistry {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            caches: RwLock::new(Vec::new()),
            current_frame: Arc::new(AtomicU64::new(0)),
            destroy_queue: Arc::new(DeferredDestroyQueue::default()),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn current_frame(&self) -> &Arc<AtomicU64> {
        &self.current_frame
    }

    pub fn destroy_queue(&self) -> &Arc<DeferredDestroyQueue> {
        &self.destroy_queue
    }

    /// Linear search by downcast for an existing instance of `C`. Does not
    /// construct one, that is `CacheRegistry::get_cache`'s job.
    pub fn get_or_create_cache<C: Cache + 'static>(&self) -> Option<Arc<C>> {
        self.caches
            .read()
            .iter()
            .find_map(|slot| slot.typed.downcast_ref::<Arc<C>>().cloned())
    }

    pub(crate) fn push_cache(&self, slot: CacheSlot) {
        self.caches.write().push(slot);
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.caches.read().iter().map(|slot| slot.cache.name().to_string()).collect()
    }

    /// Write the manifest then every cache's `.cache` body under `dir`.
    /// Success is the conjunction of every write.
    pub fn save_all(&self, dir: &Path) -> bool {
        if fs::create_dir_all(dir).is_err() {
            return false;
        }
        let caches = self.caches.read();
        let manifest = caches
            .iter()
            .map(|slot| slot.cache.name().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if fs::write(dir.join(MANIFEST_FILE), manifest).is_err() {
            return false;
        }

        caches.iter().all(|slot| {
            let path = dir.join(format!("{}.cache", slot.cache.name()));
            slot.cache.serialize_to(&path).unwrap_or(false)
        })
    }

    /// Read the manifest; for each name not yet present, ask `registry` to
    /// factory-construct it into `self`. Then deserialize every cache.
    pub fn load_all(&self, dir: &Path, registry: &super::registry::CacheRegistry) -> bool {
        let Ok(manifest) = fs::read_to_string(dir.join(MANIFEST_FILE)) else {
            return false;
        };

        for name in manifest.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if self.caches.read().iter().any(|slot| slot.cache.name() == name) {
                continue;
            }
            if let Some(slot) = registry.create_cache_slot_by_name(name, &self.device) {
                self.push_cache(slot);
            }
        }

        let caches = self.caches.read();
        caches.iter().all(|slot| {
            let path = dir.join(format!("{}.cache", slot.cache.name()));
            if !path.exists() {
                return true;
            }
            slot.cache.deserialize_from(&path).unwrap_or(false)
        })
    }

    /// Run every cache's `cleanup()`, then drop them. Must run before the
    /// device itself is destroyed.
    pub fn clear(&self) {
        let caches = self.caches.write();
        for slot in caches.iter() {
            slot.cache.cleanup();
        }
        drop(caches);
        self.caches.write().clear();
    }
}
