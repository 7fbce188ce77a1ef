//! Process-wide cache registration and lookup (spec §4.4, §6.2).

use std::any::TypeId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::device_registry::{CacheSlot, DeviceRegistry};
use super::typed_cache::Cache;
use crate::device::Device;
use crate::device_id::DeviceId;

/// Aggregate counts surfaced by [`CacheRegistry::get_stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub global_caches: usize,
    pub device_registries: usize,
    pub total_device_caches: usize,
}

/// A cache's construction recipe. Device-dependent caches are handed the
/// `Arc<Device>` they're being materialised for at construction time, rather
/// than capturing one device at registration time. Registration happens
/// once per process, but `get_cache` may be asked to materialise the same
/// cache type against many different devices over the run.
#[derive(Clone)]
enum Factory {
    Device(Arc<dyn Fn(&Arc<Device>) -> CacheSlot + Send + Sync>),
    Global(Arc<dyn Fn() -> CacheSlot + Send + Sync>),
}

struct Registration {
    name: String,
    device_dependent: bool,
    factory: Factory,
}

/// Process-wide, thread-safe registry of cache *types* (via `register`) and
/// the live instances materialised from them, either globally (device
/// independent) or per [`DeviceRegistry`].
#[derive(Default)]
pub struct CacheRegistry {
    registrations: RwLock<HashMap<TypeId, Registration>>,
    name_to_tag: RwLock<HashMap<String, TypeId>>,
    device_registries: RwLock<HashMap<DeviceId, Arc<DeviceRegistry>>>,
    global_caches: RwLock<HashMap<TypeId, CacheSlot>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device-dependent cache type `C`. `factory` is invoked once
    /// per physical device this cache type is ever requested against,
    /// receiving the `Arc<Device>` to construct against. It is NOT called
    /// at registration time, so one registration serves every device the
    /// process ever opens. Idempotent on a duplicate registration (later
    /// calls are silently ignored, matching spec §4.4).
    pub fn register<C: Cache + 'static>(
        &self,
        name: impl Into<String>,
        factory: impl Fn(&Arc<Device>) -> C + Send + Sync + 'static,
    ) {
        let factory = Factory::Device(Arc::new(move |device| {
            CacheSlot::new(Arc::new(factory(device)))
        }));
        self.register_with_tag(TypeId::of::<C>(), name, true, factory);
    }

    /// Register a device-independent ("global") cache type `C`, shared
    /// across every device in the process (e.g. the SPIR-V-only shader
    /// compilation cache).
    pub fn register_global<C: Cache + 'static>(
        &self,
        name: impl Into<String>,
        factory: impl Fn() -> C + Send + Sync + 'static,
    ) {
        let factory = Factory::Global(Arc::new(move || CacheSlot::new(Arc::new(factory()))));
        self.register_with_tag(TypeId::of::<C>(), name, false, factory);
    }

    fn register_with_tag(&self, tag: TypeId, name: impl Into<String>, device_dependent: bool, factory: Factory) {
        if self.registrations.read().contains_key(&tag) {
            return;
        }
        let name = name.into();
        self.name_to_tag.write().insert(name.clone(), tag);
        self.registrations.write().insert(
            tag,
            Registration {
                name,
                device_dependent,
                factory,
            },
        );
    }

    pub fn is_registered<C: 'static>(&self) -> bool {
        self.registrations.read().contains_key(&TypeId::of::<C>())
    }

    pub fn is_device_dependent<C: 'static>(&self) -> bool {
        self.registrations
            .read()
            .get(&TypeId::of::<C>())
            .map(|r| r.device_dependent)
            .unwrap_or(false)
    }

    pub fn get_type_name<C: 'static>(&self) -> Option<String> {
        self.registrations.read().get(&TypeId::of::<C>()).map(|r| r.name.clone())
    }

    fn device_registry(&self, device: &Arc<Device>) -> Arc<DeviceRegistry> {
        let id = device.id();
        if let Some(existing) = self.device_registries.read().get(&id) {
            return Arc::clone(existing);
        }
        let mut registries = self.device_registries.write();
        Arc::clone(
            registries
                .entry(id)
                .or_insert_with(|| Arc::new(DeviceRegistry::new(Arc::clone(device)))),
        )
    }

    /// Route to the device-dependent or global path based on how `C` was
    /// registered, constructing a fresh instance on first access. `device`
    /// must be `Some` for device-dependent cache types; it is ignored for
    /// global ones.
    pub fn get_cache<C: Cache + 'static>(&self, device: Option<&Arc<Device>>) -> Option<Arc<C>> {
        let tag = TypeId::of::<C>();
        let (device_dependent, factory) = {
            let registrations = self.registrations.read();
            let registration = registrations.get(&tag)?;
            (registration.device_dependent, registration.factory.clone())
        };

        if device_dependent {
            let device = device?;
            let device_registry = self.device_registry(device);
            if let Some(existing) = device_registry.get_or_create_cache::<C>() {
                return Some(existing);
            }
            let Factory::Device(make_slot) = factory else {
                return None;
            };
            let slot = make_slot(device);
            let typed = slot.typed.downcast_ref::<Arc<C>>().cloned();
            device_registry.push_cache(slot);
            typed
        } else {
            let mut globals = self.global_caches.write();
            if let Some(slot) = globals.get(&tag) {
                return slot.typed.downcast_ref::<Arc<C>>().cloned();
            }
            let Factory::Global(make_slot) = factory else {
                return None;
            };
            let slot = make_slot();
            let typed = slot.typed.downcast_ref::<Arc<C>>().cloned();
            globals.insert(tag, slot);
            typed
        }
    }

    /// Manifest-driven construction by registered name, used by
    /// `DeviceRegistry::load_all`. `device` is the registry's own device,
    /// used only if the named cache turns out to be device-dependent.
    pub(crate) fn create_cache_slot_by_name(&self, name: &str, device: &Arc<Device>) -> Option<CacheSlot> {
        let tag = *self.name_to_tag.read().get(name)?;
        let factory = self.registrations.read().get(&tag)?.factory.clone();
        match factory {
            Factory::Device(make_slot) => Some(make_slot(device)),
            Factory::Global(make_slot) => Some(make_slot()),
        }
    }

    /// Calls every cache's `cleanup()` on `device`'s registry, then removes
    /// it. Must run before the device itself is destroyed.
    pub fn clear_device_caches(&self, device: DeviceId) {
        if let Some(registry) = self.device_registries.write().remove(&device) {
            registry.clear();
        }
    }

    pub fn clear_global_caches(&self) {
        let globals = std::mem::take(&mut *self.global_caches.write());
        for slot in globals.into_values() {
            slot.cache.cleanup();
        }
    }

    pub fn clear_all(&self) {
        let devices: Vec<DeviceId> = self.device_registries.read().keys().copied().collect();
        for device in devices {
            self.clear_device_caches(device);
        }
        self.clear_global_caches();
    }

    pub fn save_all(&self, root: &Path) -> bool {
        let mut ok = true;
        {
            let globals = self.global_caches.read();
            let dir = root.join("global");
            if std::fs::create_dir_all(&dir).is_ok() {
                for slot in globals.values() {
                    let path = dir.join(format!("{}.cache", slot.cache.name()));
                    ok &= slot.cache.serialize_to(&path).unwrap_or(false);
                }
            } else {
                ok = false;
            }
        }
        let devices = self.device_registries.read();
        for (device_id, registry) in devices.iter() {
            let dir = root.join("devices").join(device_id.directory_name());
            ok &= registry.save_all(&dir);
        }
        ok
    }

    /// Load every global cache's persisted state, plus every *already-open*
    /// device's (i.e. one whose `DeviceRegistry` already exists because the
    /// application called `get_cache` against it earlier in this process).
    ///
    /// A `devices/Device_0x...` directory with no live `DeviceRegistry` is
    /// skipped rather than speculatively opened: reconstructing the device
    /// itself (instance, physical device, logical device) is outside this
    /// crate's scope (spec §1), so loading only ever rehydrates caches for a
    /// device the application has already brought up. Use
    /// [`Self::load_for_device`] to load a single device's caches right
    /// after opening it.
    pub fn load_all(&self, root: &Path) -> bool {
        let mut ok = true;
        let global_dir = root.join("global");
        if global_dir.is_dir() {
            let globals = self.global_caches.read();
            for slot in globals.values() {
                let path = global_dir.join(format!("{}.cache", slot.cache.name()));
                if path.exists() {
                    ok &= slot.cache.deserialize_from(&path).unwrap_or(false);
                }
            }
        }

        let devices_dir = root.join("devices");
        let Ok(entries) = std::fs::read_dir(&devices_dir) else {
            return ok;
        };
        for entry in entries.flatten() {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            let device_id = DeviceId::from_directory_name(&file_name);
            if !device_id.is_valid() {
                continue;
            }
            let Some(registry) = self.device_registries.read().get(&device_id).cloned() else {
                log::trace!("skipping persisted caches for {device_id}: device not yet open");
                continue;
            };
            ok &= registry.load_all(&entry.path(), self);
        }
        ok
    }

    /// Load `device`'s persisted caches from `<root>/devices/Device_0x.../`,
    /// creating its `DeviceRegistry` if this is the first access.
    pub fn load_for_device(&self, device: &Arc<Device>, root: &Path) -> bool {
        let registry = self.device_registry(device);
        let dir = root.join("devices").join(device.id().directory_name());
        if !dir.is_dir() {
            return true;
        }
        registry.load_all(&dir, self)
    }

    pub fn get_registered_types(&self) -> Vec<String> {
        self.registrations.read().values().map(|r| r.name.clone()).collect()
    }

    pub fn get_active_devices(&self) -> Vec<DeviceId> {
        self.device_registries.read().keys().copied().collect()
    }

    pub fn get_stats(&self) -> RegistryStats {
        let devices = self.device_registries.read();
        RegistryStats {
            global_caches: self.global_caches.read().len(),
            device_registries: devices.len(),
            total_device_caches: devices.values().map(|r| r.cache_names().len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerializationError;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A trivial device-independent cache, used to exercise
    /// registration/lookup without needing a real `ash::Device`.
    struct CounterCache {
        constructions: Arc<AtomicUsize>,
    }

    impl Cache for CounterCache {
        fn name(&self) -> &str {
            "CounterCache"
        }
        fn cleanup(&self) {}
        fn serialize_to(&self, _path: &Path) -> Result<bool, SerializationError> {
            Ok(true)
        }
        fn deserialize_from(&self, _path: &Path) -> Result<bool, SerializationError> {
            Ok(true)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn global_registration_is_idempotent_and_singleton() {
        let registry = CacheRegistry::new();
        let constructions = Arc::new(AtomicUsize::new(0));

        let register = |registry: &CacheRegistry, constructions: &Arc<AtomicUsize>| {
            let constructions = Arc::clone(constructions);
            registry.register_global("CounterCache", move || {
                constructions.fetch_add(1, Ordering::SeqCst);
                CounterCache {
                    constructions: Arc::new(AtomicUsize::new(0)),
                }
            });
        };
        register(&registry, &constructions);
        register(&registry, &constructions); // second registration is a no-op

        assert!(registry.is_registered::<CounterCache>());
        assert!(!registry.is_device_dependent::<CounterCache>());
        assert_eq!(registry.get_type_name::<CounterCache>().as_deref(), Some("CounterCache"));

        let first = registry.get_cache::<CounterCache>(None).unwrap();
        let second = registry.get_cache::<CounterCache>(None).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second lookup must reuse the same instance");
        assert_eq!(constructions.load(Ordering::SeqCst), 1, "factory runs exactly once");

        let stats = registry.get_stats();
        assert_eq!(stats.global_caches, 1);
        assert_eq!(stats.device_registries, 0);
    }

    #[test]
    fn unregistered_type_yields_none() {
        let registry = CacheRegistry::new();
        assert!(registry.get_cache::<CounterCache>(None).is_none());
        assert!(!registry.is_registered::<CounterCache>());
    }

    #[test]
    fn clear_global_caches_runs_cleanup_and_empties_map() {
        let registry = CacheRegistry::new();
        registry.register_global("CounterCache", || CounterCache {
            constructions: Arc::new(AtomicUsize::new(0)),
        });
        registry.get_cache::<CounterCache>(None).unwrap();
        assert_eq!(registry.get_stats().global_caches, 1);

        registry.clear_global_caches();
        assert_eq!(registry.get_stats().global_caches, 0);
    }
}
