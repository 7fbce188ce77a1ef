//! Cross-module integration tests that don't require a live Vulkan device:
//! content-addressing, single-flight construction, persistence round-trips,
//! deferred destruction timing and budget enforcement, exercised the way an
//! application actually drives them rather than through one module's own
//! `#[cfg(test)]` block.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use cache_system::alloc::HostBudget;
use cache_system::cache::{Cache, CacheRegistry, ShaderCompilationCache, ShaderCompilationParams, TypedCache};
use cache_system::config::CacheSystemConfig;
use cache_system::error::CacheError;
use cache_system::hash::CacheKeyHasher;
use cache_system::lifetime::{DeferredDestroyQueue, ResourceScope, SharedHandle};

// ---------------------------------------------------------------------------
// S1/S2, content addressing: identical keys share one entry, differing
// identity fields never collide.
// ---------------------------------------------------------------------------

#[test]
fn identical_shader_params_hash_identically_and_differing_ones_do_not() {
    let base = ShaderCompilationParams {
        source_path: "shaders/pbr.frag".into(),
        entry_point: "main".into(),
        macros: vec!["USE_IBL".into()],
        stage: 1,
        compiler_version: 3,
        compile_flags: 0,
        source_checksum: 0xdead_beef,
    };
    let same = base.clone();
    assert_eq!(base.key(), same.key());

    let different_macros = ShaderCompilationParams {
        macros: vec!["USE_IBL".into(), "MAX_LIGHTS=8".into()],
        ..base.clone()
    };
    assert_ne!(base.key(), different_macros.key());

    let different_checksum = ShaderCompilationParams {
        source_checksum: 0xfeed_face,
        ..base.clone()
    };
    assert_ne!(base.key(), different_checksum.key());
}

// ---------------------------------------------------------------------------
// S4, single-flight: many threads racing on the same key observe exactly
// one construction and the same handle.
// ---------------------------------------------------------------------------

#[test]
fn concurrent_get_or_create_on_same_key_constructs_exactly_once() {
    let cache: Arc<TypedCache<u32, u32>> = Arc::new(TypedCache::new("stress"));
    let constructions = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let constructions = Arc::clone(&constructions);
            thread::spawn(move || {
                cache
                    .get_or_create(1, 99, ResourceScope::Shared, |p| {
                        constructions.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(5));
                        Ok::<u32, CacheError>(*p)
                    })
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(constructions.load(Ordering::SeqCst), 1, "only the winning thread constructs");
    for pair in results.windows(2) {
        assert!(pair[0].with(|v| *v) == pair[1].with(|v| *v));
    }
}

// ---------------------------------------------------------------------------
// S3, persist then reload: a device-independent cache's bytes survive a
// serialize/deserialize round-trip through a fresh instance.
// ---------------------------------------------------------------------------

#[test]
fn shader_compilation_cache_persists_and_reloads_into_a_fresh_instance() {
    let dir = std::env::temp_dir().join(format!("cache-system-test-{:x}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ShaderCompilationCache.cache");

    let original = ShaderCompilationCache::new();
    let params = ShaderCompilationParams {
        source_path: "shaders/tonemap.comp".into(),
        entry_point: "main".into(),
        macros: Vec::new(),
        stage: 5,
        compiler_version: 1,
        compile_flags: 0,
        source_checksum: 0x1234_5678,
    };
    original
        .get_or_create(params.clone(), |_| Ok(vec![1, 2, 3, 4, 5]))
        .unwrap();
    assert!(original.serialize_to(&path).unwrap());

    let reloaded = ShaderCompilationCache::new();
    assert!(reloaded.deserialize_from(&path).unwrap());

    let handle = reloaded.get_or_create(params, |_| panic!("should be served from disk")).unwrap();
    assert_eq!(handle.with(|w| w.spirv.clone()), Some(vec![1, 2, 3, 4, 5]));

    let _ = std::fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// Registry wiring: a global cache registered once is shared by every caller,
// survives a `CacheRegistry::save_all`/`load_all` cycle for its own bytes.
// ---------------------------------------------------------------------------

#[test]
fn registry_save_all_and_load_all_round_trip_a_global_cache() {
    let dir = std::env::temp_dir().join(format!("cache-system-registry-test-{:x}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let registry = CacheRegistry::new();
    registry.register_global("ShaderCompilationCache", ShaderCompilationCache::new);

    let cache = registry.get_cache::<ShaderCompilationCache>(None).unwrap();
    let params = ShaderCompilationParams {
        source_path: "shaders/skybox.vert".into(),
        entry_point: "main".into(),
        macros: Vec::new(),
        stage: 0,
        compiler_version: 1,
        compile_flags: 0,
        source_checksum: 42,
    };
    cache.get_or_create(params, |_| Ok(vec![7, 7, 7])).unwrap();

    assert!(registry.save_all(&dir));

    let reloaded_registry = CacheRegistry::new();
    reloaded_registry.register_global("ShaderCompilationCache", ShaderCompilationCache::new);
    // Touch the cache once so the global slot exists before loading into it.
    reloaded_registry.get_cache::<ShaderCompilationCache>(None).unwrap();
    assert!(reloaded_registry.load_all(&dir));

    let stats = reloaded_registry.get_stats();
    assert_eq!(stats.global_caches, 1);

    let _ = std::fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// S5, deferred destruction: a `SharedHandle`'s last release enqueues into a
// `DeferredDestroyQueue` and is only actually freed once the frame counter
// proves the max-in-flight window has passed.
// ---------------------------------------------------------------------------

#[test]
fn shared_handle_release_respects_frames_in_flight_before_destroying() {
    let queue = Arc::new(DeferredDestroyQueue::default());
    let current_frame = Arc::new(std::sync::atomic::AtomicU64::new(10));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&destroyed);

    let handle = SharedHandle::with_destroy_sink(
        "gpu-buffer-payload".to_string(),
        ResourceScope::Transient,
        Arc::clone(&queue),
        Arc::clone(&current_frame),
        move |_payload| {
            flag.fetch_add(1, Ordering::SeqCst);
        },
    );
    drop(handle);

    const MAX_FRAMES_IN_FLIGHT: u64 = 3;
    assert_eq!(queue.process_frame(11, MAX_FRAMES_IN_FLIGHT), 0);
    assert_eq!(queue.process_frame(12, MAX_FRAMES_IN_FLIGHT), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 0, "still within the in-flight window");

    assert_eq!(queue.process_frame(13, MAX_FRAMES_IN_FLIGHT), 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// S6, strict budget enforcement: the host frame arena's heap fallback is
// tracked, and a full frame reset makes the arena reusable again.
// ---------------------------------------------------------------------------

#[test]
fn host_budget_frame_cycle_reclaims_arena_space_every_frame() {
    let config = CacheSystemConfig {
        frame_stack_size: 128,
        heap_budget: 4096,
        ..Default::default()
    };
    let budget = HostBudget::new(&config);

    for _frame in 0..3u32 {
        let a = budget.alloc_frame(64, 16);
        assert_eq!(a.source, cache_system::alloc::HostAllocSource::FrameStack);
        let b = budget.alloc_frame(64, 16);
        assert_eq!(b.source, cache_system::alloc::HostAllocSource::FrameStack);
        budget.reset_frame();
    }

    assert_eq!(budget.heap_usage_bytes(), 0, "every frame fit in the arena, no heap fallback used");
}

#[test]
fn host_budget_overflow_falls_back_to_tracked_heap() {
    let config = CacheSystemConfig {
        frame_stack_size: 32,
        heap_budget: 4096,
        ..Default::default()
    };
    let budget = HostBudget::new(&config);

    let overflow = budget.alloc_frame(256, 16);
    assert_eq!(overflow.source, cache_system::alloc::HostAllocSource::Heap);
    assert!(budget.heap_usage_bytes() >= 256);
    unsafe { budget.free(overflow) };
    assert_eq!(budget.heap_usage_bytes(), 0);
}

// ---------------------------------------------------------------------------
// Hashing contract: quantized floats within the same bucket collide, distinct
// buckets never do (used by every cache whose identity includes f32 fields).
// ---------------------------------------------------------------------------

#[test]
fn quantized_float_hashing_groups_close_values_and_splits_far_ones() {
    let mut a = CacheKeyHasher::new();
    a.add_f32_quantized(1.00001);
    let mut b = CacheKeyHasher::new();
    b.add_f32_quantized(1.00002);
    assert_eq!(a.finalize(), b.finalize(), "sub-quantum difference must hash identically");

    let mut c = CacheKeyHasher::new();
    c.add_f32_quantized(1.5);
    assert_ne!(a.finalize(), c.finalize());
}
