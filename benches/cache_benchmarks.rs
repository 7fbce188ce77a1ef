use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cache_system::alloc::HostBudget;
use cache_system::cache::TypedCache;
use cache_system::config::CacheSystemConfig;
use cache_system::error::CacheError;
use cache_system::hash::CacheKeyHasher;
use cache_system::lifetime::{DeferredDestroyQueue, ResourceScope};

// ---------------------------------------------------------------------------
// CacheKeyHasher
// ---------------------------------------------------------------------------

fn bench_hash_shader_key(c: &mut Criterion) {
    c.bench_function("hash_shader_module_key", |b| {
        b.iter(|| {
            let mut hasher = CacheKeyHasher::new();
            hasher
                .add_str("shaders/pbr.frag")
                .add_str("main")
                .add(&black_box(1u32))
                .add(&black_box(0xabcd_ef01u64));
            hasher.add(&3u32);
            for macro_def in ["USE_IBL", "MAX_LIGHTS=8", "SHADOW_PCF"] {
                hasher.add_str(macro_def);
            }
            black_box(hasher.finalize());
        });
    });
}

fn bench_hash_sampler_key(c: &mut Criterion) {
    c.bench_function("hash_sampler_key_quantized_floats", |b| {
        b.iter(|| {
            let mut hasher = CacheKeyHasher::new();
            hasher
                .add(&black_box(1u32))
                .add(&black_box(2u32))
                .add_f32_quantized(16.0)
                .add_f32_quantized(0.0)
                .add_f32_quantized(1000.0);
            black_box(hasher.finalize());
        });
    });
}

// ---------------------------------------------------------------------------
// TypedCache
// ---------------------------------------------------------------------------

fn bench_typed_cache_hit(c: &mut Criterion) {
    let cache: TypedCache<u32, u32> = TypedCache::new("bench");
    cache
        .get_or_create(1, 7, ResourceScope::Shared, |p| Ok::<u32, CacheError>(*p))
        .unwrap();

    c.bench_function("typed_cache_get_or_create_hit", |b| {
        b.iter(|| {
            black_box(
                cache
                    .get_or_create(1, 7, ResourceScope::Shared, |_| unreachable!("cache hit"))
                    .unwrap(),
            );
        });
    });
}

fn bench_typed_cache_miss(c: &mut Criterion) {
    c.bench_function("typed_cache_get_or_create_miss_1000_keys", |b| {
        b.iter(|| {
            let cache: TypedCache<u32, u32> = TypedCache::new("bench");
            for key in 0..1000u64 {
                black_box(
                    cache
                        .get_or_create(key, key as u32, ResourceScope::Transient, |p| {
                            Ok::<u32, CacheError>(*p)
                        })
                        .unwrap(),
                );
            }
        });
    });
}

// ---------------------------------------------------------------------------
// HostBudget bump arena
// ---------------------------------------------------------------------------

fn bench_host_budget_frame_alloc(c: &mut Criterion) {
    let config = CacheSystemConfig::default();
    let budget = HostBudget::new(&config);

    c.bench_function("host_budget_alloc_frame_256b", |b| {
        b.iter(|| {
            black_box(budget.alloc_frame(256, 16));
            // Mirrors the per-frame reset every real frame performs, so the
            // arena never overflows into the heap fallback across iterations.
            budget.reset_frame();
        });
    });
}

fn bench_host_budget_frame_reset(c: &mut Criterion) {
    let config = CacheSystemConfig::default();
    let budget = HostBudget::new(&config);

    c.bench_function("host_budget_fill_then_reset_frame", |b| {
        b.iter(|| {
            for _ in 0..4096 {
                black_box(budget.alloc_frame(256, 16));
            }
            budget.reset_frame();
        });
    });
}

// ---------------------------------------------------------------------------
// DeferredDestroyQueue
// ---------------------------------------------------------------------------

fn bench_deferred_destroy_add_and_drain(c: &mut Criterion) {
    c.bench_function("deferred_destroy_add_2048_then_process", |b| {
        b.iter(|| {
            let queue = DeferredDestroyQueue::new(2048);
            for frame in 0..2048u64 {
                queue.add(frame, || {});
            }
            black_box(queue.process_frame(2048, 3));
        });
    });
}

criterion_group!(
    benches,
    bench_hash_shader_key,
    bench_hash_sampler_key,
    bench_typed_cache_hit,
    bench_typed_cache_miss,
    bench_host_budget_frame_alloc,
    bench_host_budget_frame_reset,
    bench_deferred_destroy_add_and_drain,
);
criterion_main!(benches);
