//! Per-device pool of host-visible, persistently mapped staging buffers,
//! bucketed by size class (spec §4.7).

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::allocation::BufferAllocation;
use super::allocator::{Allocator, BufferRequest};
use super::device_budget::DeviceBudget;
use crate::config::{MAX_POOLED_BUFFERS_PER_BUCKET, MAX_TOTAL_POOLED_BYTES, STAGING_BUCKET_SIZES};

/// Opaque handle into the pool's record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingHandle(u64);

/// Result of a successful `acquire`.
pub struct StagingAcquisition {
    pub handle: StagingHandle,
    pub buffer: vk::Buffer,
    pub mapped_ptr: NonNull<u8>,
    /// Size of the underlying buffer, which may be larger than `requested`
    /// when served from a bucket.
    pub size: u64,
    pub requested: u64,
}

// SAFETY: `mapped_ptr` is a host-coherent mapping into device memory,
// carrying no thread affinity of its own.
unsafe impl Send for StagingAcquisition {}

struct Record {
    allocation: BufferAllocation,
    bucket: Option<usize>,
}

#[derive(Default)]
struct PoolStats {
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    total_pooled_bytes: AtomicU64,
}

struct Bucket {
    size: u64,
    free: Mutex<VecDeque<StagingHandle>>,
}

/// Buffers too large for any bucket are tracked separately and always
/// destroyed on release rather than pooled.
pub struct StagingPool {
    allocator: Arc<dyn Allocator>,
    device_budget: Arc<DeviceBudget>,
    buckets: Vec<Bucket>,
    records: Mutex<HashMap<u64, Record>>,
    next_handle: AtomicU32,
    stats: PoolStats,
}

impl StagingPool {
    pub fn new(allocator: Arc<dyn Allocator>, device_budget: Arc<DeviceBudget>) -> Self {
        let buckets = STAGING_BUCKET_SIZES
            .iter()
            .map(|&size| Bucket {
                size,
                free: Mutex::new(VecDeque::new()),
            })
            .collect();
        Self {
            allocator,
            device_budget,
            buckets,
            records: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
            stats: PoolStats::default(),
        }
    }

    fn bucket_for_size(size: u64) -> Option<usize> {
        STAGING_BUCKET_SIZES.iter().position(|&bucket| bucket >= size)
    }

    fn allocate_fresh(&self, size: u64) -> Option<BufferAllocation> {
        let req = BufferRequest {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::CpuToGpu,
            persistently_mapped: true,
            can_alias: false,
            name: "staging-buffer",
        };
        self.allocator.allocate_buffer(&req).ok()
    }

    /// Acquire a buffer of at least `requested` bytes. Returns `None` if the
    /// staging quota is exhausted or allocation otherwise fails; the caller
    /// may retry later.
    pub fn acquire(&self, requested: u64) -> Option<StagingAcquisition> {
        let bucket_index = Self::bucket_for_size(requested);
        let bucket_size = bucket_index.map(|i| self.buckets[i].size).unwrap_or(requested);

        if !self.device_budget.try_reserve_staging_quota(bucket_size) {
            return None;
        }

        let pooled = bucket_index.and_then(|i| self.buckets[i].free.lock().pop_front());

        let handle = if let Some(handle) = pooled {
            self.stats.pool_hits.fetch_add(1, Ordering::Relaxed);
            if let Some(record) = self.records.lock().get(&handle.0) {
                self.stats
                    .total_pooled_bytes
                    .fetch_sub(record.allocation.size, Ordering::Relaxed);
            }
            handle
        } else {
            self.stats.pool_misses.fetch_add(1, Ordering::Relaxed);
            let allocation = match self.allocate_fresh(bucket_size) {
                Some(a) => a,
                None => {
                    self.device_budget.release_staging_quota(bucket_size);
                    return None;
                }
            };
            let id = self.next_handle.fetch_add(1, Ordering::Relaxed) as u64;
            let handle = StagingHandle(id);
            self.records.lock().insert(
                id,
                Record {
                    allocation,
                    bucket: bucket_index,
                },
            );
            handle
        };

        let records = self.records.lock();
        let record = records.get(&handle.0)?;
        let mapped_ptr = record.allocation.mapped_ptr?;
        Some(StagingAcquisition {
            handle,
            buffer: record.allocation.buffer,
            mapped_ptr,
            size: record.allocation.size,
            requested,
        })
    }

    /// Return `handle` to its bucket's FIFO, or destroy it if the bucket or
    /// the total pooled-byte budget is full. Never releases the staging
    /// quota, that is the uploader/bridge's job once the GPU is done.
    pub fn release(&self, handle: StagingHandle) {
        let mut records = self.records.lock();
        let Some(record) = records.get(&handle.0) else {
            return;
        };
        let size = record.allocation.size;
        let bucket_index = record.bucket;

        let Some(bucket_index) = bucket_index else {
            let mut record = records.remove(&handle.0).unwrap();
            drop(records);
            self.allocator.free_buffer(&mut record.allocation);
            return;
        };

        let bucket = &self.buckets[bucket_index];
        let total_pooled = self.stats.total_pooled_bytes.load(Ordering::Relaxed);
        let room = bucket.free.lock().len() < MAX_POOLED_BUFFERS_PER_BUCKET
            && total_pooled + size <= MAX_TOTAL_POOLED_BYTES;

        if room {
            bucket.free.lock().push_back(handle);
            self.stats.total_pooled_bytes.fetch_add(size, Ordering::Relaxed);
        } else {
            let mut record = records.remove(&handle.0).unwrap();
            drop(records);
            self.allocator.free_buffer(&mut record.allocation);
        }
    }

    /// Destroy pooled (unused) buffers oldest-first until the total pooled
    /// byte count is at or below `target`.
    pub fn trim(&self, target: u64) {
        for bucket in &self.buckets {
            loop {
                if self.stats.total_pooled_bytes.load(Ordering::Relaxed) <= target {
                    return;
                }
                let Some(handle) = bucket.free.lock().pop_front() else {
                    break;
                };
                let mut records = self.records.lock();
                if let Some(mut record) = records.remove(&handle.0) {
                    self.stats
                        .total_pooled_bytes
                        .fetch_sub(record.allocation.size, Ordering::Relaxed);
                    drop(records);
                    self.allocator.free_buffer(&mut record.allocation);
                }
            }
        }
    }

    /// Allocate and immediately release `count` buffers per listed size so
    /// the first real frame does not pay allocation latency.
    pub fn pre_warm(&self, sizes: &[(u64, usize)]) {
        for &(size, count) in sizes {
            for _ in 0..count {
                if let Some(acquisition) = self.acquire(size) {
                    self.release(acquisition.handle);
                    self.device_budget.release_staging_quota(
                        Self::bucket_for_size(size).map(|i| self.buckets[i].size).unwrap_or(size),
                    );
                }
            }
        }
    }

    pub fn pool_hits(&self) -> u64 {
        self.stats.pool_hits.load(Ordering::Relaxed)
    }

    pub fn pool_misses(&self) -> u64 {
        self.stats.pool_misses.load(Ordering::Relaxed)
    }

    pub fn total_pooled_bytes(&self) -> u64 {
        self.stats.total_pooled_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::allocator::{AllocatorStats, ImageRequest};
    use crate::alloc::allocation::ImageAllocation;
    use crate::error::AllocError;
    use std::sync::atomic::AtomicU64 as Counter;

    /// Hands out buffers with a dangling-but-never-dereferenced mapping, so
    /// the pool's bookkeeping can be exercised without a live device.
    struct MockAllocator {
        allocations: Counter,
    }

    impl MockAllocator {
        fn new() -> Self {
            Self {
                allocations: Counter::new(0),
            }
        }
    }

    impl Allocator for MockAllocator {
        fn allocate_buffer(&self, req: &BufferRequest) -> Result<BufferAllocation, AllocError> {
            self.allocations.fetch_add(1, Ordering::Relaxed);
            Ok(BufferAllocation {
                buffer: vk::Buffer::null(),
                allocation: None,
                size: req.size,
                offset: 0,
                mapped_ptr: Some(NonNull::dangling()),
                device_address: 0,
                can_alias: req.can_alias,
                is_aliased: false,
            })
        }

        fn free_buffer(&self, _alloc: &mut BufferAllocation) {
            self.allocations.fetch_sub(1, Ordering::Relaxed);
        }

        fn allocate_image(&self, _req: &ImageRequest) -> Result<ImageAllocation, AllocError> {
            unimplemented!("staging pool never allocates images")
        }

        fn free_image(&self, _alloc: &mut ImageAllocation) {}

        fn create_aliased_buffer(
            &self,
            _req: &BufferRequest,
            _source: &BufferAllocation,
        ) -> Result<BufferAllocation, AllocError> {
            unimplemented!()
        }

        fn create_aliased_image(
            &self,
            _req: &ImageRequest,
            _source: &ImageAllocation,
        ) -> Result<ImageAllocation, AllocError> {
            unimplemented!()
        }

        fn supports_aliasing(&self) -> bool {
            false
        }

        unsafe fn map_buffer(&self, _alloc: &mut BufferAllocation) -> Result<(), AllocError> {
            Ok(())
        }

        unsafe fn unmap_buffer(&self, _alloc: &mut BufferAllocation) {}

        fn flush_range(&self, _alloc: &BufferAllocation, _offset: u64, _size: u64) -> Result<(), AllocError> {
            Ok(())
        }

        fn invalidate_range(&self, _alloc: &BufferAllocation, _offset: u64, _size: u64) -> Result<(), AllocError> {
            Ok(())
        }

        fn stats(&self) -> AllocatorStats {
            AllocatorStats::default()
        }

        fn set_budget_manager(&self, _budget: Option<Arc<DeviceBudget>>) {}
    }

    fn pool() -> StagingPool {
        let config = CacheSystemConfig {
            staging_quota_bytes: 16 * 1024 * 1024,
            ..Default::default()
        };
        let allocator: Arc<dyn Allocator> = Arc::new(MockAllocator::new());
        let budget = Arc::new(DeviceBudget::new(&config, 1_000_000_000));
        StagingPool::new(allocator, budget)
    }

    use crate::config::CacheSystemConfig;

    #[test]
    fn acquire_rounds_up_to_bucket_size() {
        let pool = pool();
        let acquisition = pool.acquire(50_000).unwrap();
        assert_eq!(acquisition.size, STAGING_BUCKET_SIZES[0]);
        assert_eq!(acquisition.requested, 50_000);
    }

    #[test]
    fn release_then_acquire_reuses_pooled_buffer() {
        let pool = pool();
        let first = pool.acquire(64 * 1024).unwrap();
        pool.release(first.handle);
        assert_eq!(pool.pool_misses(), 1);

        let second = pool.acquire(64 * 1024).unwrap();
        assert_eq!(pool.pool_hits(), 1);
        assert_eq!(pool.pool_misses(), 1);
        pool.release(second.handle);
    }

    #[test]
    fn trim_destroys_pooled_buffers_down_to_target() {
        let pool = pool();
        for _ in 0..4 {
            let acquisition = pool.acquire(64 * 1024).unwrap();
            pool.release(acquisition.handle);
        }
        // One physical buffer is reused across all 4 iterations (acquire pops
        // it on the hit path, release pushes it back), so only its bytes are
        // ever pooled at once.
        assert_eq!(pool.total_pooled_bytes(), 64 * 1024);
        pool.trim(0);
        assert_eq!(pool.total_pooled_bytes(), 0);
    }
}
