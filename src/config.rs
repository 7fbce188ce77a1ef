//! Tunables for the host/device budgets, staging pool and batched uploader.
//!
//! Every numeric default here is named in the spec; they live in one place so
//! an application can override a subset via `..Default::default()`.

/// Top-level configuration handed to [`crate::alloc::HostBudget`],
/// [`crate::alloc::DeviceBudget`] and [`crate::alloc::StagingPool`] at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSystemConfig {
    /// Bytes reserved for the per-frame bump arena. Default 16 MiB.
    pub frame_stack_size: usize,
    /// Bytes reserved for the persistent bump arena. Default 64 MiB.
    pub persistent_stack_size: usize,
    /// Heap fallback budget once both stacks are exhausted.
    pub heap_budget: u64,
    /// Fraction of detected VRAM used as the default `DeviceMemory` budget.
    pub device_budget_fraction: f32,
    /// Fraction of detected VRAM at which a budget warning is raised.
    pub device_warning_fraction: f32,
    /// Whether `DeviceMemory` allocations hard-fail over budget (`true`) or
    /// only warn (`false`).
    pub device_budget_strict: bool,
    /// Bytes allotted to the staging quota (`StagingQuota` resource class).
    pub staging_quota_bytes: u64,
    /// Number of frames a frame's worth of GPU work may lag behind the CPU.
    pub max_frames_in_flight: u64,
    /// `BatchedUploader::upload` flushes once pending uploads reach this count.
    pub max_pending_uploads: usize,
    /// `BatchedUploader::upload` flushes once pending bytes reach this size.
    pub max_pending_bytes: u64,
    /// `BatchedUploader::upload` flushes once the oldest pending upload has
    /// waited this many milliseconds.
    pub flush_deadline_ms: u64,
    /// Number of command buffers kept in the uploader's ring.
    pub max_batch_command_buffers: usize,
    /// Threshold above which `DeviceBudget::on_frame_end` raises a
    /// frame-delta warning.
    pub frame_delta_warning_threshold: u64,
}

impl Default for CacheSystemConfig {
    fn default() -> Self {
        Self {
            frame_stack_size: 16 * 1024 * 1024,
            persistent_stack_size: 64 * 1024 * 1024,
            heap_budget: 256 * 1024 * 1024,
            device_budget_fraction: 0.80,
            device_warning_fraction: 0.75,
            device_budget_strict: true,
            staging_quota_bytes: 128 * 1024 * 1024,
            max_frames_in_flight: 3,
            max_pending_uploads: 64,
            max_pending_bytes: 32 * 1024 * 1024,
            flush_deadline_ms: 16,
            max_batch_command_buffers: 4,
            frame_delta_warning_threshold: 64 * 1024 * 1024,
        }
    }
}

/// The twelve staging-pool size classes, powers of two from 64 KiB to 64 MiB.
pub const STAGING_BUCKET_SIZES: [u64; 12] = [
    64 * 1024,
    128 * 1024,
    256 * 1024,
    512 * 1024,
    1024 * 1024,
    2 * 1024 * 1024,
    4 * 1024 * 1024,
    8 * 1024 * 1024,
    16 * 1024 * 1024,
    24 * 1024 * 1024,
    32 * 1024 * 1024,
    64 * 1024 * 1024,
];

/// Maximum number of buffers retained per staging bucket before excess
/// releases are destroyed instead of pooled.
pub const MAX_POOLED_BUFFERS_PER_BUCKET: usize = 4;

/// Maximum total bytes retained across all staging buckets.
pub const MAX_TOTAL_POOLED_BYTES: u64 = 256 * 1024 * 1024;
