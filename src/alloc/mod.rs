//! Host/device memory budgets, the allocator trait, staging, and the
//! batched upload/update pipelines built on top of them.

pub mod allocation;
pub mod allocator;
pub mod batched_updater;
pub mod batched_uploader;
pub mod budget;
pub mod budget_bridge;
pub mod device_budget;
pub mod host_budget;
pub mod staging_pool;

pub use allocation::{AliasGroup, BufferAllocation, ImageAllocation};
pub use allocator::{Allocator, AllocatorStats, BufferRequest, ImageRequest, VulkanAllocator};
pub use batched_updater::{BatchedUpdater, UpdateRequest};
pub use batched_uploader::{BatchedUploader, UploadHandle, UploadStatus};
pub use budget::ResourceBudget;
pub use budget_bridge::BudgetBridge;
pub use device_budget::{DeviceBudget, FrameDelta};
pub use host_budget::{HostAllocSource, HostAllocation, HostBudget};
pub use staging_pool::{StagingAcquisition, StagingHandle, StagingPool};
