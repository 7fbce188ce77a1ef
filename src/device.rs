//! External collaborator interfaces consumed by this crate.
//!
//! The Vulkan driver, shader reflection and event bus are owned by other
//! subsystems; this module only names the surface the cache/allocation
//! substrate needs from them (spec §6.1).

use ash::vk;

/// Logical + physical device handle, memory properties, and the one queue
/// this crate submits work through.
///
/// Concrete construction (instance/device bring-up, surface, swapchain) is
/// out of scope. An application builds this from its own `ash::Instance`
/// and hands it to [`crate::cache::registry::CacheRegistry`].
#[derive(Clone)]
pub struct Device {
    /// Logical device handle used for all `vkCreate*`/`vkDestroy*` calls.
    pub logical: ash::Device,
    /// Physical device backing `logical`.
    pub physical_device: vk::PhysicalDevice,
    /// Cached `VkPhysicalDeviceMemoryProperties`.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// PCI vendor id, e.g. `0x10de` for NVIDIA.
    pub vendor_id: u32,
    /// Driver-assigned device id.
    pub device_id: u32,
    /// Driver version, as reported by `VkPhysicalDeviceProperties`.
    pub driver_version: u32,
    /// The queue this crate submits upload/build commands through.
    pub queue: vk::Queue,
    /// Family index backing [`Self::queue`].
    pub queue_family_index: u32,
}

impl Device {
    /// This device's stable [`crate::device_id::DeviceId`].
    pub fn id(&self) -> crate::device_id::DeviceId {
        crate::device_id::DeviceId::from_properties(self.vendor_id, self.device_id, self.driver_version)
    }

    /// Find a memory type index satisfying `type_bits` and `flags`, mirroring
    /// the lookup every Vulkan allocator needs before `vkAllocateMemory`.
    pub fn memory_type_from_properties(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            let supported = (type_bits & (1 << i)) != 0;
            let matches = self.memory_properties.memory_types[i as usize]
                .property_flags
                .contains(flags);
            if supported && matches {
                return Some(i);
            }
        }
        None
    }

    /// Total device-local heap size, used by [`crate::alloc::DeviceBudget`]
    /// to size its default `DeviceMemory` budget.
    pub fn total_device_local_heap_bytes(&self) -> u64 {
        self.memory_properties.memory_heaps[..self.memory_properties.memory_heap_count as usize]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

/// A single binding inside a descriptor set, as produced by shader reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// A push-constant range, as produced by shader reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stage_flags: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// Reflection data for one compiled shader, consumed (not produced) by the
/// descriptor-set-layout and pipeline-layout caches.
pub trait ShaderReflection {
    /// Bindings declared in descriptor set `set_index`.
    fn descriptor_set(&self, set_index: u32) -> Vec<DescriptorBinding>;
    /// All push-constant ranges across all stages.
    fn push_constants(&self) -> Vec<PushConstantRange>;
    /// SPIR-V words for `stage`.
    fn spirv(&self, stage: vk::ShaderStageFlags) -> &[u32];
    /// Entry point name used for `stage`.
    fn entry_point(&self, stage: vk::ShaderStageFlags) -> &str;
    /// Stable identifier for this reflection bundle.
    fn uuid(&self) -> &str;
    /// Hash of the descriptor interface (set layouts + push constants),
    /// folded into the descriptor-set-layout cache key.
    fn descriptor_interface_hash(&self) -> u64;
}

/// Events the cache/allocation substrate reacts to when bound to an event
/// bus (spec §4.6, §6.1).
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// The device backing a `DeviceRegistry` has become invalid (lost,
    /// destroyed). Triggers `CacheRegistry::clear_device_caches`.
    DeviceInvalidation,
    /// A new frame has begun; triggers `DeviceBudget::on_frame_start`.
    FrameStart { frame: u64 },
    /// The current frame has finished being recorded; triggers
    /// `DeviceBudget::on_frame_end`.
    FrameEnd { frame: u64 },
}

/// Opaque handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u32);

/// Minimal publish/subscribe surface this crate expects from the engine's
/// event bus. `DeviceBudget` optionally subscribes to `FrameStart`/`FrameEnd`
/// so frame-delta tracking can be driven automatically (spec §4.6).
pub trait EventBus {
    fn subscribe(&self, handler: Box<dyn FnMut(Event) + Send>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}
