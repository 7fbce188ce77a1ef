//! Bottom-level acceleration structure cache (spec §4.2 "Acceleration
//! structure (BLAS-like)").
//!
//! Grounded in `original_source/VIXEN/libraries/CashSystem` conventions: the
//! AS and its backing buffer are produced together, and cleanup destroys
//! both. Building the AS itself (recording `vkCmdBuildAccelerationStructuresKHR`)
//! is left to the caller's command stream, consistent with this crate's
//! non-goal of owning a GPU command scheduler beyond the
//! batched-uploader/updater contract. `create` here only allocates the AS
//! handle and backing/scratch buffers and hands them back for the caller to
//! build into.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::typed_cache::{Cache, TypedCache};
use crate::alloc::{Allocator, BufferAllocation, BufferRequest};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

/// Identity fields for one bottom-level acceleration structure: the
/// geometry content it was built from, the build mode, and how many
/// primitives it covers (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerationStructureParams {
    pub geometry_descriptor_hash: u64,
    pub build_mode: u32,
    pub primitive_count: u32,
}

impl AccelerationStructureParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add(&self.geometry_descriptor_hash)
            .add(&self.build_mode)
            .add(&self.primitive_count);
        hasher.finalize()
    }
}

pub struct AccelerationStructureWrapper {
    pub acceleration_structure: vk::AccelerationStructureKHR,
    pub buffer: BufferAllocation,
    pub device_address: vk::DeviceAddress,
}

pub struct AccelerationStructureCache {
    device: ash::Device,
    allocator: Arc<dyn Allocator>,
    as_fns: ash::khr::acceleration_structure::Device,
    inner: TypedCache<AccelerationStructureWrapper, AccelerationStructureParams>,
}

impl AccelerationStructureCache {
    pub fn new(
        instance: &ash::Instance,
        device: ash::Device,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        let as_fns = ash::khr::acceleration_structure::Device::new(instance, &device);
        Self {
            device,
            allocator,
            as_fns,
            inner: TypedCache::new("AccelerationStructureCache"),
        }
    }

    /// Allocates the backing buffer sized to `build_size` and creates an
    /// (unbuilt) AS handle over it. The caller still has to record the
    /// actual build command against the returned wrapper.
    pub fn get_or_create(
        &self,
        params: AccelerationStructureParams,
        build_size: vk::DeviceSize,
        as_type: vk::AccelerationStructureTypeKHR,
    ) -> Result<SharedHandle<AccelerationStructureWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |_params| {
            let buffer = self.allocator.allocate_buffer(&BufferRequest {
                size: build_size.max(1),
                usage: vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                location: MemoryLocation::GpuOnly,
                persistently_mapped: false,
                can_alias: false,
                name: "acceleration-structure-buffer",
            })?;

            let create_info = vk::AccelerationStructureCreateInfoKHR::default()
                .buffer(buffer.buffer)
                .offset(0)
                .size(build_size)
                .ty(as_type);
            let acceleration_structure =
                unsafe { self.as_fns.create_acceleration_structure(&create_info, None) }
                    .map_err(|e| CacheError::CreateFailed(e.to_string()))?;

            let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
                .acceleration_structure(acceleration_structure);
            let device_address =
                unsafe { self.as_fns.get_acceleration_structure_device_address(&address_info) };

            Ok(AccelerationStructureWrapper {
                acceleration_structure,
                buffer,
                device_address,
            })
        })
    }
}

impl Cache for AccelerationStructureCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let as_fns = &self.as_fns;
        let allocator = &self.allocator;
        self.inner.cleanup_with(|wrapper| {
            unsafe {
                as_fns.destroy_acceleration_structure(wrapper.acceleration_structure, None);
            }
            let mut buffer = wrapper.buffer;
            allocator.free_buffer(&mut buffer);
        });
    }

    fn serialize_to(&self, _path: &Path) -> Result<bool, SerializationError> {
        // Acceleration structures are driver/device-version-specific opaque
        // data; rebuilding from source geometry is cheaper and safer than
        // persisting them, matching the shader-module cache's policy.
        Ok(true)
    }

    fn deserialize_from(&self, _path: &Path) -> Result<bool, SerializationError> {
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_discriminates_on_build_mode() {
        let a = AccelerationStructureParams {
            geometry_descriptor_hash: 42,
            build_mode: 0,
            primitive_count: 1024,
        };
        let b = AccelerationStructureParams {
            build_mode: 1,
            ..a.clone()
        };
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn identical_params_produce_identical_keys() {
        let a = AccelerationStructureParams {
            geometry_descriptor_hash: 7,
            build_mode: 0,
            primitive_count: 64,
        };
        let b = a.clone();
        assert_eq!(a.key(), b.key());
    }
}
