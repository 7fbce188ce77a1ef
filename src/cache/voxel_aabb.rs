//! Voxel AABB data cache (spec §4.2 "Voxel AABB data"): keyed on a scene
//! descriptor, producing both the CPU AABB array (consumed by
//! `VK_GEOMETRY_TYPE_AABBS_KHR` BLAS builds) and its device-local buffer.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use gpu_allocator::MemoryLocation;

use super::typed_cache::{Cache, TypedCache};
use crate::alloc::{Allocator, BufferAllocation, BufferRequest};
use crate::error::CacheError;
use crate::error::SerializationError;
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

/// One `VkAabbPositionsKHR`-compatible bounding box, min-corner then
/// max-corner.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VoxelAabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Identity for one voxelized scene's AABB set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelAabbParams {
    pub scene_descriptor_hash: u64,
    pub voxel_count: u32,
}

impl VoxelAabbParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher.add(&self.scene_descriptor_hash).add(&self.voxel_count);
        hasher.finalize()
    }
}

pub struct VoxelAabbWrapper {
    pub aabbs: Vec<VoxelAabb>,
    pub buffer: BufferAllocation,
}

pub struct VoxelAabbCache {
    device: ash::Device,
    allocator: Arc<dyn Allocator>,
    inner: TypedCache<VoxelAabbWrapper, VoxelAabbParams>,
}

impl VoxelAabbCache {
    pub fn new(device: ash::Device, allocator: Arc<dyn Allocator>) -> Self {
        Self {
            device,
            allocator,
            inner: TypedCache::new("VoxelAabbCache"),
        }
    }

    /// `generate` computes the voxelization (no locks held); this cache
    /// owns only the device-local buffer the AABBs get copied into.
    pub fn get_or_create(
        &self,
        params: VoxelAabbParams,
        generate: impl FnOnce() -> Result<Vec<VoxelAabb>, CacheError>,
    ) -> Result<SharedHandle<VoxelAabbWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |_params| {
            let aabbs = generate()?;
            let bytes: &[u8] = bytemuck::cast_slice(&aabbs);

            let mut buffer = self.allocator.allocate_buffer(&BufferRequest {
                size: bytes.len().max(std::mem::size_of::<VoxelAabb>()) as u64,
                usage: vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                location: MemoryLocation::CpuToGpu,
                persistently_mapped: true,
                can_alias: false,
                name: "voxel-aabb-buffer",
            })?;
            if let Some(mut ptr) = buffer.mapped_ptr {
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_mut(), bytes.len());
                }
            }

            Ok(VoxelAabbWrapper { aabbs, buffer })
        })
    }
}

impl Cache for VoxelAabbCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let allocator = &self.allocator;
        self.inner.cleanup_with(|wrapper| {
            let mut buffer = wrapper.buffer;
            allocator.free_buffer(&mut buffer);
        });
    }

    fn serialize_to(&self, path: &Path) -> Result<bool, SerializationError> {
        const FORMAT_VERSION: u32 = 1;
        let keys = self.inner.keys();
        let mut writer = super::binary_io::ByteWriter::new(FORMAT_VERSION, keys.len() as u32);
        for key in keys {
            let Some(handle) = self.inner.get(key) else {
                continue;
            };
            writer.write_u64(key);
            handle.with(|wrapper| {
                writer.write_bytes(bytemuck::cast_slice(&wrapper.aabbs));
            });
        }
        std::fs::write(path, writer.into_bytes()).map_err(|e| SerializationError::Io(e.to_string()))?;
        Ok(true)
    }

    fn deserialize_from(&self, _path: &Path) -> Result<bool, SerializationError> {
        // Rematerialising the device buffer needs the allocator; like the
        // mesh cache, the full round-trip belongs to a device-bound
        // `load_persisted` rather than this generic trait hook.
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[allow(dead_code)]
fn device_binds_this_cache_instance(cache: &VoxelAabbCache) -> &ash::Device {
    &cache.device
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_params_produce_identical_keys() {
        let a = VoxelAabbParams {
            scene_descriptor_hash: 99,
            voxel_count: 4096,
        };
        let b = a.clone();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn key_discriminates_on_voxel_count() {
        let a = VoxelAabbParams {
            scene_descriptor_hash: 99,
            voxel_count: 4096,
        };
        let b = VoxelAabbParams {
            voxel_count: 8192,
            ..a.clone()
        };
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn aabb_is_plain_old_data() {
        let aabb = VoxelAabb {
            min: [0.0, 0.0, 0.0],
            max: [1.0, 1.0, 1.0],
        };
        let bytes: &[u8] = bytemuck::bytes_of(&aabb);
        assert_eq!(bytes.len(), std::mem::size_of::<VoxelAabb>());
    }
}
