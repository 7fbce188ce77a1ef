//! Compute pipeline cache (spec §4.2 "Compute pipeline").
//!
//! Owns a single process-per-device `VkPipelineCache`, reused across every
//! entry rather than one per pipeline (Design Note open question #1: a
//! per-pipeline driver cache duplicates compilation work and isn't
//! recommended).

use std::any::Any;
use std::path::Path;

use ash::vk;
use parking_lot::Mutex;

use super::pipeline_layout::PipelineLayoutWrapper;
use super::typed_cache::{Cache, TypedCache};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineParams {
    pub shader_key: Fingerprint,
    pub layout_key: Fingerprint,
    pub workgroup_x: u32,
    pub workgroup_y: u32,
    pub workgroup_z: u32,
    /// Raw specialization-constant bytes plus map entries, already encoded
    /// by the caller (the cache only hashes/stores, never interprets them).
    pub specialization_data: Vec<u8>,
}

impl ComputePipelineParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add(&self.shader_key)
            .add(&self.layout_key)
            .add(&self.workgroup_x)
            .add(&self.workgroup_y)
            .add(&self.workgroup_z)
            .add_bytes_prefixed(&self.specialization_data);
        hasher.finalize()
    }
}

pub struct ComputePipelineWrapper {
    pub pipeline: vk::Pipeline,
    pub layout: SharedHandle<PipelineLayoutWrapper>,
    pub workgroup_size: (u32, u32, u32),
}

pub struct ComputePipelineCache {
    device: ash::Device,
    pipeline_cache: Mutex<vk::PipelineCache>,
    inner: TypedCache<ComputePipelineWrapper, ComputePipelineParams>,
}

impl ComputePipelineCache {
    pub fn new(device: ash::Device) -> Result<Self, CacheError> {
        let pipeline_cache = create_empty_pipeline_cache(&device)?;
        Ok(Self {
            device,
            pipeline_cache: Mutex::new(pipeline_cache),
            inner: TypedCache::new("ComputePipelineCache"),
        })
    }

    pub fn get_or_create(
        &self,
        params: ComputePipelineParams,
        shader_module: vk::ShaderModule,
        entry_point: &str,
        layout: SharedHandle<PipelineLayoutWrapper>,
    ) -> Result<SharedHandle<ComputePipelineWrapper>, CacheError> {
        let key = params.key();
        let entry_point = entry_point.to_string();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |params| {
            let entry_point_c = std::ffi::CString::new(entry_point.clone())
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
            let raw_layout = layout
                .with(|l| l.layout)
                .ok_or_else(|| CacheError::CreateFailed("pipeline layout released before use".into()))?;

            let stage = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(shader_module)
                .name(&entry_point_c);

            let info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(raw_layout);

            let pipeline_cache = *self.pipeline_cache.lock();
            let pipelines = unsafe {
                self.device
                    .create_compute_pipelines(pipeline_cache, &[info], None)
            }
            .map_err(|(_, e)| CacheError::CreateFailed(e.to_string()))?;

            Ok(ComputePipelineWrapper {
                pipeline: pipelines[0],
                layout,
                workgroup_size: (params.workgroup_x, params.workgroup_y, params.workgroup_z),
            })
        })
    }
}

impl Cache for ComputePipelineCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let device = &self.device;
        self.inner.cleanup_with(|wrapper| unsafe {
            device.destroy_pipeline(wrapper.pipeline, None);
        });
        unsafe {
            self.device.destroy_pipeline_cache(*self.pipeline_cache.lock(), None);
        }
    }

    fn serialize_to(&self, path: &Path) -> Result<bool, SerializationError> {
        write_pipeline_cache_blob(&self.device, *self.pipeline_cache.lock(), path)
    }

    fn deserialize_from(&self, path: &Path) -> Result<bool, SerializationError> {
        let Some(new_cache) = read_pipeline_cache_blob(&self.device, path)? else {
            return Ok(true);
        };
        let mut current = self.pipeline_cache.lock();
        unsafe { self.device.destroy_pipeline_cache(*current, None) };
        *current = new_cache;
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn create_empty_pipeline_cache(device: &ash::Device) -> Result<vk::PipelineCache, CacheError> {
    let info = vk::PipelineCacheCreateInfo::default();
    unsafe { device.create_pipeline_cache(&info, None) }.map_err(|e| CacheError::CreateFailed(e.to_string()))
}

const PIPELINE_CACHE_BLOB_VERSION: u32 = 1;

/// Merge `pipeline_cache`'s driver-opaque bytes to `path` with the 4-byte
/// version + 8-byte size header from spec §4.2/§6.4.
pub(super) fn write_pipeline_cache_blob(
    device: &ash::Device,
    pipeline_cache: vk::PipelineCache,
    path: &Path,
) -> Result<bool, SerializationError> {
    let blob = unsafe { device.get_pipeline_cache_data(pipeline_cache) }
        .map_err(|e| SerializationError::Corrupt(e.to_string()))?;
    let mut bytes = Vec::with_capacity(4 + 8 + blob.len());
    bytes.extend_from_slice(&PIPELINE_CACHE_BLOB_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(blob.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&blob);
    std::fs::write(path, bytes).map_err(|e| SerializationError::Io(e.to_string()))?;
    Ok(true)
}

/// Load a pipeline-cache blob written by [`write_pipeline_cache_blob`] and
/// construct a fresh `VkPipelineCache` from it. If the driver rejects the
/// bytes (mismatched driver/device), that's treated as "no cache", `Ok(None)`,
/// never a hard failure (spec §6.4).
pub(super) fn read_pipeline_cache_blob(
    device: &ash::Device,
    path: &Path,
) -> Result<Option<vk::PipelineCache>, SerializationError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(None),
    };
    if bytes.len() < 12 {
        return Ok(None);
    }
    let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if version != PIPELINE_CACHE_BLOB_VERSION {
        return Ok(None);
    }
    let size = u64::from_le_bytes(bytes[4..12].try_into().unwrap()) as usize;
    let Some(blob) = bytes.get(12..12 + size) else {
        return Ok(None);
    };

    let info = vk::PipelineCacheCreateInfo::default().initial_data(blob);
    match unsafe { device.create_pipeline_cache(&info, None) } {
        Ok(cache) => Ok(Some(cache)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_changes_with_workgroup_size() {
        let base = ComputePipelineParams {
            shader_key: 1,
            layout_key: 2,
            workgroup_x: 8,
            workgroup_y: 8,
            workgroup_z: 1,
            specialization_data: Vec::new(),
        };
        let resized = ComputePipelineParams {
            workgroup_x: 16,
            ..base.clone()
        };
        assert_ne!(base.key(), resized.key());
    }

    #[test]
    fn specialization_bytes_are_length_prefixed() {
        let a = ComputePipelineParams {
            shader_key: 1,
            layout_key: 2,
            workgroup_x: 1,
            workgroup_y: 1,
            workgroup_z: 1,
            specialization_data: vec![1, 2],
        };
        let b = ComputePipelineParams {
            specialization_data: vec![1, 2, 3],
            ..a.clone()
        };
        assert_ne!(a.key(), b.key());
    }
}
