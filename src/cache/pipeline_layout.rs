//! Pipeline-layout cache: descriptor-set-layout identity plus push-constant
//! ranges (spec §4.2 "Pipeline layout").

use std::any::Any;
use std::path::Path;

use ash::vk;

use super::descriptor_set_layout::DescriptorSetLayoutWrapper;
use super::typed_cache::{Cache, TypedCache};
use crate::device::PushConstantRange;
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLayoutParams {
    /// Keys of the descriptor-set layouts this pipeline layout is built from,
    /// in set-index order.
    pub set_layout_keys: Vec<Fingerprint>,
    pub push_constants: Vec<PushConstantRange>,
}

impl PipelineLayoutParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher.add_slice(&self.set_layout_keys);
        hasher.add(&(self.push_constants.len() as u32));
        for range in &self.push_constants {
            hasher
                .add(&range.stage_flags.as_raw())
                .add(&range.offset)
                .add(&range.size);
        }
        hasher.finalize()
    }
}

pub struct PipelineLayoutWrapper {
    pub layout: vk::PipelineLayout,
    /// Keeps each referenced descriptor-set layout alive for as long as this
    /// pipeline layout exists.
    pub set_layouts: Vec<SharedHandle<DescriptorSetLayoutWrapper>>,
}

pub struct PipelineLayoutCache {
    device: ash::Device,
    inner: TypedCache<PipelineLayoutWrapper, PipelineLayoutParams>,
}

impl PipelineLayoutCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            inner: TypedCache::new("PipelineLayoutCache"),
        }
    }

    pub fn get_or_create(
        &self,
        params: PipelineLayoutParams,
        set_layouts: Vec<SharedHandle<DescriptorSetLayoutWrapper>>,
    ) -> Result<SharedHandle<PipelineLayoutWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |params| {
            let raw_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
                .iter()
                .map(|h| h.with(|w| w.layout).expect("set layout released while still referenced"))
                .collect();
            let ranges: Vec<vk::PushConstantRange> = params
                .push_constants
                .iter()
                .map(|r| {
                    vk::PushConstantRange::default()
                        .stage_flags(r.stage_flags)
                        .offset(r.offset)
                        .size(r.size)
                })
                .collect();
            let info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&raw_layouts)
                .push_constant_ranges(&ranges);
            let layout = unsafe { self.device.create_pipeline_layout(&info, None) }
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
            Ok(PipelineLayoutWrapper { layout, set_layouts })
        })
    }
}

impl Cache for PipelineLayoutCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let device = &self.device;
        self.inner.cleanup_with(|wrapper| unsafe {
            device.destroy_pipeline_layout(wrapper.layout, None);
        });
    }

    fn serialize_to(&self, _path: &Path) -> Result<bool, SerializationError> {
        Ok(true)
    }

    fn deserialize_from(&self, _path: &Path) -> Result<bool, SerializationError> {
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
