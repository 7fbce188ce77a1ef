//! Descriptor-set-layout cache, keyed on shader reflection's interface hash
//! (spec §4.2 "Descriptor-set layout").

use std::any::Any;
use std::path::Path;

use ash::vk;

use super::typed_cache::{Cache, TypedCache};
use crate::device::DescriptorBinding;
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutParams {
    pub descriptor_interface_hash: u64,
    pub set_index: u32,
}

impl DescriptorSetLayoutParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher.add(&self.descriptor_interface_hash).add(&self.set_index);
        hasher.finalize()
    }
}

pub struct DescriptorSetLayoutWrapper {
    pub layout: vk::DescriptorSetLayout,
    pub bindings: Vec<DescriptorBinding>,
}

pub struct DescriptorSetLayoutCache {
    device: ash::Device,
    inner: TypedCache<DescriptorSetLayoutWrapper, DescriptorSetLayoutParams>,
}

impl DescriptorSetLayoutCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            inner: TypedCache::new("DescriptorSetLayoutCache"),
        }
    }

    pub fn get_or_create(
        &self,
        params: DescriptorSetLayoutParams,
        bindings: Vec<DescriptorBinding>,
    ) -> Result<SharedHandle<DescriptorSetLayoutWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |_params| {
            let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
                .iter()
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(b.binding)
                        .descriptor_type(b.descriptor_type)
                        .descriptor_count(b.descriptor_count)
                        .stage_flags(b.stage_flags)
                })
                .collect();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
            let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
            Ok(DescriptorSetLayoutWrapper { layout, bindings })
        })
    }
}

impl Cache for DescriptorSetLayoutCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let device = &self.device;
        self.inner.cleanup_with(|wrapper| unsafe {
            device.destroy_descriptor_set_layout(wrapper.layout, None);
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
