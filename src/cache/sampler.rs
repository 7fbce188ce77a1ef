//! Sampler cache, with float fields quantized before hashing (spec §4.2
//! "Sampler", §4.3).

use std::any::Any;
use std::path::Path;

use ash::vk;

use super::typed_cache::{Cache, TypedCache};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerParams {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub compare_op: vk::CompareOp,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
    pub unnormalized_coordinates: bool,
}

impl SamplerParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add(&self.mag_filter.as_raw())
            .add(&self.min_filter.as_raw())
            .add(&self.mipmap_mode.as_raw())
            .add(&self.address_mode_u.as_raw())
            .add(&self.address_mode_v.as_raw())
            .add(&self.address_mode_w.as_raw())
            .add_f32_quantized(self.max_anisotropy)
            .add(&(self.compare_enable as u8))
            .add(&self.compare_op.as_raw())
            .add_f32_quantized(self.mip_lod_bias)
            .add_f32_quantized(self.min_lod)
            .add_f32_quantized(self.max_lod)
            .add(&self.border_color.as_raw())
            .add(&(self.unnormalized_coordinates as u8));
        hasher.finalize()
    }
}

impl Eq for SamplerParams {}

pub struct SamplerWrapper {
    pub sampler: vk::Sampler,
}

pub struct SamplerCache {
    device: ash::Device,
    inner: TypedCache<SamplerWrapper, SamplerParams>,
}

impl SamplerCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            inner: TypedCache::new("SamplerCache"),
        }
    }

    pub fn get_or_create(&self, params: SamplerParams) -> Result<SharedHandle<SamplerWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |params| {
            let info = vk::SamplerCreateInfo::default()
                .mag_filter(params.mag_filter)
                .min_filter(params.min_filter)
                .mipmap_mode(params.mipmap_mode)
                .address_mode_u(params.address_mode_u)
                .address_mode_v(params.address_mode_v)
                .address_mode_w(params.address_mode_w)
                .anisotropy_enable(params.max_anisotropy > 1.0)
                .max_anisotropy(params.max_anisotropy)
                .compare_enable(params.compare_enable)
                .compare_op(params.compare_op)
                .mip_lod_bias(params.mip_lod_bias)
                .min_lod(params.min_lod)
                .max_lod(params.max_lod)
                .border_color(params.border_color)
                .unnormalized_coordinates(params.unnormalized_coordinates);
            let sampler = unsafe { self.device.create_sampler(&info, None) }
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
            Ok(SamplerWrapper { sampler })
        })
    }
}

impl Cache for SamplerCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let device = &self.device;
        self.inner.cleanup_with(|wrapper| unsafe {
            device.destroy_sampler(wrapper.sampler, None);
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
