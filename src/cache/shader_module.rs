//! Shader module cache: compiled SPIR-V plus the GPU shader-module handle
//! (spec §4.2 "Shader module").

use std::any::Any;
use std::path::Path;

use ash::vk;

use super::typed_cache::{Cache, TypedCache};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

/// Identity fields for one compiled-and-loaded shader module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModuleParams {
    pub source_path: String,
    pub entry_point: String,
    pub stage: u32,
    pub source_checksum: u64,
    pub macros: Vec<String>,
}

impl ShaderModuleParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add_str(&self.source_path)
            .add_str(&self.entry_point)
            .add(&self.stage)
            .add(&self.source_checksum);
        hasher.add(&(self.macros.len() as u32));
        for macro_def in &self.macros {
            hasher.add_str(macro_def);
        }
        hasher.finalize()
    }
}

pub struct ShaderModuleWrapper {
    pub spirv: Vec<u32>,
    pub module: vk::ShaderModule,
}

/// Wraps [`TypedCache`] with the shader-module identity key and GPU
/// teardown.
pub struct ShaderModuleCache {
    device: ash::Device,
    inner: TypedCache<ShaderModuleWrapper, ShaderModuleParams>,
}

impl ShaderModuleCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            inner: TypedCache::new("ShaderModuleCache"),
        }
    }

    pub fn get_or_create(
        &self,
        params: ShaderModuleParams,
        spirv: impl FnOnce() -> Result<Vec<u32>, CacheError>,
    ) -> Result<SharedHandle<ShaderModuleWrapper>, CacheError> {
        let key = params.key();
        self.inner
            .get_or_create(key, params, ResourceScope::Shared, |_params| {
                let spirv = spirv()?;
                let info = vk::ShaderModuleCreateInfo::default().code(&spirv);
                let module = unsafe { self.device.create_shader_module(&info, None) }
                    .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
                Ok(ShaderModuleWrapper { spirv, module })
            })
    }

    pub fn has(&self, key: Fingerprint) -> bool {
        self.inner.has(key)
    }
}

impl Cache for ShaderModuleCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let device = &self.device;
        self.inner.cleanup_with(|wrapper| unsafe {
            device.destroy_shader_module(wrapper.module, None);
        });
    }

    fn serialize_to(&self, _path: &Path) -> Result<bool, SerializationError> {
        // SPIR-V bytecode is cheap to recompile from source; this cache
        // persists nothing and rebuilds lazily on next access.
        Ok(true)
    }

    fn deserialize_from(&self, _path: &Path) -> Result<bool, SerializationError> {
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
