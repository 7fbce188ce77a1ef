//! Device-independent, globally shared cache of compiled SPIR-V bytes
//! (spec §4.2 "Shader compilation").

use std::any::Any;
use std::fs;
use std::path::Path;

use super::typed_cache::{Cache, TypedCache};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCompilationParams {
    pub source_path: String,
    pub entry_point: String,
    pub macros: Vec<String>,
    pub stage: u32,
    pub compiler_version: u32,
    pub compile_flags: u32,
    pub source_checksum: u64,
}

impl ShaderCompilationParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add_str(&self.source_path)
            .add_str(&self.entry_point)
            .add(&self.stage)
            .add(&self.compiler_version)
            .add(&self.compile_flags)
            .add(&self.source_checksum);
        hasher.add(&(self.macros.len() as u32));
        for macro_def in &self.macros {
            hasher.add_str(macro_def);
        }
        hasher.finalize()
    }
}

/// No GPU handle, just the compiled words, shared across every device.
pub struct ShaderCompilationWrapper {
    pub spirv: Vec<u32>,
}

/// Process-wide (device-independent) cache so identical shader variants
/// compiled once are reused across every `Device` the process opens.
pub struct ShaderCompilationCache {
    inner: TypedCache<ShaderCompilationWrapper, ShaderCompilationParams>,
}

impl ShaderCompilationCache {
    pub fn new() -> Self {
        Self {
            inner: TypedCache::new("ShaderCompilationCache"),
        }
    }

    pub fn get_or_create(
        &self,
        params: ShaderCompilationParams,
        compile: impl FnOnce(&ShaderCompilationParams) -> Result<Vec<u32>, CacheError>,
    ) -> Result<SharedHandle<ShaderCompilationWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |p| {
            Ok(ShaderCompilationWrapper { spirv: compile(p)? })
        })
    }
}

impl Default for ShaderCompilationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for ShaderCompilationCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        self.inner.cleanup_with(|_| {});
    }

    fn serialize_to(&self, path: &Path) -> Result<bool, SerializationError> {
        let keys = self.inner.keys();
        let mut writer = super::binary_io::ByteWriter::new(FORMAT_VERSION, keys.len() as u32);
        for key in keys {
            let Some((params, handle)) = self.inner.get_with_params(key) else {
                continue;
            };
            writer.write_u64(key);
            writer
                .write_str(&params.source_path)
                .write_str(&params.entry_point)
                .write_u32(params.stage)
                .write_u32(params.compiler_version)
                .write_u32(params.compile_flags)
                .write_u64(params.source_checksum);
            writer.write_u32(params.macros.len() as u32);
            for macro_def in &params.macros {
                writer.write_str(macro_def);
            }
            handle.with(|wrapper| {
                writer.write_u32(wrapper.spirv.len() as u32);
                for word in &wrapper.spirv {
                    writer.write_u32(*word);
                }
            });
        }
        fs::write(path, writer.into_bytes()).map_err(|e| SerializationError::Io(e.to_string()))?;
        Ok(true)
    }

    /// Restores both the identity params and the compiled words, so a
    /// subsequent `get_or_create` with the real params hits the fast path
    /// instead of tripping the debug collision check against a sentinel.
    fn deserialize_from(&self, path: &Path) -> Result<bool, SerializationError> {
        let bytes = fs::read(path).map_err(|e| SerializationError::Io(e.to_string()))?;
        let (mut reader, entry_count) = super::binary_io::ByteReader::new(&bytes, FORMAT_VERSION)?;
        for _ in 0..entry_count {
            let key = reader.read_u64()?;
            let source_path = reader.read_str()?;
            let entry_point = reader.read_str()?;
            let stage = reader.read_u32()?;
            let compiler_version = reader.read_u32()?;
            let compile_flags = reader.read_u32()?;
            let source_checksum = reader.read_u64()?;
            let macro_count = reader.read_u32()?;
            let mut macros = Vec::with_capacity(macro_count as usize);
            for _ in 0..macro_count {
                macros.push(reader.read_str()?);
            }
            let word_count = reader.read_u32()? as usize;
            let mut spirv = Vec::with_capacity(word_count);
            for _ in 0..word_count {
                spirv.push(reader.read_u32()?);
            }
            let params = ShaderCompilationParams {
                source_path,
                entry_point,
                macros,
                stage,
                compiler_version,
                compile_flags,
                source_checksum,
            };
            self.inner.insert(key, params, ShaderCompilationWrapper { spirv }, ResourceScope::Shared);
        }
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ShaderCompilationParams {
        ShaderCompilationParams {
            source_path: "shaders/fog.frag".into(),
            entry_point: "main".into(),
            macros: vec!["USE_FOG".into()],
            stage: 1,
            compiler_version: 2,
            compile_flags: 0,
            source_checksum: 0x55aa,
        }
    }

    #[test]
    fn deserialize_restores_params_matching_the_originally_hashed_key() {
        let dir = std::env::temp_dir().join("cache-system-shader-compilation-unit-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("blob.cache");

        let original = ShaderCompilationCache::new();
        let p = params();
        original.get_or_create(p.clone(), |_| Ok(vec![10, 20, 30])).unwrap();
        assert!(original.serialize_to(&path).unwrap());

        let reloaded = ShaderCompilationCache::new();
        assert!(reloaded.deserialize_from(&path).unwrap());
        // Reusing the exact original params must hit the fast path rather
        // than tripping the debug-mode collision assertion against a
        // mismatched sentinel.
        let handle = reloaded.get_or_create(p, |_| panic!("expected a cache hit")).unwrap();
        assert_eq!(handle.with(|w| w.spirv.clone()), Some(vec![10, 20, 30]));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
