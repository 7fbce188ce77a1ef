//! Content-addressed, single-flight resource caches (spec §4).
//!
//! [`typed_cache`] is the generic engine every concrete cache below is built
//! from; [`device_registry`] and [`registry`] wire instances of them into a
//! per-device, then process-wide, lookup table. [`binary_io`] is the shared
//! little-endian encoding the persistable caches use for `serialize_to`/
//! `deserialize_from`.

mod binary_io;
pub mod typed_cache;

pub mod device_registry;
pub mod registry;

pub mod acceleration_structure;
pub mod compute_pipeline;
pub mod descriptor_set_layout;
pub mod graphics_pipeline;
pub mod mesh;
pub mod pipeline_layout;
pub mod render_pass;
pub mod sampler;
pub mod shader_compilation;
pub mod shader_module;
pub mod texture;
pub mod tlas;
pub mod voxel_aabb;

pub use typed_cache::{Cache, TypedCache};

pub use device_registry::DeviceRegistry;
pub use registry::{CacheRegistry, RegistryStats};

pub use acceleration_structure::{
    AccelerationStructureCache, AccelerationStructureParams, AccelerationStructureWrapper,
};
pub use compute_pipeline::{ComputePipelineCache, ComputePipelineParams, ComputePipelineWrapper};
pub use descriptor_set_layout::{
    DescriptorSetLayoutCache, DescriptorSetLayoutParams, DescriptorSetLayoutWrapper,
};
pub use graphics_pipeline::{GraphicsPipelineCache, GraphicsPipelineParams, GraphicsPipelineWrapper};
pub use mesh::{MeshCache, MeshParams, MeshWrapper};
pub use pipeline_layout::{PipelineLayoutCache, PipelineLayoutParams, PipelineLayoutWrapper};
pub use render_pass::{RenderPassCache, RenderPassParams, RenderPassWrapper};
pub use sampler::{SamplerCache, SamplerParams, SamplerWrapper};
pub use shader_compilation::{ShaderCompilationCache, ShaderCompilationParams, ShaderCompilationWrapper};
pub use shader_module::{ShaderModuleCache, ShaderModuleParams, ShaderModuleWrapper};
pub use texture::{TextureCache, TextureParams, TextureWrapper};
pub use tlas::{
    DirtyLevel, DynamicTlas, DynamicTlasConfig, InstanceId, TlasBuildParams, TlasInstance,
    TlasInstanceBuffer, TlasInstanceManager, TlasUpdateRequest, INVALID_INSTANCE_ID,
};
pub use voxel_aabb::{VoxelAabb, VoxelAabbCache, VoxelAabbParams, VoxelAabbWrapper};
