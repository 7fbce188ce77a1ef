//! Graphics pipeline cache (spec §4.2 "Graphics pipeline").
//!
//! Owns the process-per-device `VkPipelineCache` (Design Note open question
//! #1): every pipeline created through this cache shares one driver cache
//! object, and `serialize_to`/`deserialize_from` persist its merged blob
//! rather than anything per-pipeline.

use std::any::Any;
use std::path::Path;

use ash::vk;
use parking_lot::Mutex;

use super::compute_pipeline::{create_empty_pipeline_cache, read_pipeline_cache_blob, write_pipeline_cache_blob};
use super::pipeline_layout::PipelineLayoutWrapper;
use super::render_pass::RenderPassWrapper;
use super::typed_cache::{Cache, TypedCache};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub per_instance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineParams {
    pub vertex_shader_key: Fingerprint,
    pub fragment_shader_key: Fingerprint,
    pub layout_key: Fingerprint,
    pub render_pass_key: Fingerprint,
    pub vertex_bindings: Vec<VertexBinding>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub topology: i32,
    pub polygon_mode: i32,
    pub cull_mode: u32,
    pub front_face_clockwise: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub specialization_data: Vec<u8>,
}

impl GraphicsPipelineParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add(&self.vertex_shader_key)
            .add(&self.fragment_shader_key)
            .add(&self.layout_key)
            .add(&self.render_pass_key)
            .add(&(self.vertex_bindings.len() as u32));
        for binding in &self.vertex_bindings {
            hasher
                .add(&binding.binding)
                .add(&binding.stride)
                .add(&(binding.per_instance as u8));
        }
        hasher.add(&(self.vertex_attributes.len() as u32));
        for attr in &self.vertex_attributes {
            hasher
                .add(&attr.location)
                .add(&attr.binding)
                .add(&attr.format.as_raw())
                .add(&attr.offset);
        }
        hasher
            .add(&self.topology)
            .add(&self.polygon_mode)
            .add(&self.cull_mode)
            .add(&(self.front_face_clockwise as u8))
            .add(&(self.depth_test as u8))
            .add(&(self.depth_write as u8))
            .add_bytes_prefixed(&self.specialization_data);
        hasher.finalize()
    }
}

pub struct GraphicsPipelineWrapper {
    pub pipeline: vk::Pipeline,
    pub layout: SharedHandle<PipelineLayoutWrapper>,
    pub render_pass: SharedHandle<RenderPassWrapper>,
}

pub struct GraphicsPipelineCache {
    device: ash::Device,
    pipeline_cache: Mutex<vk::PipelineCache>,
    inner: TypedCache<GraphicsPipelineWrapper, GraphicsPipelineParams>,
}

impl GraphicsPipelineCache {
    pub fn new(device: ash::Device) -> Result<Self, CacheError> {
        let pipeline_cache = create_empty_pipeline_cache(&device)?;
        Ok(Self {
            device,
            pipeline_cache: Mutex::new(pipeline_cache),
            inner: TypedCache::new("GraphicsPipelineCache"),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create(
        &self,
        params: GraphicsPipelineParams,
        vertex_module: vk::ShaderModule,
        vertex_entry: &str,
        fragment_module: vk::ShaderModule,
        fragment_entry: &str,
        layout: SharedHandle<PipelineLayoutWrapper>,
        render_pass: SharedHandle<RenderPassWrapper>,
    ) -> Result<SharedHandle<GraphicsPipelineWrapper>, CacheError> {
        let key = params.key();
        let vertex_entry = vertex_entry.to_string();
        let fragment_entry = fragment_entry.to_string();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |params| {
            let vertex_entry_c = std::ffi::CString::new(vertex_entry.clone())
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
            let fragment_entry_c = std::ffi::CString::new(fragment_entry.clone())
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;

            let raw_layout = layout
                .with(|l| l.layout)
                .ok_or_else(|| CacheError::CreateFailed("pipeline layout released before use".into()))?;
            let raw_render_pass = render_pass
                .with(|r| r.render_pass)
                .ok_or_else(|| CacheError::CreateFailed("render pass released before use".into()))?;

            let stages = [
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::VERTEX)
                    .module(vertex_module)
                    .name(&vertex_entry_c),
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment_module)
                    .name(&fragment_entry_c),
            ];

            let bindings: Vec<vk::VertexInputBindingDescription> = params
                .vertex_bindings
                .iter()
                .map(|b| {
                    vk::VertexInputBindingDescription::default()
                        .binding(b.binding)
                        .stride(b.stride)
                        .input_rate(if b.per_instance {
                            vk::VertexInputRate::INSTANCE
                        } else {
                            vk::VertexInputRate::VERTEX
                        })
                })
                .collect();
            let attributes: Vec<vk::VertexInputAttributeDescription> = params
                .vertex_attributes
                .iter()
                .map(|a| {
                    vk::VertexInputAttributeDescription::default()
                        .location(a.location)
                        .binding(a.binding)
                        .format(a.format)
                        .offset(a.offset)
                })
                .collect();
            let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attributes);

            let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(vk::PrimitiveTopology::from_raw(params.topology));

            let viewport_state = vk::PipelineViewportStateCreateInfo::default()
                .viewport_count(1)
                .scissor_count(1);

            let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
                .polygon_mode(vk::PolygonMode::from_raw(params.polygon_mode))
                .cull_mode(vk::CullModeFlags::from_raw(params.cull_mode))
                .front_face(if params.front_face_clockwise {
                    vk::FrontFace::CLOCKWISE
                } else {
                    vk::FrontFace::COUNTER_CLOCKWISE
                })
                .line_width(1.0);

            let multisample = vk::PipelineMultisampleStateCreateInfo::default()
                .rasterization_samples(vk::SampleCountFlags::TYPE_1);

            let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(params.depth_test)
                .depth_write_enable(params.depth_write)
                .depth_compare_op(vk::CompareOp::LESS);

            let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)];
            let color_blend =
                vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

            let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
            let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

            let info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&stages)
                .vertex_input_state(&vertex_input)
                .input_assembly_state(&input_assembly)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization)
                .multisample_state(&multisample)
                .depth_stencil_state(&depth_stencil)
                .color_blend_state(&color_blend)
                .dynamic_state(&dynamic_state)
                .layout(raw_layout)
                .render_pass(raw_render_pass)
                .subpass(0);

            let pipeline_cache = *self.pipeline_cache.lock();
            let pipelines = unsafe {
                self.device
                    .create_graphics_pipelines(pipeline_cache, &[info], None)
            }
            .map_err(|(_, e)| CacheError::CreateFailed(e.to_string()))?;

            Ok(GraphicsPipelineWrapper {
                pipeline: pipelines[0],
                layout,
                render_pass,
            })
        })
    }
}

impl Cache for GraphicsPipelineCache {
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

    /// Merges every pipeline created through this cache's driver-opaque bytes
    /// into a single blob (spec §4.2/§6.4); there is nothing per-pipeline to
    /// write since all creations share one `VkPipelineCache`.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> GraphicsPipelineParams {
        GraphicsPipelineParams {
            vertex_shader_key: 1,
            fragment_shader_key: 2,
            layout_key: 3,
            render_pass_key: 4,
            vertex_bindings: vec![VertexBinding {
                binding: 0,
                stride: 32,
                per_instance: false,
            }],
            vertex_attributes: vec![VertexAttribute {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            }],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST.as_raw(),
            polygon_mode: vk::PolygonMode::FILL.as_raw(),
            cull_mode: vk::CullModeFlags::BACK.as_raw(),
            front_face_clockwise: false,
            depth_test: true,
            depth_write: true,
            specialization_data: Vec::new(),
        }
    }

    #[test]
    fn depth_write_toggle_changes_key() {
        let a = base_params();
        let b = GraphicsPipelineParams {
            depth_write: false,
            ..a.clone()
        };
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn vertex_layout_changes_key() {
        let a = base_params();
        let mut b = a.clone();
        b.vertex_bindings[0].stride = 48;
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn identical_params_produce_identical_keys() {
        let a = base_params();
        let b = a.clone();
        assert_eq!(a.key(), b.key());
    }
}
