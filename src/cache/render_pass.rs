//! Render-pass cache (spec §4.2 "Render pass").

use std::any::Any;
use std::path::Path;

use ash::vk;

use super::typed_cache::{Cache, TypedCache};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthAttachment {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassParams {
    pub color_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub depth: Option<DepthAttachment>,
    pub src_stage_mask: u32,
    pub dst_stage_mask: u32,
}

impl RenderPassParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add(&self.color_format.as_raw())
            .add(&self.samples.as_raw())
            .add(&self.load_op.as_raw())
            .add(&self.store_op.as_raw())
            .add(&self.initial_layout.as_raw())
            .add(&self.final_layout.as_raw())
            .add(&self.src_stage_mask)
            .add(&self.dst_stage_mask);
        match &self.depth {
            Some(depth) => {
                hasher.add(&1u8);
                hasher
                    .add(&depth.format.as_raw())
                    .add(&depth.load_op.as_raw())
                    .add(&depth.store_op.as_raw());
            }
            None => {
                hasher.add(&0u8);
            }
        }
        hasher.finalize()
    }
}

pub struct RenderPassWrapper {
    pub render_pass: vk::RenderPass,
}

pub struct RenderPassCache {
    device: ash::Device,
    inner: TypedCache<RenderPassWrapper, RenderPassParams>,
}

impl RenderPassCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            inner: TypedCache::new("RenderPassCache"),
        }
    }

    pub fn get_or_create(
        &self,
        params: RenderPassParams,
    ) -> Result<SharedHandle<RenderPassWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |params| {
            let mut attachments = vec![vk::AttachmentDescription::default()
                .format(params.color_format)
                .samples(params.samples)
                .load_op(params.load_op)
                .store_op(params.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(params.initial_layout)
                .final_layout(params.final_layout)];

            let color_refs = [vk::AttachmentReference::default()
                .attachment(0)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

            let mut subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs);

            let depth_ref;
            if let Some(depth) = &params.depth {
                attachments.push(
                    vk::AttachmentDescription::default()
                        .format(depth.format)
                        .samples(params.samples)
                        .load_op(depth.load_op)
                        .store_op(depth.store_op)
                        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .initial_layout(vk::ImageLayout::UNDEFINED)
                        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                );
                depth_ref = vk::AttachmentReference::default()
                    .attachment(1)
                    .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
                subpass = subpass.depth_stencil_attachment(&depth_ref);
            }

            let dependency = vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::from_raw(params.src_stage_mask))
                .dst_stage_mask(vk::PipelineStageFlags::from_raw(params.dst_stage_mask));

            let subpasses = [subpass];
            let dependencies = [dependency];
            let info = vk::RenderPassCreateInfo::default()
                .attachments(&attachments)
                .subpasses(&subpasses)
                .dependencies(&dependencies);

            let render_pass = unsafe { self.device.create_render_pass(&info, None) }
                .map_err(|e| CacheError::CreateFailed(e.to_string()))?;
            Ok(RenderPassWrapper { render_pass })
        })
    }
}

impl Cache for RenderPassCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let device = &self.device;
        self.inner.cleanup_with(|wrapper| unsafe {
            device.destroy_render_pass(wrapper.render_pass, None);
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
