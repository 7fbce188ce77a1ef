//! Texture cache: image/view/memory plus a shared sampler (spec §4.2
//! "Texture").
//!
//! Grounded in
//! `original_source/VIXEN/libraries/CashSystem/include/CashSystem/TextureCacher.h`
//! and `backend/vulkan/allocator.rs`'s image-allocation conventions.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::sampler::SamplerWrapper;
use super::typed_cache::{Cache, TypedCache};
use crate::alloc::{Allocator, BufferRequest, ImageAllocation, ImageRequest};
use crate::error::{CacheError, SerializationError};
use crate::hash::{CacheKeyHasher, Fingerprint};
use crate::lifetime::{ResourceScope, SharedHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureParams {
    pub file_path: String,
    pub format: i32,
    pub width: u32,
    pub height: u32,
    pub generate_mipmaps: bool,
    pub file_checksum: u64,
}

impl TextureParams {
    pub fn key(&self) -> Fingerprint {
        let mut hasher = CacheKeyHasher::new();
        hasher
            .add_str(&self.file_path)
            .add(&self.format)
            .add(&self.width)
            .add(&self.height)
            .add(&(self.generate_mipmaps as u8))
            .add(&self.file_checksum);
        hasher.finalize()
    }

    fn mip_levels(&self) -> u32 {
        if self.generate_mipmaps {
            32 - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }
}

pub struct TextureWrapper {
    image: Mutex<Option<ImageAllocation>>,
    pub sampler: SharedHandle<SamplerWrapper>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
}

impl TextureWrapper {
    pub fn with_image<R>(&self, f: impl FnOnce(&ImageAllocation) -> R) -> Option<R> {
        self.image.lock().as_ref().map(f)
    }
}

pub struct TextureCache {
    device: ash::Device,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    allocator: Arc<dyn Allocator>,
    inner: TypedCache<TextureWrapper, TextureParams>,
}

impl TextureCache {
    pub fn new(
        device: ash::Device,
        queue: vk::Queue,
        command_pool: vk::CommandPool,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        Self {
            device,
            queue,
            command_pool,
            allocator,
            inner: TypedCache::new("TextureCache"),
        }
    }

    /// `load` decodes the source image into tightly packed pixel bytes; this
    /// cache owns the device-local image allocation, the one-time upload
    /// submit, and the composed sampler.
    pub fn get_or_create(
        &self,
        params: TextureParams,
        format: vk::Format,
        sampler: SharedHandle<SamplerWrapper>,
        load: impl FnOnce() -> Result<Vec<u8>, CacheError>,
    ) -> Result<SharedHandle<TextureWrapper>, CacheError> {
        let key = params.key();
        self.inner.get_or_create(key, params, ResourceScope::Shared, |params| {
            let pixels = load()?;
            let mip_levels = params.mip_levels();

            let image = self.allocator.allocate_image(&ImageRequest {
                extent: vk::Extent3D {
                    width: params.width,
                    height: params.height,
                    depth: 1,
                },
                format,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                mip_levels,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                location: MemoryLocation::GpuOnly,
                can_alias: false,
                create_view: true,
                aspect_mask: vk::ImageAspectFlags::COLOR,
                name: "texture-image",
            })?;

            self.upload_base_level(&image, &pixels)?;

            Ok(TextureWrapper {
                image: Mutex::new(Some(image)),
                sampler,
                width: params.width,
                height: params.height,
                mip_levels,
                format,
            })
        })
    }

    /// Stage `pixels` through a transient host-visible buffer and record a
    /// one-time-submit transition + copy + transition. Mip generation beyond
    /// level 0 is left to the caller (out of scope: this crate's non-goal of
    /// defining a GPU command scheduler beyond the batched-uploader/updater
    /// contract covers blit-chain mip generation too).
    fn upload_base_level(&self, image: &ImageAllocation, pixels: &[u8]) -> Result<(), CacheError> {
        let mut staging = self.allocator.allocate_buffer(&BufferRequest {
            size: pixels.len().max(1) as u64,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: MemoryLocation::CpuToGpu,
            persistently_mapped: true,
            can_alias: false,
            name: "texture-staging",
        })?;
        if let Some(mut ptr) = staging.mapped_ptr {
            unsafe {
                std::ptr::copy_nonoverlapping(pixels.as_ptr(), ptr.as_mut(), pixels.len());
            }
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| CacheError::CreateFailed(e.to_string()))?[0];

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| CacheError::CreateFailed(e.to_string()))?;

        let subresource = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .image(image.image)
            .subresource_range(subresource);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
        }

        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(image.extent);
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        let to_shader_read = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .image(image.image)
            .subresource_range(subresource);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader_read],
            );
        }

        unsafe { self.device.end_command_buffer(cmd) }.map_err(|e| CacheError::CreateFailed(e.to_string()))?;

        let cmds = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmds);
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(|e| CacheError::CreateFailed(e.to_string()))?;

        let submit_result = unsafe { self.device.queue_submit(self.queue, &[submit_info], fence) };
        let wait_result = submit_result.and_then(|_| unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)
        });

        unsafe {
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.command_pool, &cmds);
        }
        self.allocator.free_buffer(&mut staging);

        wait_result.map_err(|e| CacheError::CreateFailed(e.to_string()))?;
        Ok(())
    }
}

impl Cache for TextureCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cleanup(&self) {
        let allocator = &self.allocator;
        self.inner.cleanup_with(|wrapper| {
            if let Some(mut image) = wrapper.image.lock().take() {
                allocator.free_image(&mut image);
            }
        });
    }

    fn serialize_to(&self, _path: &Path) -> Result<bool, SerializationError> {
        // Decoded pixel bytes are cheap to reload from the source file; this
        // cache persists nothing, matching the shader-module cache's policy.
        Ok(true)
    }

    fn deserialize_from(&self, _path: &Path) -> Result<bool, SerializationError> {
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_level_count_derives_from_largest_dimension() {
        let params = TextureParams {
            file_path: "t.png".into(),
            format: 0,
            width: 256,
            height: 64,
            generate_mipmaps: true,
            file_checksum: 0,
        };
        assert_eq!(params.mip_levels(), 9);
    }

    #[test]
    fn mip_levels_is_one_when_disabled() {
        let params = TextureParams {
            file_path: "t.png".into(),
            format: 0,
            width: 256,
            height: 256,
            generate_mipmaps: false,
            file_checksum: 0,
        };
        assert_eq!(params.mip_levels(), 1);
    }

    #[test]
    fn key_discriminates_on_checksum() {
        let a = TextureParams {
            file_path: "t.png".into(),
            format: 0,
            width: 1,
            height: 1,
            generate_mipmaps: false,
            file_checksum: 1,
        };
        let b = TextureParams {
            file_checksum: 2,
            ..a.clone()
        };
        assert_ne!(a.key(), b.key());
    }
}
