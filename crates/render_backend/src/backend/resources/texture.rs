//! Sampled textures
//!
//! A [`Texture`] groups arena handles for its image, view and sampler. It
//! never holds references, so it stays valid across swapchain recreation.

use ash::vk;

use super::arena::{ImageHandle, ImageViewHandle, ResourceArena, SamplerHandle, TextureHandle};
use super::buffer::{Buffer, BufferKind};
use super::image::{Image, ImageSpec, ImageView, Sampler, SamplerSettings};
use super::memory::MemoryClass;
use crate::backend::initialization::device::Device;
use crate::backend::rendering::commands::CommandPool;
use crate::backend::{VulkanError, VulkanResult};

/// A sampled image registered in a [`ResourceArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    image: ImageHandle,
    view: ImageViewHandle,
    sampler: SamplerHandle,
    layout: vk::ImageLayout,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
}

impl Texture {
    /// Upload tightly packed RGBA8 `pixels` and register the texture
    ///
    /// With `mip_levels` above 1 the remaining levels are generated from the
    /// upload by linear blits and the sampler reaches every level.
    pub fn from_rgba8(
        device: &Device,
        pool: &CommandPool,
        arena: &mut ResourceArena,
        pixels: &[u8],
        extent: vk::Extent2D,
        mip_levels: u32,
        sampler: SamplerSettings,
    ) -> VulkanResult<TextureHandle> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::invalid(format!(
                "{} pixel bytes for a {}x{} RGBA8 texture, expected {expected}",
                pixels.len(),
                extent.width,
                extent.height
            )));
        }

        let format = vk::Format::R8G8B8A8_SRGB;
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let mut image = Image::new(device, ImageSpec::new(format, extent, usage).with_mip_levels(mip_levels))?;

        let staging = Buffer::new(device, BufferKind::Staging, pixels.len() as vk::DeviceSize, MemoryClass::UPLOAD)?;
        staging.set_data(0, pixels)?;

        let to_transfer = image.barrier(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        image.set_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let to_shader = image.barrier(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };

        pool.one_time_submit(|recorder| {
            recorder.pipeline_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                &[to_transfer],
            )?;
            recorder.copy_buffer_to_image(&staging, &image, &[region])?;
            if mip_levels > 1 {
                return Ok(());
            }
            recorder.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                &[to_shader],
            )
        })?;
        if mip_levels > 1 {
            image.generate_mipmaps(device, pool)?;
        } else {
            image.set_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        let sampler = if mip_levels > 1 {
            SamplerSettings {
                max_lod: sampler.max_lod.max(mip_levels as f32),
                ..sampler
            }
        } else {
            sampler
        };
        let view = ImageView::new(device, &image)?;
        let sampler = Sampler::new(device, sampler)?;

        let texture = Texture {
            image: arena.insert_image(image),
            view: arena.insert_view(view),
            sampler: arena.insert_sampler(sampler),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            format,
            extent,
            mip_levels,
        };
        log::debug!("Uploaded {}x{} texture with {mip_levels} mip levels", extent.width, extent.height);
        Ok(arena.insert_texture(texture))
    }

    /// Descriptor contents for binding as a combined image sampler
    pub fn descriptor_info(&self, arena: &ResourceArena) -> VulkanResult<vk::DescriptorImageInfo> {
        Ok(vk::DescriptorImageInfo {
            sampler: arena.sampler(self.sampler)?.handle(),
            image_view: arena.view(self.view)?.handle(),
            image_layout: self.layout,
        })
    }

    /// Image handle
    pub fn image(&self) -> ImageHandle {
        self.image
    }

    /// View handle
    pub fn view(&self) -> ImageViewHandle {
        self.view
    }

    /// Sampler handle
    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    /// Layout the image is kept in between frames
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::DriverCall;
    use crate::backend::initialization::device::tests::headless_device;
    use crate::backend::resources::arena::ResourceHandle;
    use crate::backend::resources::image::full_mip_levels;

    #[test]
    fn test_upload_transitions_and_registers_parts() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut arena = ResourceArena::new();

        let extent = vk::Extent2D { width: 2, height: 2 };
        let handle = Texture::from_rgba8(&device, &pool, &mut arena, &[255; 16], extent, 1, SamplerSettings::default()).unwrap();
        let texture = *arena.texture(handle).unwrap();
        assert_eq!(texture.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(arena.image(texture.image()).unwrap().layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let info = texture.descriptor_info(&arena).unwrap();
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let barriers: Vec<_> = instance
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::PipelineBarrier { new_layout } => Some(new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(
            barriers,
            vec![vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL]
        );
        assert!(instance.calls().contains(&DriverCall::CopyBufferToImage));
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_full_mip_chain_upload() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut arena = ResourceArena::new();

        let extent = vk::Extent2D { width: 8, height: 4 };
        let levels = full_mip_levels(extent);
        assert_eq!(levels, 4);
        let handle =
            Texture::from_rgba8(&device, &pool, &mut arena, &[128; 128], extent, levels, SamplerSettings::default()).unwrap();
        let texture = *arena.texture(handle).unwrap();
        assert_eq!(texture.mip_levels(), 4);
        assert_eq!(arena.image(texture.image()).unwrap().layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let blits: Vec<_> = instance
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::BlitImage { src_level, dst_level } => Some((src_level, dst_level)),
                _ => None,
            })
            .collect();
        assert_eq!(blits, vec![(0, 1), (1, 2), (2, 3)]);
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_destroying_texture_releases_parts() {
        let (_instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut arena = ResourceArena::new();
        let extent = vk::Extent2D { width: 1, height: 1 };
        let handle = Texture::from_rgba8(&device, &pool, &mut arena, &[0, 0, 0, 255], extent, 1, SamplerSettings::default()).unwrap();
        let texture = *arena.texture(handle).unwrap();

        arena.destroy(ResourceHandle::Texture(handle)).unwrap();
        assert!(arena.is_empty());
        assert!(matches!(texture.descriptor_info(&arena), Err(VulkanError::StaleHandle { .. })));
    }

    #[test]
    fn test_pixel_count_must_match_extent() {
        let (_instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut arena = ResourceArena::new();
        let extent = vk::Extent2D { width: 2, height: 2 };
        let result = Texture::from_rgba8(&device, &pool, &mut arena, &[0; 12], extent, 1, SamplerSettings::default());
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        assert!(arena.is_empty());
    }
}
