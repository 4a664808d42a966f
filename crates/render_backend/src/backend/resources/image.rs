//! Images, image views and samplers
//!
//! [`Image`] tracks the layout it was last transitioned to so uploads and
//! mip generation can build their barriers without the caller restating it.
//! Cube-compatible images carry six layers per face set and get cube views.

use ash::vk;
use std::sync::Arc;

use super::memory::{Allocation, MemoryClass};
use crate::backend::driver::{DeviceDriver, ImageDesc, ImageViewDesc, SamplerDesc};
use crate::backend::initialization::device::Device;
use crate::backend::rendering::commands::CommandPool;
use crate::backend::{VulkanError, VulkanResult};

/// Aspect implied by a format
pub fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Access masks and stages for a layout transition
fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> (vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags) {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::UNDEFINED, L::GENERAL) => (A::empty(), A::SHADER_READ | A::SHADER_WRITE, S::TOP_OF_PIPE, S::COMPUTE_SHADER),
        _ => (
            A::MEMORY_READ | A::MEMORY_WRITE,
            A::MEMORY_READ | A::MEMORY_WRITE,
            S::ALL_COMMANDS,
            S::ALL_COMMANDS,
        ),
    }
}

/// Levels of a full mip chain down to 1x1
pub fn full_mip_levels(extent: vk::Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Image creation parameters with sensible single-sample defaults
#[derive(Debug, Clone, Copy)]
pub struct ImageSpec {
    /// Texel format
    pub format: vk::Format,
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Mip level count
    pub mip_levels: u32,
    /// Array layer count
    pub layers: u32,
    /// Samples per texel
    pub samples: vk::SampleCountFlags,
    /// Allowed usages
    pub usage: vk::ImageUsageFlags,
    /// Usable as a cube map
    pub cube_compatible: bool,
}

impl ImageSpec {
    /// Single-level, single-layer, single-sample image
    pub fn new(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            extent,
            mip_levels: 1,
            layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            cube_compatible: false,
        }
    }

    /// Six square faces usable as a cube map
    pub fn cube(format: vk::Format, face_size: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            layers: 6,
            cube_compatible: true,
            ..Self::new(
                format,
                vk::Extent2D {
                    width: face_size,
                    height: face_size,
                },
                usage,
            )
        }
    }

    /// Use `samples` per texel
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Use `levels` mip levels
    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    /// View type matching the layer layout
    pub fn view_type(&self) -> vk::ImageViewType {
        match (self.cube_compatible, self.layers) {
            (true, 6) => vk::ImageViewType::CUBE,
            (true, _) => vk::ImageViewType::CUBE_ARRAY,
            (false, 1) => vk::ImageViewType::TYPE_2D,
            (false, _) => vk::ImageViewType::TYPE_2D_ARRAY,
        }
    }

    fn create_flags(&self) -> vk::ImageCreateFlags {
        if self.cube_compatible {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        }
    }
}

/// A device image and its memory
pub struct Image {
    driver: Arc<dyn DeviceDriver>,
    image: vk::Image,
    _allocation: Allocation,
    spec: ImageSpec,
    layout: vk::ImageLayout,
}

impl Image {
    /// Create an optimally tiled image in device-local memory
    pub fn new(device: &Device, spec: ImageSpec) -> VulkanResult<Self> {
        if spec.extent.width == 0 || spec.extent.height == 0 {
            return Err(VulkanError::invalid("image extent must be non-zero"));
        }
        if spec.mip_levels == 0 || spec.mip_levels > full_mip_levels(spec.extent) {
            return Err(VulkanError::invalid(format!(
                "{} mip levels for a {}x{} image",
                spec.mip_levels, spec.extent.width, spec.extent.height
            )));
        }
        if spec.cube_compatible && (spec.layers % 6 != 0 || spec.extent.width != spec.extent.height) {
            return Err(VulkanError::invalid("cube images need square faces and a multiple of 6 layers"));
        }
        let driver = Arc::clone(device.driver());
        let image = driver.create_image(&ImageDesc {
            format: spec.format,
            extent: vk::Extent3D {
                width: spec.extent.width,
                height: spec.extent.height,
                depth: 1,
            },
            mip_levels: spec.mip_levels,
            array_layers: spec.layers,
            samples: spec.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: spec.usage,
            flags: spec.create_flags(),
        })?;

        let requirements = driver.image_memory_requirements(image);
        let allocation = match Allocation::new(device, requirements, MemoryClass::DEVICE_LOCAL) {
            Ok(allocation) => allocation,
            Err(e) => {
                driver.destroy_image(image);
                return Err(e);
            }
        };
        if let Err(e) = driver.bind_image_memory(image, allocation.handle(), 0) {
            driver.destroy_image(image);
            return Err(e);
        }

        Ok(Self {
            driver,
            image,
            _allocation: allocation,
            spec,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    /// Record a layout transition in a one-time command buffer and wait for it
    pub fn transition_layout(&mut self, pool: &CommandPool, new_layout: vk::ImageLayout) -> VulkanResult<()> {
        if self.layout == new_layout {
            return Ok(());
        }
        let barrier = self.barrier(new_layout);
        let (_, _, src_stage, dst_stage) = transition_masks(self.layout, new_layout);
        pool.one_time_submit(|recorder| recorder.pipeline_barrier(src_stage, dst_stage, &[barrier]))?;
        self.layout = new_layout;
        Ok(())
    }

    /// Fill levels 1.. by successive linear blits from level 0
    ///
    /// Level 0 must hold the image contents in `TRANSFER_DST_OPTIMAL`. Every
    /// level ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn generate_mipmaps(&mut self, device: &Device, pool: &CommandPool) -> VulkanResult<()> {
        if self.layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(VulkanError::invalid(format!(
                "mip generation needs TRANSFER_DST_OPTIMAL, image is {:?}",
                self.layout
            )));
        }
        if self.spec.mip_levels > 1 && !self.spec.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            return Err(VulkanError::invalid("mip generation needs TRANSFER_SRC usage"));
        }
        let features = device.driver().format_properties(self.spec.format).optimal_tiling_features;
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            return Err(VulkanError::invalid(format!(
                "{:?} does not support linear blits",
                self.spec.format
            )));
        }

        let levels = self.spec.mip_levels;
        let this = &*self;
        pool.one_time_submit(|recorder| {
            let mut size = this.spec.extent;
            for level in 1..levels {
                recorder.pipeline_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    &[this.level_barrier(
                        level - 1,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    )],
                )?;

                let next = vk::Extent2D {
                    width: (size.width / 2).max(1),
                    height: (size.height / 2).max(1),
                };
                recorder.blit_image(this, &[this.level_blit(level, size, next)])?;

                recorder.pipeline_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    &[this.level_barrier(
                        level - 1,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )],
                )?;
                size = next;
            }
            // The last level was only ever written
            recorder.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                &[this.level_barrier(
                    levels - 1,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )],
            )
        })?;

        log::debug!("Generated {levels} mip levels for {:?} image", self.spec.format);
        self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(())
    }

    fn level_barrier(&self, level: u32, old: vk::ImageLayout, new: vk::ImageLayout) -> vk::ImageMemoryBarrier {
        let (src_access, dst_access) = match new {
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_READ),
            _ if old == vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
                (vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::SHADER_READ)
            }
            _ => (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
        };
        vk::ImageMemoryBarrier::builder()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                base_mip_level: level,
                level_count: 1,
                ..self.subresource_range()
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build()
    }

    fn level_blit(&self, level: u32, from: vk::Extent2D, to: vk::Extent2D) -> vk::ImageBlit {
        let layers = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: aspect_for(self.spec.format),
            mip_level,
            base_array_layer: 0,
            layer_count: self.spec.layers,
        };
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        vk::ImageBlit {
            src_subresource: layers(level - 1),
            src_offsets: [vk::Offset3D::default(), corner(from)],
            dst_subresource: layers(level),
            dst_offsets: [vk::Offset3D::default(), corner(to)],
        }
    }

    /// Barrier moving the whole image from its tracked layout to `new_layout`
    pub(crate) fn barrier(&self, new_layout: vk::ImageLayout) -> vk::ImageMemoryBarrier {
        let (src_access, dst_access, _, _) = transition_masks(self.layout, new_layout);
        vk::ImageMemoryBarrier::builder()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build()
    }

    pub(crate) fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect_for(self.spec.format),
            base_mip_level: 0,
            level_count: self.spec.mip_levels,
            base_array_layer: 0,
            layer_count: self.spec.layers,
        }
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Creation parameters
    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.spec.format
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.spec.extent
    }

    /// Layout the image was last transitioned to
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.driver.destroy_image(self.image);
    }
}

/// A view of an image, owned or swapchain-provided
pub struct ImageView {
    driver: Arc<dyn DeviceDriver>,
    view: vk::ImageView,
    format: vk::Format,
}

impl ImageView {
    /// View of the whole of `image` with identity swizzle
    pub fn new(device: &Device, image: &Image) -> VulkanResult<Self> {
        let spec = image.spec();
        Self::with_swizzle(
            device,
            ImageViewDesc {
                image: image.handle(),
                view_type: spec.view_type(),
                format: spec.format,
                aspect: aspect_for(spec.format),
                components: vk::ComponentMapping::default(),
                mip_levels: spec.mip_levels,
                layer_count: spec.layers,
            },
        )
    }

    /// View of an image not owned by the backend, such as a swapchain image
    pub fn from_raw_image(
        device: &Device,
        image: vk::Image,
        format: vk::Format,
        mip_levels: u32,
        layer_count: u32,
    ) -> VulkanResult<Self> {
        Self::with_swizzle(
            device,
            ImageViewDesc {
                image,
                view_type: if layer_count > 1 {
                    vk::ImageViewType::TYPE_2D_ARRAY
                } else {
                    vk::ImageViewType::TYPE_2D
                },
                format,
                aspect: aspect_for(format),
                components: vk::ComponentMapping::default(),
                mip_levels,
                layer_count,
            },
        )
    }

    /// View with explicit aspect and channel swizzle
    pub fn with_swizzle(device: &Device, desc: ImageViewDesc) -> VulkanResult<Self> {
        let driver = Arc::clone(device.driver());
        let view = driver.create_image_view(&desc)?;
        Ok(Self {
            driver,
            view,
            format: desc.format,
        })
    }

    /// View handle
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    /// View format
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.driver.destroy_image_view(self.view);
    }
}

/// Sampler parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Addressing mode on every axis
    pub address_mode: vk::SamplerAddressMode,
    /// Use the adapter's maximum anisotropy when the feature is present
    pub anisotropy: bool,
    /// Highest mip level sampled
    pub max_lod: f32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: true,
            max_lod: 0.0,
        }
    }
}

/// Texture sampler
pub struct Sampler {
    driver: Arc<dyn DeviceDriver>,
    sampler: vk::Sampler,
    anisotropy: Option<f32>,
}

impl Sampler {
    /// Create a sampler, enabling anisotropy only if the adapter supports it
    pub fn new(device: &Device, settings: SamplerSettings) -> VulkanResult<Self> {
        let adapter = device.adapter();
        let anisotropy = (settings.anisotropy && adapter.features.sampler_anisotropy == vk::TRUE)
            .then_some(adapter.limits.max_sampler_anisotropy);

        let driver = Arc::clone(device.driver());
        let sampler = driver.create_sampler(&SamplerDesc {
            filter: settings.filter,
            address_mode: settings.address_mode,
            anisotropy,
            max_lod: settings.max_lod,
        })?;
        Ok(Self {
            driver,
            sampler,
            anisotropy,
        })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    /// Anisotropy level in use
    pub fn anisotropy(&self) -> Option<f32> {
        self.anisotropy
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.driver.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::{DriverCall, HeadlessInstance, HeadlessProfile};
    use crate::backend::initialization::device::tests::headless_device;
    use crate::config::BackendConfig;

    #[test]
    fn test_aspect_for_formats() {
        assert_eq!(aspect_for(vk::Format::B8G8R8A8_SRGB), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_for(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_transition_records_barrier_and_tracks_layout() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut image = Image::new(
            &device,
            ImageSpec::new(
                vk::Format::R8G8B8A8_SRGB,
                vk::Extent2D { width: 4, height: 4 },
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )
        .unwrap();
        assert_eq!(image.layout(), vk::ImageLayout::UNDEFINED);

        image.transition_layout(&pool, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        // Same layout again records nothing
        instance.clear_calls();
        image.transition_layout(&pool, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert!(instance.calls().is_empty());

        image.transition_layout(&pool, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert!(instance.calls().contains(&DriverCall::PipelineBarrier {
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        }));
        assert!(instance.violations().is_empty());
    }

    #[test]
    fn test_zero_extent_image_is_rejected() {
        let (_instance, device) = headless_device();
        let spec = ImageSpec::new(vk::Format::D32_SFLOAT, vk::Extent2D::default(), vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert!(Image::new(&device, spec).is_err());
    }

    #[test]
    fn test_full_mip_levels() {
        let levels = |width, height| full_mip_levels(vk::Extent2D { width, height });
        assert_eq!(levels(1, 1), 1);
        assert_eq!(levels(256, 128), 9);
        assert_eq!(levels(300, 1), 9);
        assert_eq!(levels(0, 0), 1);
    }

    #[test]
    fn test_mip_count_beyond_chain_is_rejected() {
        let (_instance, device) = headless_device();
        let spec = ImageSpec::new(
            vk::Format::R8G8B8A8_SRGB,
            vk::Extent2D { width: 4, height: 4 },
            vk::ImageUsageFlags::SAMPLED,
        );
        assert!(Image::new(&device, spec.with_mip_levels(4)).is_err());
        assert!(Image::new(&device, spec.with_mip_levels(0)).is_err());
        assert!(Image::new(&device, spec.with_mip_levels(3)).is_ok());
    }

    fn mip_image(device: &Device, format: vk::Format) -> Image {
        let extent = vk::Extent2D { width: 16, height: 16 };
        Image::new(
            device,
            ImageSpec::new(
                format,
                extent,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .with_mip_levels(full_mip_levels(extent)),
        )
        .unwrap()
    }

    #[test]
    fn test_generate_mipmaps_blits_each_level() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut image = mip_image(&device, vk::Format::R8G8B8A8_SRGB);
        image.transition_layout(&pool, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        instance.clear_calls();

        image.generate_mipmaps(&device, &pool).unwrap();
        assert_eq!(image.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let calls = instance.calls();
        let destinations: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                DriverCall::BlitImage { src_level, dst_level } => {
                    assert_eq!(src_level + 1, *dst_level);
                    Some(*dst_level)
                }
                _ => None,
            })
            .collect();
        assert_eq!(destinations, vec![1, 2, 3, 4]);

        let layouts: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                DriverCall::PipelineBarrier { new_layout } => Some(*new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(layouts.len(), 9);
        assert_eq!(layouts.last(), Some(&vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_generate_mipmaps_checks_preconditions() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();

        let mut image = mip_image(&device, vk::Format::R8G8B8A8_SRGB);
        assert!(matches!(
            image.generate_mipmaps(&device, &pool),
            Err(VulkanError::InvalidOperation { .. })
        ));

        let mut image = mip_image(&device, vk::Format::R32G32B32A32_SFLOAT);
        image.transition_layout(&pool, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        instance.clear_calls();
        assert!(matches!(
            image.generate_mipmaps(&device, &pool),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(instance.calls().is_empty());
        assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn test_cube_image_gets_cube_view() {
        let (instance, device) = headless_device();
        let spec = ImageSpec::cube(vk::Format::R8G8B8A8_SRGB, 64, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(spec.view_type(), vk::ImageViewType::CUBE);
        let image = Image::new(&device, spec).unwrap();
        let _view = ImageView::new(&device, &image).unwrap();
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());

        let mut uneven = spec;
        uneven.layers = 4;
        assert!(Image::new(&device, uneven).is_err());
        let mut oblong = spec;
        oblong.extent.height = 32;
        assert!(Image::new(&device, oblong).is_err());
    }

    #[test]
    fn test_sampler_anisotropy_follows_adapter() {
        let (_instance, device) = headless_device();
        let sampler = Sampler::new(&device, SamplerSettings::default()).unwrap();
        approx::assert_relative_eq!(sampler.anisotropy().unwrap(), 16.0);

        let mut adapter = HeadlessProfile::adapter("plain", vk::PhysicalDeviceType::INTEGRATED_GPU);
        adapter.features.sampler_anisotropy = vk::FALSE;
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_adapters(vec![adapter]));
        let mut config = BackendConfig::default();
        config.require_sampler_anisotropy = false;
        let device = Device::initialize(&instance, &config).unwrap();

        let sampler = Sampler::new(&device, SamplerSettings::default()).unwrap();
        assert_eq!(sampler.anisotropy(), None);
        assert!(instance.violations().is_empty());
    }

    #[test]
    fn test_resources_are_destroyed_on_drop() {
        let (instance, device) = headless_device();
        {
            let image = Image::new(
                &device,
                ImageSpec::new(vk::Format::D32_SFLOAT, vk::Extent2D { width: 8, height: 8 }, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
            )
            .unwrap();
            let _view = ImageView::new(&device, &image).unwrap();
            let _sampler = Sampler::new(&device, SamplerSettings::default()).unwrap();
            assert_eq!(instance.live_objects(), vec!["image", "image view", "memory", "sampler"]);
        }
        assert!(instance.live_objects().is_empty());
        assert!(instance.violations().is_empty());
    }
}
