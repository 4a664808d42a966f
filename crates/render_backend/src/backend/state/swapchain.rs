//! Vulkan swapchain management
//!
//! Surface negotiation is split into pure `choose_*` functions so the rules
//! can be checked without a GPU:
//!
//! | property      | rule                                                    |
//! |---------------|---------------------------------------------------------|
//! | format        | `B8G8R8A8_SRGB` + `SRGB_NONLINEAR`, else the first one   |
//! | present mode  | the requested one if listed, else FIFO                  |
//! | extent        | the surface's current extent, else the request clamped  |
//! | image count   | minimum + 1, capped by a non-zero maximum               |
//! | alpha         | opaque, pre-multiplied, post-multiplied, inherit        |
//!
//! A [`Swapchain`] is never mutated in place: recreation drops the old one
//! and builds a new one from the current surface state. A surface reporting a
//! zero extent (a minimized window on most platforms) cannot back a
//! swapchain; callers check [`surface_extent`] first and suspend instead.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::driver::{AcquireOutcome, DeviceDriver, PresentOutcome, SwapchainDesc};
use crate::backend::initialization::device::Device;
use crate::backend::resources::image::ImageView;
use crate::backend::{VulkanError, VulkanResult};
use crate::config::PresentMode;

/// Prefer 8-bit sRGB BGRA, else whatever the surface lists first
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| available.first())
        .copied()
        .ok_or(VulkanError::NoSupportedFormat)
}

/// Requested mode if supported, FIFO otherwise
///
/// [`PresentMode::Adaptive`] takes the lowest-latency mode available:
/// mailbox, then immediate, then FIFO.
pub fn choose_present_mode(available: &[vk::PresentModeKHR], requested: PresentMode) -> vk::PresentModeKHR {
    let chosen = match requested.to_vk() {
        Some(mode) => available.contains(&mode).then_some(mode),
        None => [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| available.contains(mode)),
    };
    chosen.unwrap_or_else(|| {
        if requested != PresentMode::Adaptive {
            log::warn!("Present mode {requested:?} not supported, falling back to FIFO");
        }
        vk::PresentModeKHR::FIFO
    })
}

/// The surface's extent when it reports one, else `requested` clamped to its bounds
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Extent a swapchain created now would get; zero while the surface has no area
pub fn surface_extent(device: &Device, requested: vk::Extent2D) -> VulkanResult<vk::Extent2D> {
    let caps = device.driver().surface_capabilities()?;
    Ok(choose_extent(&caps, requested))
}

/// One image above the minimum, capped by the maximum when there is one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        preferred.min(caps.max_image_count)
    } else {
        preferred
    }
}

/// Opaque, then pre-multiplied, then post-multiplied, then inherit
pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|mode| supported.contains(*mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    driver: Arc<dyn DeviceDriver>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain sized for `requested` (used when the surface leaves it open)
    pub fn new(device: &Device, requested: vk::Extent2D, present_mode: PresentMode) -> VulkanResult<Self> {
        let driver = Arc::clone(device.driver());
        let caps = driver.surface_capabilities()?;
        let surface_format = choose_surface_format(&driver.surface_formats()?)?;
        let present_mode = choose_present_mode(&driver.surface_present_modes()?, present_mode);
        let extent = choose_extent(&caps, requested);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::invalid("cannot create a swapchain with zero extent"));
        }
        let image_count = choose_image_count(&caps);

        let families = device.queue_families();
        let shared_families = if families.graphics == families.present {
            Vec::new()
        } else {
            families.unique()
        };

        let swapchain = driver.create_swapchain(&SwapchainDesc {
            min_image_count: image_count,
            surface_format,
            extent,
            present_mode,
            pre_transform: caps.current_transform,
            composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
            shared_families,
            old_swapchain: vk::SwapchainKHR::null(),
        })?;

        let images = match driver.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                driver.destroy_swapchain(swapchain);
                return Err(e);
            }
        };
        let views: VulkanResult<Vec<_>> = images
            .iter()
            .map(|&image| ImageView::from_raw_image(device, image, surface_format.format, 1, 1))
            .collect();
        let views = match views {
            Ok(views) => views,
            Err(e) => {
                driver.destroy_swapchain(swapchain);
                return Err(e);
            }
        };

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );
        Ok(Self {
            driver,
            swapchain,
            images,
            views,
            surface_format,
            extent,
            present_mode,
        })
    }

    /// Acquire the next image, signaling `semaphore` once it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout: Duration) -> VulkanResult<AcquireOutcome> {
        self.driver.acquire_next_image(self.swapchain, timeout, semaphore)
    }

    /// Queue image `index` for presentation after `wait` signals
    pub fn present(&self, queue: vk::Queue, index: u32, wait: &[vk::Semaphore]) -> VulkanResult<PresentOutcome> {
        self.driver.queue_present(queue, self.swapchain, index, wait)
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Presentable images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per image
    pub fn views(&self) -> &[ImageView] {
        &self.views
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Image format and color space
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Negotiated presentation mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.views.clear();
        self.driver.destroy_swapchain(self.swapchain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::{DriverCall, HeadlessInstance, HeadlessProfile};
    use crate::config::BackendConfig;

    /// ash's flag wrappers have no `all()`; supply the union of every defined bit for tests.
    trait AllFlags {
        fn all() -> Self;
    }

    impl AllFlags for vk::CompositeAlphaFlagsKHR {
        fn all() -> Self {
            Self::OPAQUE | Self::PRE_MULTIPLIED | Self::POST_MULTIPLIED | Self::INHERIT
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 1024, height: 1024 },
            ..Default::default()
        }
    }

    #[test]
    fn test_present_mode_fallback() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], PresentMode::Mailbox), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO], PresentMode::Mailbox), M::FIFO);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], PresentMode::Immediate), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO], PresentMode::FifoRelaxed), M::FIFO);

        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX], PresentMode::Adaptive), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], PresentMode::Adaptive), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO], PresentMode::Adaptive), M::FIFO);
    }

    #[test]
    fn test_image_count_bounds() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(1, 2)), 2);
        for (min, max) in [(1, 1), (2, 2), (2, 3), (4, 0), (3, 16)] {
            let count = choose_image_count(&caps(min, max));
            assert!(count >= min);
            assert!(max == 0 || count <= max);
        }
    }

    #[test]
    fn test_extent_follows_surface_or_clamps_request() {
        let mut surface = caps(2, 3);
        let huge = vk::Extent2D { width: 5000, height: 4 };
        assert_eq!(choose_extent(&surface, huge), vk::Extent2D { width: 1024, height: 16 });

        surface.current_extent = vk::Extent2D { width: 640, height: 480 };
        assert_eq!(choose_extent(&surface, huge), surface.current_extent);
    }

    #[test]
    fn test_surface_format_and_alpha_preferences() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap(), srgb);
        assert_eq!(choose_surface_format(&[unorm]).unwrap(), unorm);
        assert!(choose_surface_format(&[]).is_err());

        let alpha = vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(choose_composite_alpha(alpha), vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED);
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::all()),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn test_reinit_is_deterministic() {
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_image_count(2, 4));
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        let requested = vk::Extent2D { width: 800, height: 600 };

        let first = Swapchain::new(&device, requested, PresentMode::Mailbox).unwrap();
        let shape = (first.image_count(), first.format(), first.extent(), first.present_mode());
        drop(first);
        let second = Swapchain::new(&device, requested, PresentMode::Mailbox).unwrap();
        assert_eq!(shape, (second.image_count(), second.format(), second.extent(), second.present_mode()));
        assert_eq!(second.image_count(), 3);
        assert_eq!(second.format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(second.views().len(), 3);

        let created = instance
            .calls()
            .into_iter()
            .filter(|call| matches!(call, DriverCall::CreateSwapchain { .. }))
            .count();
        assert_eq!(created, 2);
        drop(second);
        assert!(instance.live_objects().is_empty());
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_unsupported_mode_falls_back_on_device() {
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_present_modes(vec![vk::PresentModeKHR::FIFO]));
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        let swapchain = Swapchain::new(&device, vk::Extent2D { width: 64, height: 64 }, PresentMode::Immediate).unwrap();
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::FIFO);
        assert!(instance.violations().is_empty());
    }

    #[test]
    fn test_surface_extent_reports_minimized_surface() {
        let instance = HeadlessInstance::default();
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        let requested = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(surface_extent(&device, requested).unwrap(), requested);

        instance.set_surface_extent(Some(vk::Extent2D { width: 0, height: 0 }));
        assert_eq!(
            surface_extent(&device, requested).unwrap(),
            vk::Extent2D { width: 0, height: 0 }
        );
    }

    #[test]
    fn test_zero_extent_is_rejected() {
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_surface_extent(Some(vk::Extent2D {
            width: 0,
            height: 0,
        })));
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        let result = Swapchain::new(&device, vk::Extent2D { width: 0, height: 0 }, PresentMode::Fifo);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        assert!(instance.live_objects().is_empty());
    }
}
