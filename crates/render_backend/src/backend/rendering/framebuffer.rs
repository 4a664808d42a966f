//! Framebuffer management
//!
//! One framebuffer per swapchain image. Depth and multisampled color targets
//! are created once and shared by every framebuffer; the swapchain image slot
//! changes per framebuffer.

use ash::vk;
use std::sync::Arc;

use super::render_pass::{AttachmentRole, RenderPass};
use crate::backend::driver::DeviceDriver;
use crate::backend::initialization::device::Device;
use crate::backend::resources::image::{Image, ImageSpec, ImageView};
use crate::backend::state::swapchain::Swapchain;
use crate::backend::{VulkanError, VulkanResult};

/// Framebuffers for every swapchain image plus their shared targets
pub struct FrameBuffer {
    driver: Arc<dyn DeviceDriver>,
    framebuffers: Vec<vk::Framebuffer>,
    // Views drop before the images they reference
    target_views: Vec<Option<ImageView>>,
    _targets: Vec<Image>,
    extent: vk::Extent2D,
}

impl FrameBuffer {
    /// Build the framebuffers of `render_pass` over `swapchain`
    pub fn new(device: &Device, render_pass: &RenderPass, swapchain: &Swapchain) -> VulkanResult<Self> {
        let extent = swapchain.extent();
        let mut targets = Vec::new();
        let mut target_views = Vec::new();
        for attachment in render_pass.attachments() {
            let usage = match attachment.role {
                AttachmentRole::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                AttachmentRole::Color => {
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                }
                _ => {
                    target_views.push(None);
                    continue;
                }
            };
            let image = Image::new(
                device,
                ImageSpec::new(attachment.format, extent, usage).with_samples(attachment.samples),
            )?;
            target_views.push(Some(ImageView::new(device, &image)?));
            targets.push(image);
        }

        let mut frame_buffer = Self {
            driver: Arc::clone(device.driver()),
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            target_views,
            _targets: targets,
            extent,
        };
        for swapchain_view in swapchain.views() {
            let attachments: Vec<vk::ImageView> = frame_buffer
                .target_views
                .iter()
                .map(|view| view.as_ref().map_or(swapchain_view.handle(), ImageView::handle))
                .collect();
            let framebuffer = frame_buffer
                .driver
                .create_framebuffer(render_pass.handle(), &attachments, extent)?;
            frame_buffer.framebuffers.push(framebuffer);
        }

        log::debug!(
            "Created {} framebuffers ({}x{})",
            frame_buffer.framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(frame_buffer)
    }

    /// Framebuffer rendering into swapchain image `index`
    pub fn framebuffer(&self, index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers.get(index as usize).copied().ok_or_else(|| {
            VulkanError::invalid(format!(
                "no framebuffer for image {index} ({} created)",
                self.framebuffers.len()
            ))
        })
    }

    /// Number of framebuffers
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    /// Whether no framebuffer was created
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Shared size of every framebuffer
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.driver.destroy_framebuffer(framebuffer);
        }
    }
}
