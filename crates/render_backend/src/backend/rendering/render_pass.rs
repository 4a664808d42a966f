//! Render pass management
//!
//! A render pass is described by an ordered list of [`SubpassTag`]s. Each tag
//! contributes one attachment, in list order, to a single graphics subpass;
//! framebuffers bind their views in the same order.

use ash::vk;
use std::sync::Arc;

use crate::backend::driver::{DeviceDriver, RenderPassDesc};
use crate::backend::initialization::device::Device;
use crate::backend::{VulkanError, VulkanResult};

/// Attachment requested for the main subpass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubpassTag {
    /// The presentable swapchain image
    Swapchain,
    /// Depth-stencil buffer
    Depth,
    /// Multisampled color target resolved into the swapchain image
    Color,
    /// Draw over an already rendered swapchain image
    Overlay,
}

/// How an attachment is used by the subpass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    /// Swapchain image rendered to directly
    Present,
    /// Swapchain image receiving the multisample resolve
    Resolve,
    /// Multisampled color target
    Color,
    /// Depth-stencil target
    Depth,
    /// Swapchain image loaded and drawn over
    Overlay,
}

impl AttachmentRole {
    /// Whether the attachment is the swapchain image itself
    pub fn is_swapchain_image(self) -> bool {
        matches!(self, Self::Present | Self::Resolve | Self::Overlay)
    }
}

/// One attachment of the render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    /// Usage in the subpass
    pub role: AttachmentRole,
    /// Texel format
    pub format: vk::Format,
    /// Samples per texel
    pub samples: vk::SampleCountFlags,
}

/// Formats and sample counts of every attachment
///
/// Pipelines built against one render pass can be used with any other pass
/// that has an equal key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassCompatibility(Vec<(vk::Format, vk::SampleCountFlags)>);

fn unsupported(reason: impl Into<String>) -> VulkanError {
    VulkanError::UnsupportedRenderPassConfiguration { reason: reason.into() }
}

/// Validate `tags` and lay out their attachments
///
/// `depth_format` is only consulted when the list holds [`SubpassTag::Depth`].
/// Without a multisampled color target every attachment is single-sampled.
pub fn plan_attachments(
    tags: &[SubpassTag],
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    samples: vk::SampleCountFlags,
) -> VulkanResult<Vec<AttachmentInfo>> {
    if tags.is_empty() {
        return Err(unsupported("no subpass tags"));
    }
    for (index, tag) in tags.iter().enumerate() {
        if tags[..index].contains(tag) {
            return Err(unsupported(format!("{tag:?} listed twice")));
        }
    }

    let has = |tag| tags.contains(&tag);
    let swapchain = has(SubpassTag::Swapchain);
    let color = has(SubpassTag::Color);
    let overlay = has(SubpassTag::Overlay);

    if !swapchain && !overlay {
        return Err(unsupported("no presentable attachment"));
    }
    if overlay && (swapchain || color) {
        return Err(unsupported("overlay cannot be combined with swapchain or color targets"));
    }
    if color && !swapchain {
        return Err(unsupported("color target needs a swapchain image to resolve into"));
    }
    if color && samples == vk::SampleCountFlags::TYPE_1 {
        return Err(unsupported("color target requires multisampling"));
    }

    let target_samples = if color { samples } else { vk::SampleCountFlags::TYPE_1 };
    tags.iter()
        .map(|tag| {
            let info = match tag {
                SubpassTag::Swapchain => AttachmentInfo {
                    role: if color { AttachmentRole::Resolve } else { AttachmentRole::Present },
                    format: color_format,
                    samples: vk::SampleCountFlags::TYPE_1,
                },
                SubpassTag::Color => AttachmentInfo {
                    role: AttachmentRole::Color,
                    format: color_format,
                    samples: target_samples,
                },
                SubpassTag::Depth => AttachmentInfo {
                    role: AttachmentRole::Depth,
                    format: depth_format.ok_or(VulkanError::NoSupportedFormat)?,
                    samples: target_samples,
                },
                SubpassTag::Overlay => AttachmentInfo {
                    role: AttachmentRole::Overlay,
                    format: color_format,
                    samples: vk::SampleCountFlags::TYPE_1,
                },
            };
            Ok::<_, VulkanError>(info)
        })
        .collect()
}

fn attachment_description(info: &AttachmentInfo) -> vk::AttachmentDescription {
    let (load_op, store_op, initial_layout, final_layout) = match info.role {
        AttachmentRole::Present => (
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
        AttachmentRole::Resolve => (
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::STORE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
        AttachmentRole::Color => (
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::DONT_CARE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        AttachmentRole::Depth => (
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::DONT_CARE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        AttachmentRole::Overlay => (
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::STORE,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
    };

    vk::AttachmentDescription::builder()
        .format(info.format)
        .samples(info.samples)
        .load_op(load_op)
        .store_op(store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial_layout)
        .final_layout(final_layout)
        .build()
}

/// Attachments, references and the external dependency of one subpass
pub fn render_pass_desc(attachments: &[AttachmentInfo]) -> RenderPassDesc {
    let reference = |index: usize, layout| {
        vk::AttachmentReference::builder()
            .attachment(index as u32)
            .layout(layout)
            .build()
    };

    let mut desc = RenderPassDesc {
        attachments: attachments.iter().map(attachment_description).collect(),
        ..Default::default()
    };
    let mut has_depth = false;
    for (index, info) in attachments.iter().enumerate() {
        match info.role {
            AttachmentRole::Present | AttachmentRole::Color | AttachmentRole::Overlay => {
                desc.color.push(reference(index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
            }
            AttachmentRole::Resolve => {
                desc.resolve.push(reference(index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
            }
            AttachmentRole::Depth => {
                desc.depth = Some(reference(index, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
                has_depth = true;
            }
        }
    }

    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if has_depth {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    desc.dependencies.push(
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(access)
            .build(),
    );
    desc
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    driver: Arc<dyn DeviceDriver>,
    render_pass: vk::RenderPass,
    tags: Vec<SubpassTag>,
    attachments: Vec<AttachmentInfo>,
}

impl RenderPass {
    /// Create a render pass rendering into images of `color_format`
    pub fn new(device: &Device, tags: &[SubpassTag], color_format: vk::Format) -> VulkanResult<Self> {
        let depth_format = if tags.contains(&SubpassTag::Depth) {
            Some(device.depth_format()?)
        } else {
            None
        };
        let attachments = plan_attachments(tags, color_format, depth_format, device.msaa_samples())?;
        let driver = Arc::clone(device.driver());
        let render_pass = driver.create_render_pass(&render_pass_desc(&attachments))?;
        log::debug!("Created render pass {:?} with {} attachments", tags, attachments.len());

        Ok(Self {
            driver,
            render_pass,
            tags: tags.to_vec(),
            attachments,
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Tags the pass was built from
    pub fn tags(&self) -> &[SubpassTag] {
        &self.tags
    }

    /// Attachments in framebuffer order
    pub fn attachments(&self) -> &[AttachmentInfo] {
        &self.attachments
    }

    /// Sample count pipelines must rasterize with
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.attachments
            .iter()
            .find(|a| a.role != AttachmentRole::Resolve)
            .map(|a| a.samples)
            .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    /// Whether the subpass writes depth
    pub fn has_depth(&self) -> bool {
        self.attachments.iter().any(|a| a.role == AttachmentRole::Depth)
    }

    /// Key deciding whether pipelines survive a rebuild of this pass
    pub fn compatibility(&self) -> RenderPassCompatibility {
        RenderPassCompatibility(self.attachments.iter().map(|a| (a.format, a.samples)).collect())
    }

    /// One clear value per attachment
    pub fn clear_values(&self, clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.attachments
            .iter()
            .map(|attachment| match attachment.role {
                AttachmentRole::Depth => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
                _ => vk::ClearValue {
                    color: vk::ClearColorValue { float32: clear_color },
                },
            })
            .collect()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.driver.destroy_render_pass(self.render_pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::{DriverCall, HeadlessInstance, HeadlessProfile};
    use crate::config::BackendConfig;

    const SRGB: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;

    fn plan(tags: &[SubpassTag], samples: vk::SampleCountFlags) -> VulkanResult<Vec<AttachmentInfo>> {
        plan_attachments(tags, SRGB, Some(DEPTH), samples)
    }

    #[test]
    fn test_multisampled_pass_resolves_into_swapchain() {
        let tags = [SubpassTag::Swapchain, SubpassTag::Depth, SubpassTag::Color];
        let attachments = plan(&tags, vk::SampleCountFlags::TYPE_4).unwrap();
        let roles: Vec<_> = attachments.iter().map(|a| a.role).collect();
        assert_eq!(roles, vec![AttachmentRole::Resolve, AttachmentRole::Depth, AttachmentRole::Color]);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_4);

        let desc = render_pass_desc(&attachments);
        assert_eq!(desc.attachments[0].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.attachments[2].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(desc.color.len(), 1);
        assert_eq!(desc.color[0].attachment, 2);
        assert_eq!(desc.resolve[0].attachment, 0);
        assert_eq!(desc.depth.map(|d| d.attachment), Some(1));

        assert_eq!(desc.dependencies.len(), 1);
        let dependency = desc.dependencies[0];
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(dependency.dst_stage_mask.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn test_single_sampled_pass_presents_directly() {
        let attachments = plan(&[SubpassTag::Swapchain, SubpassTag::Depth], vk::SampleCountFlags::TYPE_4).unwrap();
        assert_eq!(attachments[0].role, AttachmentRole::Present);
        assert!(attachments.iter().all(|a| a.samples == vk::SampleCountFlags::TYPE_1));

        let desc = render_pass_desc(&attachments);
        assert_eq!(desc.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.attachments[0].initial_layout, vk::ImageLayout::UNDEFINED);
        assert!(desc.resolve.is_empty());
    }

    #[test]
    fn test_overlay_loads_presented_image() {
        let attachments = plan(&[SubpassTag::Overlay], vk::SampleCountFlags::TYPE_1).unwrap();
        let desc = render_pass_desc(&attachments);
        assert_eq!(desc.attachments[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(desc.attachments[0].initial_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(!desc.dependencies[0].dst_stage_mask.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn test_invalid_tag_lists_are_rejected() {
        let x4 = vk::SampleCountFlags::TYPE_4;
        let cases: [&[SubpassTag]; 5] = [
            &[],
            &[SubpassTag::Swapchain, SubpassTag::Swapchain],
            &[SubpassTag::Depth],
            &[SubpassTag::Color, SubpassTag::Depth],
            &[SubpassTag::Overlay, SubpassTag::Swapchain],
        ];
        for tags in cases {
            assert!(
                matches!(plan(tags, x4), Err(VulkanError::UnsupportedRenderPassConfiguration { .. })),
                "{tags:?} accepted"
            );
        }

        let single = plan(&[SubpassTag::Swapchain, SubpassTag::Color], vk::SampleCountFlags::TYPE_1);
        assert!(matches!(single, Err(VulkanError::UnsupportedRenderPassConfiguration { .. })));
    }

    #[test]
    fn test_compatibility_tracks_formats_and_samples() {
        let (instance, device) = crate::backend::initialization::device::tests::headless_device();
        let tags = [SubpassTag::Swapchain, SubpassTag::Depth, SubpassTag::Color];
        let first = RenderPass::new(&device, &tags, SRGB).unwrap();
        let second = RenderPass::new(&device, &tags, SRGB).unwrap();
        let other = RenderPass::new(&device, &tags, vk::Format::B8G8R8A8_UNORM).unwrap();

        assert_eq!(first.compatibility(), second.compatibility());
        assert_ne!(first.compatibility(), other.compatibility());
        assert_eq!(first.samples(), vk::SampleCountFlags::TYPE_4);
        assert!(first.has_depth());
        assert_eq!(first.clear_values([0.0; 4]).len(), 3);
        assert!(instance.calls().contains(&DriverCall::CreateRenderPass { attachments: 3 }));

        drop((first, second, other));
        assert!(instance.live_objects().is_empty());
    }

    #[test]
    fn test_missing_depth_format_is_fatal() {
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_depth_formats(Vec::new()));
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        let result = RenderPass::new(&device, &[SubpassTag::Swapchain, SubpassTag::Depth], SRGB);
        assert!(matches!(result, Err(VulkanError::NoSupportedFormat)));

        let without_depth = RenderPass::new(&device, &[SubpassTag::Swapchain], SRGB);
        assert!(without_depth.is_ok());
    }
}
