//! Renderer: owns the GPU objects and runs the per-frame protocol
//!
//! # Frame protocol
//!
//! Every frame uses slot `i = current_frame` and its own command buffer:
//!
//! 1. wait `in_flight[i]`; the slot's command buffer and semaphores are free again
//! 2. acquire an image `j`, signaling `image_available[i]`
//! 3. reset and record command buffer `i`: compute dispatches first, then one
//!    render pass into framebuffer `j` with the draw items in order
//! 4. reset `in_flight[i]`, submit, signal `render_finished[i]` and `in_flight[i]`
//! 5. present `j` after `render_finished[i]`, then advance to slot `i + 1 mod K`
//!
//! Command buffers belong to slots rather than swapchain images, so exactly
//! one fence wait precedes every reuse whatever the image count. Image `j`
//! itself cannot be rendered to twice at once: it is only handed out again
//! after its presentation, which waits for the rendering that preceded it.
//!
//! # Swapchain recreation
//!
//! A stale swapchain during acquisition rebuilds the presentation targets and
//! abandons the frame with the slot fence still signaled; staleness reported
//! by presentation rebuilds them after the frame completes. Rebuilding waits
//! for the device, drops framebuffers, render pass and swapchain in that
//! order, then builds them again from the current surface. Pipelines are
//! rebuilt only when the new render pass is incompatible with theirs.
//!
//! # Suspension
//!
//! While the window or the surface reports a zero-area extent there is
//! nothing to render to. The targets stay dropped, every frame is
//! [`FrameOutcome::Skipped`], and the next frame after the surface regains an
//! area rebuilds them.
//!
//! # Ownership
//!
//! Pipelines and resources live in slot maps and are referenced by
//! generation-checked handles. Fields drop in declaration order, so every
//! object is released before the device it was created from.

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::backend::driver::{AcquireOutcome, InstanceDriver, PresentOutcome, SubmitDesc};
use crate::backend::initialization::device::Device;
use crate::backend::rendering::commands::{CommandBufferManager, CommandPool};
use crate::backend::rendering::framebuffer::FrameBuffer;
use crate::backend::rendering::pipeline::{Pipeline, PipelineSpecification, PipelineUsage, ResourceSet};
use crate::backend::rendering::pipeline_cache::PipelineCache;
use crate::backend::rendering::render_pass::{AttachmentRole, RenderPass, SubpassTag};
use crate::backend::resources::arena::{BufferHandle, ResourceArena, ResourceHandle, TextureHandle};
use crate::backend::resources::buffer::{Buffer, BufferKind, IndexWidth};
use crate::backend::resources::image::{full_mip_levels, SamplerSettings};
use crate::backend::resources::memory::MemoryClass;
use crate::backend::resources::texture::Texture;
use crate::backend::state::frame::{FrameSlots, SlotState};
use crate::backend::state::swapchain::{self, Swapchain};
use crate::backend::state::sync::FrameSync;
use crate::backend::{VulkanError, VulkanResult};
use crate::config::{BackendConfig, PresentMode};

new_key_type! {
    /// Handle to a pipeline owned by the renderer
    pub struct PipelineHandle;
}

/// One draw call of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawItem {
    /// Graphics pipeline to bind
    pub pipeline: PipelineHandle,
    /// Resource set bound with the pipeline
    pub resources: Option<ResourceSet>,
    /// Vertex buffers, in binding order
    pub vertex_buffers: Vec<BufferHandle>,
    /// Index buffer; the draw is indexed when present
    pub index_buffer: Option<BufferHandle>,
    /// Indices for indexed draws, vertices otherwise
    pub count: u32,
    /// Instance count
    pub instances: u32,
}

impl DrawItem {
    /// Non-indexed draw of `vertex_count` vertices
    pub fn vertices(pipeline: PipelineHandle, vertex_count: u32) -> Self {
        Self {
            pipeline,
            resources: None,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            count: vertex_count,
            instances: 1,
        }
    }

    /// Indexed draw of `index_count` indices
    pub fn indexed(pipeline: PipelineHandle, vertices: BufferHandle, indices: BufferHandle, index_count: u32) -> Self {
        Self {
            pipeline,
            resources: None,
            vertex_buffers: vec![vertices],
            index_buffer: Some(indices),
            count: index_count,
            instances: 1,
        }
    }

    /// Bind a resource set with the pipeline
    pub fn with_resources(mut self, resources: ResourceSet) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Add a vertex buffer binding
    pub fn with_vertex_buffer(mut self, buffer: BufferHandle) -> Self {
        self.vertex_buffers.push(buffer);
        self
    }

    /// Draw `instances` instances
    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }
}

/// One compute dispatch of a frame, recorded before the render pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchItem {
    /// Compute pipeline to bind
    pub pipeline: PipelineHandle,
    /// Resource set bound with the pipeline
    pub resources: Option<ResourceSet>,
    /// Workgroup counts
    pub groups: [u32; 3],
}

impl DispatchItem {
    /// Dispatch `groups` workgroups of `pipeline`
    pub fn new(pipeline: PipelineHandle, groups: [u32; 3]) -> Self {
        Self {
            pipeline,
            resources: None,
            groups,
        }
    }

    /// Bind a resource set with the pipeline
    pub fn with_resources(mut self, resources: ResourceSet) -> Self {
        self.resources = Some(resources);
        self
    }
}

/// Work recorded into one frame, in submission order
///
/// Dispatches run before the render pass and their writes are visible to
/// every draw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawList {
    dispatches: Vec<DispatchItem>,
    items: Vec<DrawItem>,
}

impl DrawList {
    /// Empty list; the frame only clears its attachments
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a draw
    pub fn push(&mut self, item: DrawItem) {
        self.items.push(item);
    }

    /// Append a compute dispatch
    pub fn push_dispatch(&mut self, item: DispatchItem) {
        self.dispatches.push(item);
    }

    /// Draws in submission order
    pub fn items(&self) -> &[DrawItem] {
        &self.items
    }

    /// Dispatches in submission order
    pub fn dispatches(&self) -> &[DispatchItem] {
        &self.dispatches
    }

    /// Number of draws and dispatches
    pub fn len(&self) -> usize {
        self.items.len() + self.dispatches.len()
    }

    /// Whether the list records no work
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.dispatches.is_empty()
    }
}

impl FromIterator<DrawItem> for DrawList {
    fn from_iter<I: IntoIterator<Item = DrawItem>>(iter: I) -> Self {
        Self {
            dispatches: Vec::new(),
            items: iter.into_iter().collect(),
        }
    }
}

/// Mip chain of an uploaded texture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MipLevels {
    /// Base level only
    #[default]
    Single,
    /// Every level down to 1x1, generated by blits
    Full,
}

/// What [`Renderer::draw_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented
    Presented {
        /// Frame slot used
        slot: usize,
        /// Swapchain image presented
        image_index: u32,
    },
    /// Nothing was submitted: the window has no area or the swapchain was rebuilt
    Skipped,
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames submitted and presented
    pub frames_presented: u64,
    /// Frames skipped
    pub frames_skipped: u64,
    /// Presentation target rebuilds
    pub swapchain_recreations: u64,
    /// Pipelines rebuilt after a render pass change
    pub pipeline_recreations: u64,
}

/// Swapchain and everything sized from it; fields drop in dependency order
struct PresentTargets {
    framebuffer: FrameBuffer,
    render_pass: RenderPass,
    swapchain: Swapchain,
}

impl PresentTargets {
    fn new(
        device: &Device,
        pool: &CommandPool,
        extent: vk::Extent2D,
        present_mode: PresentMode,
        subpasses: &[SubpassTag],
    ) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(device, extent, present_mode)?;
        let render_pass = RenderPass::new(device, subpasses, swapchain.format())?;
        let framebuffer = FrameBuffer::new(device, &render_pass, &swapchain)?;

        // An overlay pass loads the image in PRESENT_SRC, which fresh images are not in
        let loads_image = render_pass
            .attachments()
            .iter()
            .any(|attachment| attachment.role == AttachmentRole::Overlay);
        if loads_image {
            let barriers: Vec<_> = swapchain.images().iter().map(|&image| present_ready_barrier(image)).collect();
            pool.one_time_submit(|recorder| {
                recorder.pipeline_barrier(
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    &barriers,
                )
            })?;
            log::debug!("Moved {} swapchain images to PRESENT_SRC for overlay", barriers.len());
        }

        Ok(Self {
            framebuffer,
            render_pass,
            swapchain,
        })
    }
}

fn present_ready_barrier(image: vk::Image) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()
}

/// Vulkan renderer
pub struct Renderer {
    pipelines: SlotMap<PipelineHandle, Pipeline>,
    resources: ResourceArena,
    frame_sync: Vec<FrameSync>,
    commands: CommandBufferManager,
    command_pool: CommandPool,
    targets: Option<PresentTargets>,
    pipeline_cache: PipelineCache,
    device: Device,
    config: BackendConfig,
    subpasses: Vec<SubpassTag>,
    slots: FrameSlots,
    extent: vk::Extent2D,
    stats: FrameStats,
    shut_down: bool,
}

impl Renderer {
    /// Build the device and every presentation object for a window of `extent`
    pub fn new(
        instance: &dyn InstanceDriver,
        config: BackendConfig,
        extent: vk::Extent2D,
        subpasses: &[SubpassTag],
    ) -> VulkanResult<Self> {
        log::debug!("Creating Renderer...");
        let device = Device::initialize(instance, &config)?;

        let pipeline_cache = match &config.pipeline_cache_path {
            Some(path) => PipelineCache::load(&device, path)?,
            None => PipelineCache::new(&device, &[])?,
        };
        let command_pool = CommandPool::new(&device)?;
        let targets = PresentTargets::new(&device, &command_pool, extent, config.present_mode, subpasses)?;
        let commands = CommandBufferManager::new(&command_pool, config.frames_in_flight)?;
        let frame_sync = FrameSync::for_slots(&device, config.frames_in_flight)?;
        let slots = FrameSlots::new(config.frames_in_flight)?;

        log::info!(
            "Renderer ready: {} swapchain images, {} frames in flight, {:?} subpasses",
            targets.swapchain.image_count(),
            config.frames_in_flight,
            subpasses
        );
        Ok(Self {
            pipelines: SlotMap::with_key(),
            resources: ResourceArena::new(),
            frame_sync,
            commands,
            command_pool,
            targets: Some(targets),
            pipeline_cache,
            device,
            config,
            subpasses: subpasses.to_vec(),
            slots,
            extent,
            stats: FrameStats::default(),
            shut_down: false,
        })
    }

    fn targets(&self) -> VulkanResult<&PresentTargets> {
        self.targets
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("presentation targets are not available"))
    }

    /// Render and present one frame
    pub fn draw_frame(&mut self, draw_list: &DrawList) -> VulkanResult<FrameOutcome> {
        if self.extent.width == 0 || self.extent.height == 0 {
            self.stats.frames_skipped += 1;
            return Ok(FrameOutcome::Skipped);
        }
        if self.targets.is_none() {
            self.recreate_targets()?;
            if self.targets.is_none() {
                self.stats.frames_skipped += 1;
                return Ok(FrameOutcome::Skipped);
            }
        }
        self.check_draw_list(draw_list)?;

        let slot = self.slots.current();
        let timeout = self.device.fence_timeout();
        self.slots.advance(SlotState::Acquiring)?;
        self.frame_sync[slot].in_flight.wait(timeout)?;
        self.commands.retire(slot)?;

        let image_available = self.frame_sync[slot].image_available.handle();
        let acquired = self.targets()?.swapchain.acquire_next_image(image_available, timeout)?;
        let (image_index, mut stale) = match acquired {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, abandoning frame");
                self.slots.abandon()?;
                self.recreate_targets()?;
                self.stats.frames_skipped += 1;
                return Ok(FrameOutcome::Skipped);
            }
        };

        self.slots.advance(SlotState::Recording)?;
        let command_buffer = self.record(draw_list, slot, image_index)?;

        let in_flight = &self.frame_sync[slot].in_flight;
        let render_finished = self.frame_sync[slot].render_finished.handle();
        in_flight.reset()?;
        self.device.driver().queue_submit(
            self.device.graphics_queue(),
            &SubmitDesc {
                wait_semaphores: &[image_available],
                wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                command_buffers: &[command_buffer],
                signal_semaphores: &[render_finished],
                fence: in_flight.handle(),
            },
        )?;
        self.commands.mark_submitted(slot, in_flight.handle())?;
        self.slots.advance(SlotState::Submitted)?;

        self.slots.advance(SlotState::Presenting)?;
        let presented =
            self.targets()?
                .swapchain
                .present(self.device.present_queue(), image_index, &[render_finished])?;
        match presented {
            PresentOutcome::Presented { suboptimal } => stale |= suboptimal,
            PresentOutcome::OutOfDate => stale = true,
        }
        self.slots.complete()?;
        self.stats.frames_presented += 1;

        if stale {
            log::debug!("Swapchain stale after present, recreating");
            self.recreate_targets()?;
        }
        Ok(FrameOutcome::Presented { slot, image_index })
    }

    fn check_draw_list(&self, draw_list: &DrawList) -> VulkanResult<()> {
        let expect_usage = |handle: PipelineHandle, usage: PipelineUsage, what: &str| -> VulkanResult<()> {
            let pipeline = self
                .pipelines
                .get(handle)
                .ok_or(VulkanError::StaleHandle { kind: "pipeline" })?;
            if pipeline.usage() == usage {
                Ok(())
            } else {
                Err(VulkanError::invalid(format!("{:?} pipeline in a {what}", pipeline.usage())))
            }
        };
        for dispatch in draw_list.dispatches() {
            expect_usage(dispatch.pipeline, PipelineUsage::Compute, "dispatch")?;
        }
        for item in draw_list.items() {
            expect_usage(item.pipeline, PipelineUsage::Graphics, "draw")?;
            for buffer in item.vertex_buffers.iter().chain(&item.index_buffer) {
                self.resources.buffer(*buffer)?;
            }
        }
        Ok(())
    }

    fn record(&mut self, draw_list: &DrawList, slot: usize, image_index: u32) -> VulkanResult<vk::CommandBuffer> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("presentation targets are not available"))?;
        let framebuffer = targets.framebuffer.framebuffer(image_index)?;
        let clear_values = targets.render_pass.clear_values(self.config.clear_color);

        let mut recorder = self.commands.begin(slot)?;
        for dispatch in draw_list.dispatches() {
            let pipeline = self
                .pipelines
                .get(dispatch.pipeline)
                .ok_or(VulkanError::StaleHandle { kind: "pipeline" })?;
            let sets = dispatch.resources.as_ref().map_or(&[][..], ResourceSet::handles);
            recorder.bind_pipeline(pipeline, sets)?;
            let [x, y, z] = dispatch.groups;
            recorder.dispatch(x, y, z)?;
        }
        if !draw_list.dispatches().is_empty() {
            recorder.memory_barrier(
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::VERTEX_INPUT
                    | vk::PipelineStageFlags::VERTEX_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                    | vk::AccessFlags::INDEX_READ
                    | vk::AccessFlags::UNIFORM_READ
                    | vk::AccessFlags::SHADER_READ,
            )?;
        }
        {
            let mut pass = recorder.begin_render_pass(
                targets.render_pass.handle(),
                framebuffer,
                targets.swapchain.extent(),
                &clear_values,
            )?;
            for item in draw_list.items() {
                let pipeline = self
                    .pipelines
                    .get(item.pipeline)
                    .ok_or(VulkanError::StaleHandle { kind: "pipeline" })?;
                let sets = item.resources.as_ref().map_or(&[][..], ResourceSet::handles);
                pass.bind_pipeline(pipeline, sets)?;

                let vertex_buffers = item
                    .vertex_buffers
                    .iter()
                    .map(|handle| self.resources.buffer(*handle))
                    .collect::<VulkanResult<Vec<&Buffer>>>()?;
                if !vertex_buffers.is_empty() {
                    pass.bind_vertex_buffers(&vertex_buffers)?;
                }
                match item.index_buffer {
                    Some(handle) => {
                        pass.bind_index_buffer(self.resources.buffer(handle)?)?;
                        pass.draw_indexed(item.count, item.instances)?;
                    }
                    None => pass.draw_vertices(item.count, item.instances)?,
                }
            }
        }
        recorder.end()
    }

    /// React to a new window size
    ///
    /// A zero-area size suspends rendering until a non-zero size arrives.
    pub fn resize(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        self.extent = extent;
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Window minimized, suspending frames");
            return Ok(());
        }
        self.recreate_targets()
    }

    fn recreate_targets(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.commands.retire_all();
        self.slots.reset();

        // The old swapchain is destroyed before its replacement is created
        self.targets = None;
        let extent = swapchain::surface_extent(&self.device, self.extent)?;
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has no area, suspending frames");
            return Ok(());
        }
        let targets = PresentTargets::new(
            &self.device,
            &self.command_pool,
            self.extent,
            self.config.present_mode,
            &self.subpasses,
        )?;

        for (_, pipeline) in &mut self.pipelines {
            if pipeline.needs_recreation(&targets.render_pass) {
                pipeline.recreate(&self.pipeline_cache, &targets.render_pass, targets.swapchain.extent())?;
                self.stats.pipeline_recreations += 1;
            }
        }

        self.stats.swapchain_recreations += 1;
        log::info!(
            "Recreated swapchain: {}x{}, {} images",
            targets.swapchain.extent().width,
            targets.swapchain.extent().height,
            targets.swapchain.image_count()
        );
        self.targets = Some(targets);
        Ok(())
    }

    /// Build a pipeline against the current render pass
    pub fn create_pipeline(&mut self, spec: PipelineSpecification, usage: PipelineUsage) -> VulkanResult<PipelineHandle> {
        let targets = self.targets()?;
        let pipeline = Pipeline::new(
            &self.device,
            &self.pipeline_cache,
            spec,
            usage,
            &targets.render_pass,
            targets.swapchain.extent(),
        )?;
        Ok(self.pipelines.insert(pipeline))
    }

    /// Destroy a pipeline once the GPU is idle
    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> VulkanResult<()> {
        if !self.pipelines.contains_key(handle) {
            return Err(VulkanError::StaleHandle { kind: "pipeline" });
        }
        self.device.wait_idle()?;
        self.commands.retire_all();
        self.pipelines.remove(handle);
        Ok(())
    }

    fn pipeline_mut(&mut self, handle: PipelineHandle) -> VulkanResult<&mut Pipeline> {
        self.pipelines
            .get_mut(handle)
            .ok_or(VulkanError::StaleHandle { kind: "pipeline" })
    }

    /// Pipeline behind `handle`
    pub fn pipeline(&self, handle: PipelineHandle) -> VulkanResult<&Pipeline> {
        self.pipelines
            .get(handle)
            .ok_or(VulkanError::StaleHandle { kind: "pipeline" })
    }

    /// Allocate a resource set from the pipeline's fixed pool
    pub fn allocate_resources(&mut self, handle: PipelineHandle) -> VulkanResult<ResourceSet> {
        self.pipeline_mut(handle)?.allocate_resources()
    }

    /// Return a resource set to its pipeline's pool once the GPU is idle
    pub fn deallocate_resources(&mut self, handle: PipelineHandle, set: &ResourceSet) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.commands.retire_all();
        self.pipeline_mut(handle)?.deallocate_resources(set)
    }

    /// Point a resource set at buffers and textures, in binding order
    pub fn update_resources(
        &self,
        handle: PipelineHandle,
        set: &ResourceSet,
        buffers: &[BufferHandle],
        textures: &[TextureHandle],
    ) -> VulkanResult<()> {
        let buffers = buffers
            .iter()
            .map(|buffer| self.resources.buffer(*buffer))
            .collect::<VulkanResult<Vec<_>>>()?;
        let images = textures
            .iter()
            .map(|texture| self.resources.texture(*texture)?.descriptor_info(&self.resources))
            .collect::<VulkanResult<Vec<_>>>()?;
        self.pipeline(handle)?.update(set, &buffers, &images)
    }

    /// Store push-constant data pushed whenever the pipeline is bound
    pub fn submit_constant_data(&mut self, handle: PipelineHandle, block: usize, data: &[u8]) -> VulkanResult<()> {
        self.pipeline_mut(handle)?.submit_constant_data(block, data)
    }

    /// Create a host-visible buffer, e.g. for per-frame uniforms
    pub fn create_buffer(&mut self, kind: BufferKind, size: vk::DeviceSize) -> VulkanResult<BufferHandle> {
        let buffer = Buffer::new(&self.device, kind, size, MemoryClass::UPLOAD)?;
        Ok(self.resources.insert_buffer(buffer))
    }

    /// Upload vertices into device-local memory
    pub fn create_vertex_buffer(&mut self, bytes: &[u8], stride: usize, count: u32) -> VulkanResult<BufferHandle> {
        let buffer = Buffer::vertex_from_bytes(&self.device, &self.command_pool, bytes, stride, count)?;
        Ok(self.resources.insert_buffer(buffer))
    }

    /// Upload indices into device-local memory
    pub fn create_index_buffer(&mut self, bytes: &[u8], width: IndexWidth, count: u32) -> VulkanResult<BufferHandle> {
        let buffer = Buffer::index_from_bytes(&self.device, &self.command_pool, bytes, width, count)?;
        Ok(self.resources.insert_buffer(buffer))
    }

    /// Upload an RGBA8 texture, optionally with a generated mip chain
    pub fn create_texture(
        &mut self,
        pixels: &[u8],
        extent: vk::Extent2D,
        mip_levels: MipLevels,
        sampler: SamplerSettings,
    ) -> VulkanResult<TextureHandle> {
        let levels = match mip_levels {
            MipLevels::Single => 1,
            MipLevels::Full => full_mip_levels(extent),
        };
        Texture::from_rgba8(
            &self.device,
            &self.command_pool,
            &mut self.resources,
            pixels,
            extent,
            levels,
            sampler,
        )
    }

    /// Write into a host-visible buffer
    pub fn write_buffer(&self, handle: BufferHandle, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        self.resources.buffer(handle)?.set_data(offset, bytes)
    }

    /// Destroy a buffer or texture once the GPU is idle
    pub fn destroy_resource(&mut self, handle: impl Into<ResourceHandle>) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.commands.retire_all();
        self.resources.destroy(handle.into())
    }

    /// The logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Configuration the renderer was built with
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Slot the next frame uses
    pub fn current_frame(&self) -> usize {
        self.slots.current()
    }

    /// Current swapchain extent, or the requested one while suspended
    pub fn extent(&self) -> vk::Extent2D {
        self.targets
            .as_ref()
            .map_or(self.extent, |targets| targets.swapchain.extent())
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.targets
            .as_ref()
            .map_or(0, |targets| targets.swapchain.image_count())
    }

    /// Presentation mode in use
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.targets.as_ref().map(|targets| targets.swapchain.present_mode())
    }

    /// Frame counters
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Wait for the GPU
    pub fn wait_idle(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.commands.retire_all();
        Ok(())
    }

    /// Wait for the GPU, persist the pipeline cache and release everything
    pub fn shutdown(mut self) -> VulkanResult<()> {
        self.wait_idle()?;
        if let Some(path) = &self.config.pipeline_cache_path {
            self.pipeline_cache.save(path)?;
        }
        self.shut_down = true;
        log::info!(
            "Renderer shut down after {} frames ({} swapchain recreations)",
            self.stats.frames_presented,
            self.stats.swapchain_recreations
        );
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(e) = self.wait_idle() {
                log::error!("Failed to wait for the GPU while dropping the renderer: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::{DriverCall, HeadlessInstance};
    use crate::backend::rendering::reflection::ShaderReflection;
    use crate::backend::rendering::shader::{test_spirv, ShaderCode};

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    fn renderer(instance: &HeadlessInstance) -> Renderer {
        Renderer::new(
            instance,
            BackendConfig::new("renderer test"),
            EXTENT,
            &[SubpassTag::Swapchain, SubpassTag::Depth],
        )
        .unwrap()
    }

    fn triangle_spec() -> PipelineSpecification {
        PipelineSpecification::new(vec![
            ShaderCode::from_bytes(vk::ShaderStageFlags::VERTEX, &test_spirv(), ShaderReflection::new()).unwrap(),
            ShaderCode::from_bytes(vk::ShaderStageFlags::FRAGMENT, &test_spirv(), ShaderReflection::new()).unwrap(),
        ])
    }

    #[test]
    fn test_draw_list_resolves_handles() {
        let instance = HeadlessInstance::default();
        let mut renderer = renderer(&instance);
        let pipeline = renderer.create_pipeline(triangle_spec(), PipelineUsage::Graphics).unwrap();

        let list: DrawList = [DrawItem::vertices(pipeline, 3)].into_iter().collect();
        assert!(matches!(renderer.draw_frame(&list).unwrap(), FrameOutcome::Presented { .. }));
        assert!(instance.calls().contains(&DriverCall::Draw { vertex_count: 3 }));

        renderer.destroy_pipeline(pipeline).unwrap();
        assert!(matches!(
            renderer.draw_frame(&list),
            Err(VulkanError::StaleHandle { kind: "pipeline" })
        ));
        assert_eq!(renderer.current_frame(), 1, "rejected list does not consume a slot");
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_zero_extent_skips_until_resized() {
        let instance = HeadlessInstance::default();
        let mut renderer = renderer(&instance);
        renderer.resize(vk::Extent2D { width: 0, height: 0 }).unwrap();
        instance.clear_calls();

        assert_eq!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Skipped);
        assert!(instance.calls().is_empty());

        instance.set_surface_extent(Some(vk::Extent2D { width: 1024, height: 768 }));
        renderer.resize(vk::Extent2D { width: 1024, height: 768 }).unwrap();
        assert!(matches!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(renderer.extent(), vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(renderer.stats().frames_skipped, 1);
    }

    fn compute_spec() -> PipelineSpecification {
        PipelineSpecification::new(vec![ShaderCode::from_bytes(
            vk::ShaderStageFlags::COMPUTE,
            &test_spirv(),
            ShaderReflection::new(),
        )
        .unwrap()])
    }

    fn position(calls: &[DriverCall], found: impl Fn(&DriverCall) -> bool) -> usize {
        calls.iter().position(found).unwrap()
    }

    #[test]
    fn test_compute_pipeline_rejected_in_draw_list() {
        let instance = HeadlessInstance::default();
        let mut renderer = renderer(&instance);
        let pipeline = renderer.create_pipeline(compute_spec(), PipelineUsage::Compute).unwrap();
        let list: DrawList = [DrawItem::vertices(pipeline, 3)].into_iter().collect();
        assert!(matches!(renderer.draw_frame(&list), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_dispatch_recorded_before_render_pass() {
        let instance = HeadlessInstance::default();
        let mut renderer = renderer(&instance);
        let compute = renderer.create_pipeline(compute_spec(), PipelineUsage::Compute).unwrap();
        let graphics = renderer.create_pipeline(triangle_spec(), PipelineUsage::Graphics).unwrap();

        let mut list = DrawList::new();
        list.push_dispatch(DispatchItem::new(compute, [4, 2, 1]));
        list.push(DrawItem::vertices(graphics, 3));
        assert_eq!(list.len(), 2);
        instance.clear_calls();
        assert!(matches!(renderer.draw_frame(&list).unwrap(), FrameOutcome::Presented { .. }));

        let calls = instance.calls();
        let dispatch = position(&calls, |call| *call == DriverCall::Dispatch { groups: [4, 2, 1] });
        let barrier = position(&calls, |call| matches!(call, DriverCall::MemoryBarrier { .. }));
        let pass = position(&calls, |call| matches!(call, DriverCall::BeginRenderPass { .. }));
        let draw = position(&calls, |call| *call == DriverCall::Draw { vertex_count: 3 });
        assert!(dispatch < barrier && barrier < pass && pass < draw, "{calls:?}");
        match &calls[barrier] {
            DriverCall::MemoryBarrier { dst_access } => {
                assert!(dst_access.contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::SHADER_READ))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_graphics_pipeline_rejected_in_dispatch() {
        let instance = HeadlessInstance::default();
        let mut renderer = renderer(&instance);
        let graphics = renderer.create_pipeline(triangle_spec(), PipelineUsage::Graphics).unwrap();
        let mut list = DrawList::new();
        list.push_dispatch(DispatchItem::new(graphics, [1, 1, 1]));
        assert!(matches!(renderer.draw_frame(&list), Err(VulkanError::InvalidOperation { .. })));
        assert_eq!(renderer.current_frame(), 0);
    }

    #[test]
    fn test_overlay_targets_start_in_present_layout() {
        let instance = HeadlessInstance::default();
        let mut renderer = Renderer::new(&instance, BackendConfig::new("overlay test"), EXTENT, &[SubpassTag::Overlay]).unwrap();
        let transitions = instance
            .calls()
            .into_iter()
            .filter(|call| {
                *call
                    == DriverCall::PipelineBarrier {
                        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                    }
            })
            .count();
        assert_eq!(transitions, 1);
        assert!(matches!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Presented { .. }));

        // Recreated images need the transition again
        renderer.resize(vk::Extent2D { width: 640, height: 480 }).unwrap();
        let transitions = instance
            .calls()
            .into_iter()
            .filter(|call| matches!(call, DriverCall::PipelineBarrier { new_layout } if *new_layout == vk::ImageLayout::PRESENT_SRC_KHR))
            .count();
        assert_eq!(transitions, 2);
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_plain_targets_skip_present_transition() {
        let instance = HeadlessInstance::default();
        let _renderer = renderer(&instance);
        assert!(!instance
            .calls()
            .iter()
            .any(|call| matches!(call, DriverCall::PipelineBarrier { .. })));
    }

    #[test]
    fn test_shutdown_saves_pipeline_cache() {
        let instance = HeadlessInstance::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("pipelines.bin");
        let config = BackendConfig::new("cache test").with_pipeline_cache(&path);

        let mut renderer = Renderer::new(&instance, config, EXTENT, &[SubpassTag::Swapchain]).unwrap();
        renderer.create_pipeline(triangle_spec(), PipelineUsage::Graphics).unwrap();
        renderer.shutdown().unwrap();

        assert!(!std::fs::read(&path).unwrap().is_empty());
        assert!(instance.live_objects().is_empty(), "{:?}", instance.live_objects());
    }
}
