//! Command buffer management
//!
//! [`CommandPool`] owns the pool for the graphics family and runs one-time
//! transfer submissions. [`CommandBufferManager`] keeps one primary buffer per
//! frame slot and tracks its recording state, so the slot's fence is the only
//! thing guarding reuse. [`CommandRecorder`]
//! validates every transition; [`ActiveRenderPass`] ends its pass on drop.

use ash::vk;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use super::pipeline::{Pipeline, PipelineUsage};
use crate::backend::driver::{DeviceDriver, FenceWait, SubmitDesc};
use crate::backend::initialization::device::Device;
use crate::backend::resources::buffer::Buffer;
use crate::backend::resources::image::Image;
use crate::backend::{VulkanError, VulkanResult};

/// Command buffer level
///
/// Only primary buffers are recorded; secondary buffers are reserved for
/// multi-threaded recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferLevel {
    /// Submitted directly to a queue
    Primary,
    /// Executed from a primary buffer
    Secondary,
}

/// Recording state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Freshly allocated or reset
    Initial,
    /// Between begin and end, outside a render pass
    Recording,
    /// Inside a render pass
    InRenderPass,
    /// Recorded and ready to submit
    Executable,
    /// Submitted and possibly executing
    Pending,
}

/// Resettable command pool on the graphics family
pub struct CommandPool {
    driver: Arc<dyn DeviceDriver>,
    pool: vk::CommandPool,
    queue: vk::Queue,
    fence_timeout: Duration,
}

impl CommandPool {
    /// Create a pool for the device's graphics queue
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let driver = Arc::clone(device.driver());
        let pool = driver.create_command_pool(device.queue_families().graphics)?;
        Ok(Self {
            driver,
            pool,
            queue: device.graphics_queue(),
            fence_timeout: device.fence_timeout(),
        })
    }

    /// Allocate command buffers
    pub fn allocate(&self, level: CommandBufferLevel, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        match level {
            CommandBufferLevel::Primary => self.driver.allocate_command_buffers(self.pool, count),
            CommandBufferLevel::Secondary => Err(VulkanError::invalid("secondary command buffers are not supported")),
        }
    }

    /// Return command buffers to the pool
    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            self.driver.free_command_buffers(self.pool, buffers);
        }
    }

    /// Record with `record`, submit, and wait for completion
    pub fn one_time_submit<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder<'_>) -> VulkanResult<()>,
    {
        let buffers = self.allocate(CommandBufferLevel::Primary, 1)?;
        let buffer = buffers[0];
        let result = self.record_and_wait(buffer, record);
        self.free(&buffers);
        result
    }

    fn record_and_wait<F>(&self, buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder<'_>) -> VulkanResult<()>,
    {
        let mut state = CommandBufferState::Initial;
        let mut recorder = CommandRecorder::begin(self.driver.as_ref(), buffer, &mut state, true)?;
        record(&mut recorder)?;
        recorder.end()?;

        let fence = self.driver.create_fence(false)?;
        let submitted = self
            .driver
            .queue_submit(
                self.queue,
                &SubmitDesc {
                    wait_semaphores: &[],
                    wait_stages: &[],
                    command_buffers: &[buffer],
                    signal_semaphores: &[],
                    fence,
                },
            )
            .and_then(|()| self.driver.wait_for_fence(fence, self.fence_timeout));
        self.driver.destroy_fence(fence);

        match submitted? {
            FenceWait::Signaled => Ok(()),
            FenceWait::TimedOut => Err(VulkanError::Timeout {
                waited: self.fence_timeout,
            }),
        }
    }

    /// Pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.driver.destroy_command_pool(self.pool);
    }
}

/// Records into one command buffer, rejecting out-of-order calls
pub struct CommandRecorder<'a> {
    driver: &'a dyn DeviceDriver,
    buffer: vk::CommandBuffer,
    state: &'a mut CommandBufferState,
    bound: Option<PipelineUsage>,
    extent: vk::Extent2D,
}

impl<'a> CommandRecorder<'a> {
    /// Begin recording into a buffer in the initial state
    pub fn begin(
        driver: &'a dyn DeviceDriver,
        buffer: vk::CommandBuffer,
        state: &'a mut CommandBufferState,
        one_time: bool,
    ) -> VulkanResult<Self> {
        if *state != CommandBufferState::Initial {
            return Err(VulkanError::invalid(format!("cannot begin recording from {state:?}")));
        }
        driver.begin_command_buffer(buffer, one_time)?;
        *state = CommandBufferState::Recording;
        Ok(Self {
            driver,
            buffer,
            state,
            bound: None,
            extent: vk::Extent2D::default(),
        })
    }

    fn expect(&self, expected: CommandBufferState, action: &str) -> VulkanResult<()> {
        if *self.state == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!("{action} while {:?}", self.state)))
        }
    }

    /// Finish recording
    pub fn end(self) -> VulkanResult<vk::CommandBuffer> {
        self.expect(CommandBufferState::Recording, "end")?;
        self.driver.end_command_buffer(self.buffer)?;
        *self.state = CommandBufferState::Executable;
        Ok(self.buffer)
    }

    /// Begin a render pass covering `extent`; viewport and scissor follow it
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_, 'a>> {
        self.expect(CommandBufferState::Recording, "begin render pass")?;
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        self.driver
            .cmd_begin_render_pass(self.buffer, render_pass, framebuffer, area, clear_values);
        *self.state = CommandBufferState::InRenderPass;
        self.extent = extent;

        self.driver.cmd_set_viewport(
            self.buffer,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.driver.cmd_set_scissor(self.buffer, area);

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Bind a pipeline, its resource sets, and push its stored constants
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline, resource_sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        match pipeline.usage() {
            PipelineUsage::Graphics => self.expect(CommandBufferState::InRenderPass, "bind graphics pipeline")?,
            PipelineUsage::Compute => self.expect(CommandBufferState::Recording, "bind compute pipeline")?,
            PipelineUsage::RayTracing => return Err(VulkanError::UnsupportedPipelineUsage),
        }
        let bind_point = pipeline.bind_point()?;
        self.driver.cmd_bind_pipeline(self.buffer, bind_point, pipeline.handle());
        if !resource_sets.is_empty() {
            self.driver
                .cmd_bind_descriptor_sets(self.buffer, bind_point, pipeline.layout(), 0, resource_sets);
        }
        for block in pipeline.constant_blocks().iter().filter(|block| !block.data.is_empty()) {
            self.driver
                .cmd_push_constants(self.buffer, pipeline.layout(), block.stages, block.offset, &block.data);
        }
        self.bound = Some(pipeline.usage());
        Ok(())
    }

    /// Bind vertex buffers starting at binding 0
    pub fn bind_vertex_buffers(&mut self, buffers: &[&Buffer]) -> VulkanResult<()> {
        self.expect(CommandBufferState::InRenderPass, "bind vertex buffers")?;
        let handles: Vec<vk::Buffer> = buffers.iter().map(|buffer| buffer.handle()).collect();
        let offsets = vec![0; handles.len()];
        self.driver.cmd_bind_vertex_buffers(self.buffer, 0, &handles, &offsets);
        Ok(())
    }

    /// Bind an index buffer created with an index width
    pub fn bind_index_buffer(&mut self, buffer: &Buffer) -> VulkanResult<()> {
        self.expect(CommandBufferState::InRenderPass, "bind index buffer")?;
        let width = buffer
            .index_width()
            .ok_or_else(|| VulkanError::invalid(format!("{:?} buffer has no index width", buffer.kind())))?;
        self.driver
            .cmd_bind_index_buffer(self.buffer, buffer.handle(), 0, width.to_vk());
        Ok(())
    }

    fn expect_graphics(&self, action: &str) -> VulkanResult<()> {
        self.expect(CommandBufferState::InRenderPass, action)?;
        match self.bound {
            Some(PipelineUsage::Graphics) => Ok(()),
            _ => Err(VulkanError::invalid(format!("{action} without a graphics pipeline bound"))),
        }
    }

    /// Indexed draw
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> VulkanResult<()> {
        self.expect_graphics("draw indexed")?;
        self.driver
            .cmd_draw_indexed(self.buffer, index_count, instance_count, 0, 0, 0);
        Ok(())
    }

    /// Non-indexed draw
    pub fn draw_vertices(&mut self, vertex_count: u32, instance_count: u32) -> VulkanResult<()> {
        self.expect_graphics("draw")?;
        self.driver.cmd_draw(self.buffer, vertex_count, instance_count, 0, 0);
        Ok(())
    }

    /// Compute dispatch, outside any render pass
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> VulkanResult<()> {
        self.expect(CommandBufferState::Recording, "dispatch")?;
        if self.bound != Some(PipelineUsage::Compute) {
            return Err(VulkanError::invalid("dispatch without a compute pipeline bound"));
        }
        self.driver.cmd_dispatch(self.buffer, x, y, z);
        Ok(())
    }

    /// Buffer to buffer copy
    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) -> VulkanResult<()> {
        self.expect(CommandBufferState::Recording, "copy buffer")?;
        self.driver
            .cmd_copy_buffer(self.buffer, src.handle(), dst.handle(), regions);
        Ok(())
    }

    /// Copy buffer contents into an image in TRANSFER_DST layout
    pub fn copy_buffer_to_image(&mut self, src: &Buffer, dst: &Image, regions: &[vk::BufferImageCopy]) -> VulkanResult<()> {
        self.expect(CommandBufferState::Recording, "copy buffer to image")?;
        self.driver.cmd_copy_buffer_to_image(
            self.buffer,
            src.handle(),
            dst.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
        Ok(())
    }

    /// Blit between mip levels of `image`, source in TRANSFER_SRC and destination in TRANSFER_DST
    pub fn blit_image(&mut self, image: &Image, regions: &[vk::ImageBlit]) -> VulkanResult<()> {
        self.expect(CommandBufferState::Recording, "blit image")?;
        self.driver.cmd_blit_image(
            self.buffer,
            image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
            vk::Filter::LINEAR,
        );
        Ok(())
    }

    /// Make writes from `src_stage` visible to `dst_stage`
    pub fn memory_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> VulkanResult<()> {
        self.expect(CommandBufferState::Recording, "memory barrier")?;
        self.driver
            .cmd_memory_barrier(self.buffer, src_stage, dst_stage, src_access, dst_access);
        Ok(())
    }

    /// Image layout barrier
    pub fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier],
    ) -> VulkanResult<()> {
        self.expect(CommandBufferState::Recording, "pipeline barrier")?;
        self.driver
            .cmd_pipeline_barrier(self.buffer, src_stage, dst_stage, barriers);
        Ok(())
    }

    /// Buffer being recorded
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Current recording state
    pub fn state(&self) -> CommandBufferState {
        *self.state
    }
}

/// Render pass scope; ends the pass when dropped
pub struct ActiveRenderPass<'r, 'a> {
    recorder: &'r mut CommandRecorder<'a>,
}

impl ActiveRenderPass<'_, '_> {
    /// Extent the pass renders to
    pub fn extent(&self) -> vk::Extent2D {
        self.recorder.extent
    }
}

impl<'a> Deref for ActiveRenderPass<'_, 'a> {
    type Target = CommandRecorder<'a>;

    fn deref(&self) -> &Self::Target {
        &*self.recorder
    }
}

impl DerefMut for ActiveRenderPass<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.recorder
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        self.recorder.driver.cmd_end_render_pass(self.recorder.buffer);
        *self.recorder.state = CommandBufferState::Recording;
        self.recorder.bound = None;
    }
}

/// One primary command buffer per frame slot
pub struct CommandBufferManager {
    driver: Arc<dyn DeviceDriver>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    states: Vec<CommandBufferState>,
    fences: Vec<Option<vk::Fence>>,
}

impl CommandBufferManager {
    /// Allocate `count` primary buffers from `pool`
    pub fn new(pool: &CommandPool, count: usize) -> VulkanResult<Self> {
        let buffers = pool.allocate(CommandBufferLevel::Primary, count as u32)?;
        log::debug!("Allocated {count} frame command buffers");
        Ok(Self {
            driver: Arc::clone(&pool.driver),
            pool: pool.handle(),
            states: vec![CommandBufferState::Initial; buffers.len()],
            fences: vec![None; buffers.len()],
            buffers,
        })
    }

    fn index(&self, slot: usize) -> VulkanResult<usize> {
        if slot < self.buffers.len() {
            Ok(slot)
        } else {
            Err(VulkanError::invalid(format!(
                "frame slot {slot} has no command buffer ({} allocated)",
                self.buffers.len()
            )))
        }
    }

    /// Reset the buffer of `slot` and begin recording into it
    ///
    /// The buffer must not be pending; call [`Self::retire`] once the fence
    /// of its last submission has signaled.
    pub fn begin(&mut self, slot: usize) -> VulkanResult<CommandRecorder<'_>> {
        let index = self.index(slot)?;
        match self.states[index] {
            CommandBufferState::Pending => {
                return Err(VulkanError::invalid(format!("command buffer {slot} is still pending")))
            }
            CommandBufferState::Recording | CommandBufferState::InRenderPass => {
                return Err(VulkanError::invalid(format!("command buffer {slot} is already recording")))
            }
            CommandBufferState::Initial | CommandBufferState::Executable => {}
        }
        self.driver.reset_command_buffer(self.buffers[index])?;
        self.states[index] = CommandBufferState::Initial;
        CommandRecorder::begin(self.driver.as_ref(), self.buffers[index], &mut self.states[index], false)
    }

    /// Mark the recorded buffer of `slot` as submitted under `fence`
    pub fn mark_submitted(&mut self, slot: usize, fence: vk::Fence) -> VulkanResult<()> {
        let index = self.index(slot)?;
        if self.states[index] != CommandBufferState::Executable {
            return Err(VulkanError::invalid(format!(
                "submit of command buffer {slot} while {:?}",
                self.states[index]
            )));
        }
        self.states[index] = CommandBufferState::Pending;
        self.fences[index] = Some(fence);
        Ok(())
    }

    /// Fence of the last submission of `slot`, if any
    pub fn last_fence(&self, slot: usize) -> Option<vk::Fence> {
        self.fences.get(slot).copied().flatten()
    }

    /// The last submission of `slot` finished executing
    pub fn retire(&mut self, slot: usize) -> VulkanResult<()> {
        let index = self.index(slot)?;
        if self.states[index] == CommandBufferState::Pending {
            self.states[index] = CommandBufferState::Executable;
        }
        self.fences[index] = None;
        Ok(())
    }

    /// Every submission finished, as after a device idle wait
    pub fn retire_all(&mut self) {
        for (state, fence) in self.states.iter_mut().zip(self.fences.iter_mut()) {
            if *state == CommandBufferState::Pending {
                *state = CommandBufferState::Executable;
            }
            *fence = None;
        }
    }

    /// Buffer handle for `slot`
    pub fn buffer(&self, slot: usize) -> VulkanResult<vk::CommandBuffer> {
        Ok(self.buffers[self.index(slot)?])
    }

    /// Recording state for `slot`
    pub fn state(&self, slot: usize) -> VulkanResult<CommandBufferState> {
        Ok(self.states[self.index(slot)?])
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are allocated
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for CommandBufferManager {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            self.driver.free_command_buffers(self.pool, &self.buffers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::DriverCall;
    use crate::backend::initialization::device::tests::headless_device;

    #[test]
    fn test_recorder_rejects_out_of_order_calls() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut manager = CommandBufferManager::new(&pool, 2).unwrap();

        let mut recorder = manager.begin(0).unwrap();
        assert_eq!(recorder.state(), CommandBufferState::Recording);
        assert!(recorder.draw_vertices(3, 1).is_err());
        assert!(recorder.dispatch(1, 1, 1).is_err());
        {
            let mut pass = recorder
                .begin_render_pass(
                    vk::RenderPass::null(),
                    vk::Framebuffer::null(),
                    vk::Extent2D { width: 640, height: 480 },
                    &[],
                )
                .unwrap();
            assert_eq!(pass.state(), CommandBufferState::InRenderPass);
            assert_eq!(pass.extent().width, 640);
            assert!(pass.draw_vertices(3, 1).is_err(), "no pipeline bound");
        }
        assert_eq!(recorder.state(), CommandBufferState::Recording);
        recorder.end().unwrap();
        assert_eq!(manager.state(0).unwrap(), CommandBufferState::Executable);

        let calls = instance.calls();
        assert!(calls.contains(&DriverCall::SetViewport { width: 640.0, height: 480.0 }));
        assert!(calls.contains(&DriverCall::SetScissor {
            extent: vk::Extent2D { width: 640, height: 480 }
        }));
        assert_eq!(calls.iter().filter(|c| **c == DriverCall::EndRenderPass).count(), 1);
    }

    #[test]
    fn test_memory_barrier_outside_render_pass_only() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut manager = CommandBufferManager::new(&pool, 1).unwrap();
        let barrier = |recorder: &mut CommandRecorder<'_>| {
            recorder.memory_barrier(
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            )
        };

        let mut recorder = manager.begin(0).unwrap();
        barrier(&mut recorder).unwrap();
        {
            let mut pass = recorder
                .begin_render_pass(
                    vk::RenderPass::null(),
                    vk::Framebuffer::null(),
                    vk::Extent2D { width: 4, height: 4 },
                    &[],
                )
                .unwrap();
            assert!(barrier(&mut pass).is_err());
        }
        recorder.end().unwrap();
        assert_eq!(
            instance
                .calls()
                .iter()
                .filter(|call| matches!(call, DriverCall::MemoryBarrier { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_pending_buffer_cannot_be_rerecorded() {
        let (_instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let mut manager = CommandBufferManager::new(&pool, 1).unwrap();

        manager.begin(0).unwrap().end().unwrap();
        let fence = vk::Fence::null();
        manager.mark_submitted(0, fence).unwrap();
        assert_eq!(manager.last_fence(0), Some(fence));
        assert!(manager.begin(0).is_err());
        assert!(manager.mark_submitted(0, fence).is_err());

        manager.retire(0).unwrap();
        assert_eq!(manager.last_fence(0), None);
        assert!(manager.begin(0).is_ok());
        assert!(manager.begin(5).is_err());
    }

    #[test]
    fn test_one_time_submit_waits_and_frees() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        pool.one_time_submit(|_| Ok(())).unwrap();

        let calls = instance.calls();
        let submit = calls.iter().position(|c| matches!(c, DriverCall::QueueSubmit { .. })).unwrap();
        let wait = calls.iter().position(|c| matches!(c, DriverCall::WaitForFence { .. })).unwrap();
        assert!(submit < wait);
        assert_eq!(instance.live_objects(), vec!["command pool"]);
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_one_time_submit_times_out_on_hung_fence() {
        use crate::backend::driver::headless::Fault;

        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        instance.inject(Fault::HungSubmit(1));
        let result = pool.one_time_submit(|_| Ok(()));
        assert!(matches!(result, Err(VulkanError::Timeout { .. })));
    }

    #[test]
    fn test_secondary_buffers_are_not_supported() {
        let (_instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        assert!(pool.allocate(CommandBufferLevel::Secondary, 1).is_err());
    }
}
