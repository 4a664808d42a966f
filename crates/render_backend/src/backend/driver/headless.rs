//! Headless simulated device
//!
//! Implements the capability table without a GPU. Work completes when the
//! CPU waits for it, so a fence stays pending until `wait_for_fence` (or an
//! idle wait) observes it. Every protocol-relevant call is appended to an
//! ordered log, and misuse that a validation layer would report (resetting
//! an in-flight fence or command buffer, waiting on an unsignaled semaphore)
//! is collected as a violation instead of failing the call.
//!
//! Faults can be injected to exercise recovery paths: an out-of-date
//! swapchain on the n-th acquire or present, a suboptimal present, or a
//! submission whose fence never signals.

use ash::vk;
use ash::vk::Handle;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    AcquireOutcome, AdapterInfo, AdapterLimits, DescriptorWrite, DeviceDriver, DeviceRequest, FenceWait,
    GraphicsPipelineDesc, ImageDesc, ImageViewDesc, InstanceDriver, PresentOutcome, QueueFamilyIndices,
    QueueFamilyInfo, RenderPassDesc, SamplerDesc, ShaderStageDesc, SubmitDesc, SwapchainDesc,
};
use crate::backend::{VulkanError, VulkanResult};

/// Surface behaviour of the simulated window
#[derive(Debug, Clone)]
pub struct SurfaceProfile {
    /// Minimum swapchain image count
    pub min_image_count: u32,
    /// Maximum swapchain image count, 0 for unbounded
    pub max_image_count: u32,
    /// Window size; `None` reports the "defined by swapchain" sentinel
    pub current_extent: Option<vk::Extent2D>,
    /// Smallest allowed extent
    pub min_extent: vk::Extent2D,
    /// Largest allowed extent
    pub max_extent: vk::Extent2D,
    /// Supported formats in preference order of the platform
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Supported alpha compositing modes
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl Default for SurfaceProfile {
    fn default() -> Self {
        Self {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: Some(vk::Extent2D { width: 800, height: 600 }),
            min_extent: vk::Extent2D { width: 1, height: 1 },
            max_extent: vk::Extent2D { width: 4096, height: 4096 },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT,
        }
    }
}

/// Everything the simulated system reports about itself
#[derive(Debug, Clone)]
pub struct HeadlessProfile {
    /// Adapters in enumeration order
    pub adapters: Vec<AdapterInfo>,
    /// Surface capabilities
    pub surface: SurfaceProfile,
    /// Formats usable as optimal-tiling depth attachments
    pub depth_formats: Vec<vk::Format>,
}

impl Default for HeadlessProfile {
    fn default() -> Self {
        Self {
            adapters: vec![Self::adapter("Headless Discrete GPU", vk::PhysicalDeviceType::DISCRETE_GPU)],
            surface: SurfaceProfile::default(),
            depth_formats: vec![vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT],
        }
    }
}

impl HeadlessProfile {
    /// A capable adapter: one graphics+present family, anisotropy, 8x MSAA
    pub fn adapter(name: &str, device_type: vk::PhysicalDeviceType) -> AdapterInfo {
        let samples = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            sample_rate_shading: vk::TRUE,
            fill_mode_non_solid: vk::TRUE,
            tessellation_shader: vk::TRUE,
            ..Default::default()
        };

        AdapterInfo {
            handle: vk::PhysicalDevice::null(),
            name: name.to_string(),
            device_type,
            features,
            limits: AdapterLimits {
                framebuffer_color_sample_counts: samples,
                framebuffer_depth_sample_counts: samples,
                max_sampler_anisotropy: 16.0,
                max_push_constants_size: 128,
            },
            queue_families: vec![QueueFamilyInfo {
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                present_support: true,
            }],
            extensions: vec!["VK_KHR_swapchain".to_string()],
        }
    }

    /// Replace the adapter list
    pub fn with_adapters(mut self, adapters: Vec<AdapterInfo>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Replace the supported present modes
    pub fn with_present_modes(mut self, modes: Vec<vk::PresentModeKHR>) -> Self {
        self.surface.present_modes = modes;
        self
    }

    /// Replace the swapchain image count bounds
    pub fn with_image_count(mut self, min: u32, max: u32) -> Self {
        self.surface.min_image_count = min;
        self.surface.max_image_count = max;
        self
    }

    /// Replace the supported depth formats
    pub fn with_depth_formats(mut self, formats: Vec<vk::Format>) -> Self {
        self.depth_formats = formats;
        self
    }

    /// Replace the window size
    pub fn with_surface_extent(mut self, extent: Option<vk::Extent2D>) -> Self {
        self.surface.current_extent = extent;
        self
    }
}

/// Injectable driver misbehaviour; counts are 1-based per call kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The n-th acquire reports the swapchain out of date
    OutOfDateOnAcquire(u64),
    /// The n-th present reports the swapchain out of date
    OutOfDateOnPresent(u64),
    /// The n-th present reports a suboptimal swapchain
    SuboptimalOnPresent(u64),
    /// The fence of the n-th submission never signals
    HungSubmit(u64),
}

/// Protocol-relevant driver calls, in the order they were made
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// Swapchain created
    CreateSwapchain {
        /// Images requested
        image_count: u32,
        /// Image extent
        extent: vk::Extent2D,
        /// Image format
        format: vk::Format,
        /// Presentation mode
        present_mode: vk::PresentModeKHR,
    },
    /// Swapchain destroyed
    DestroySwapchain,
    /// Render pass created
    CreateRenderPass {
        /// Attachment count
        attachments: usize,
    },
    /// Framebuffer created
    CreateFramebuffer {
        /// Attachment count
        attachments: usize,
    },
    /// Graphics pipeline created
    CreateGraphicsPipeline,
    /// Compute pipeline created
    CreateComputePipeline,
    /// CPU waited on a fence
    WaitForFence {
        /// Fence waited on
        fence: vk::Fence,
    },
    /// Fence reset
    ResetFence {
        /// Fence reset
        fence: vk::Fence,
    },
    /// Image acquisition
    AcquireNextImage {
        /// Semaphore to signal
        semaphore: vk::Semaphore,
        /// What the swapchain answered
        outcome: AcquireOutcome,
    },
    /// Command buffer reset
    ResetCommandBuffer {
        /// Buffer reset
        buffer: vk::CommandBuffer,
    },
    /// Recording started
    BeginCommandBuffer {
        /// Buffer recorded
        buffer: vk::CommandBuffer,
    },
    /// Recording finished
    EndCommandBuffer {
        /// Buffer recorded
        buffer: vk::CommandBuffer,
    },
    /// Render pass begun
    BeginRenderPass {
        /// Target framebuffer
        framebuffer: vk::Framebuffer,
    },
    /// Render pass ended
    EndRenderPass,
    /// Dynamic viewport set
    SetViewport {
        /// Viewport width
        width: f32,
        /// Viewport height
        height: f32,
    },
    /// Dynamic scissor set
    SetScissor {
        /// Scissor extent
        extent: vk::Extent2D,
    },
    /// Pipeline bound
    BindPipeline {
        /// Pipeline bound
        pipeline: vk::Pipeline,
    },
    /// Descriptor sets bound
    BindDescriptorSets {
        /// Number of sets
        count: usize,
    },
    /// Push constants updated
    PushConstants {
        /// Byte offset
        offset: u32,
        /// Bytes pushed
        size: usize,
    },
    /// Vertex buffers bound
    BindVertexBuffers {
        /// Number of buffers
        count: usize,
    },
    /// Index buffer bound
    BindIndexBuffer {
        /// Index width
        index_type: vk::IndexType,
    },
    /// Non-indexed draw
    Draw {
        /// Vertices drawn
        vertex_count: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices drawn
        index_count: u32,
    },
    /// Compute dispatch
    Dispatch {
        /// Workgroup counts
        groups: [u32; 3],
    },
    /// Buffer copy
    CopyBuffer,
    /// Buffer to image copy
    CopyBufferToImage,
    /// Layout barrier
    PipelineBarrier {
        /// New layout of the first barrier
        new_layout: vk::ImageLayout,
    },
    /// Global memory barrier
    MemoryBarrier {
        /// Accesses made visible
        dst_access: vk::AccessFlags,
    },
    /// Image blit
    BlitImage {
        /// Source mip level of the first region
        src_level: u32,
        /// Destination mip level of the first region
        dst_level: u32,
    },
    /// Queue submission
    QueueSubmit {
        /// Waited semaphores
        wait: Vec<vk::Semaphore>,
        /// Signaled semaphores
        signal: Vec<vk::Semaphore>,
        /// Submitted buffers
        command_buffers: Vec<vk::CommandBuffer>,
        /// Completion fence
        fence: vk::Fence,
    },
    /// Presentation
    QueuePresent {
        /// Presented image
        image_index: u32,
        /// Waited semaphores
        wait: Vec<vk::Semaphore>,
        /// What the swapchain answered
        outcome: PresentOutcome,
    },
    /// Queue idle wait
    QueueWaitIdle,
    /// Device idle wait
    DeviceWaitIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
    Hung,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug)]
struct CommandBufferState {
    pool: u64,
    state: RecordState,
    fence: Option<u64>,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    next: u32,
    out_of_date: bool,
}

#[derive(Debug)]
struct MemoryState {
    bytes: Vec<u8>,
    host_visible: bool,
}

#[derive(Debug, Default)]
struct Counters {
    acquires: u64,
    presents: u64,
    submits: u64,
}

#[derive(Debug)]
struct HeadlessState {
    next_handle: u64,
    objects: HashMap<u64, &'static str>,
    sizes: HashMap<u64, u64>,
    buffer_bindings: HashMap<u64, (u64, u64)>,
    memory: HashMap<u64, MemoryState>,
    fences: HashMap<u64, FenceState>,
    signaled_semaphores: HashSet<u64>,
    command_buffers: HashMap<u64, CommandBufferState>,
    descriptor_pools: HashMap<u64, (u32, Vec<u64>)>,
    pipeline_caches: HashMap<u64, Vec<u8>>,
    swapchains: HashMap<u64, SwapchainState>,
    surface: SurfaceProfile,
    faults: Vec<Fault>,
    counters: Counters,
    calls: Vec<DriverCall>,
    violations: Vec<String>,
}

impl HeadlessState {
    fn new(surface: SurfaceProfile) -> Self {
        Self {
            next_handle: 0x1000,
            objects: HashMap::new(),
            sizes: HashMap::new(),
            buffer_bindings: HashMap::new(),
            memory: HashMap::new(),
            fences: HashMap::new(),
            signaled_semaphores: HashSet::new(),
            command_buffers: HashMap::new(),
            descriptor_pools: HashMap::new(),
            pipeline_caches: HashMap::new(),
            swapchains: HashMap::new(),
            surface,
            faults: Vec::new(),
            counters: Counters::default(),
            calls: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn create(&mut self, kind: &'static str) -> u64 {
        let raw = self.mint();
        self.objects.insert(raw, kind);
        raw
    }

    fn destroy(&mut self, raw: u64, kind: &'static str) {
        if raw == 0 {
            return;
        }
        match self.objects.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => self.violation(format!("destroyed {found} {raw:#x} as a {kind}")),
            None => self.violation(format!("destroyed unknown or already destroyed {kind} {raw:#x}")),
        }
    }

    fn violation(&mut self, message: String) {
        log::warn!("headless driver violation: {message}");
        self.violations.push(message);
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }

    fn consume_semaphores(&mut self, semaphores: &[vk::Semaphore], context: &str) {
        for semaphore in semaphores {
            if !self.signaled_semaphores.remove(&semaphore.as_raw()) {
                self.violation(format!("{context} waits on unsignaled semaphore {:#x}", semaphore.as_raw()));
            }
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, context: &str) {
        if semaphore == vk::Semaphore::null() {
            return;
        }
        if !self.signaled_semaphores.insert(semaphore.as_raw()) {
            self.violation(format!("{context} signals semaphore {:#x} that is already signaled", semaphore.as_raw()));
        }
    }

    fn complete_fence(&mut self, raw: u64) {
        self.fences.insert(raw, FenceState::Signaled);
        for buffer in self.command_buffers.values_mut() {
            if buffer.fence == Some(raw) && buffer.state == RecordState::Pending {
                buffer.state = RecordState::Executable;
                buffer.fence = None;
            }
        }
    }

    fn complete_all(&mut self) {
        let pending: Vec<u64> = self
            .fences
            .iter()
            .filter(|(_, state)| **state == FenceState::Pending)
            .map(|(raw, _)| *raw)
            .collect();
        for raw in pending {
            self.complete_fence(raw);
        }
        for buffer in self.command_buffers.values_mut() {
            if buffer.state == RecordState::Pending && buffer.fence.is_none() {
                buffer.state = RecordState::Executable;
            }
        }
    }

    fn check_not_in_flight(&mut self, buffer: vk::CommandBuffer, action: &str) {
        let raw = buffer.as_raw();
        let in_flight = self
            .command_buffers
            .get(&raw)
            .map(|state| state.state == RecordState::Pending)
            .unwrap_or(false);
        if in_flight {
            self.violation(format!("{action} of command buffer {raw:#x} still in flight"));
        }
    }

    fn set_record_state(&mut self, buffer: vk::CommandBuffer, state: RecordState) {
        match self.command_buffers.get_mut(&buffer.as_raw()) {
            Some(entry) => entry.state = state,
            None => self.violation(format!("unknown command buffer {:#x}", buffer.as_raw())),
        }
    }

    fn buffer_bytes(&self, buffer: vk::Buffer) -> Option<(u64, u64)> {
        self.buffer_bindings.get(&buffer.as_raw()).copied()
    }
}

fn lock(state: &Mutex<HeadlessState>) -> MutexGuard<'_, HeadlessState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn aligned(size: u64) -> u64 {
    (size + 255) & !255
}

/// Simulated Vulkan instance with a bound surface
///
/// Cheap to clone; clones observe the same device state, which is how tests
/// inspect the call log of a device owned by a `Renderer`.
#[derive(Clone)]
pub struct HeadlessInstance {
    profile: HeadlessProfile,
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessInstance {
    /// Create an instance reporting `profile`
    pub fn new(mut profile: HeadlessProfile) -> Self {
        for (index, adapter) in profile.adapters.iter_mut().enumerate() {
            adapter.handle = vk::PhysicalDevice::from_raw(index as u64 + 1);
        }
        let state = Arc::new(Mutex::new(HeadlessState::new(profile.surface.clone())));
        Self { profile, state }
    }

    /// Arm a fault
    pub fn inject(&self, fault: Fault) {
        lock(&self.state).faults.push(fault);
    }

    /// Resize the simulated window
    pub fn set_surface_extent(&self, extent: Option<vk::Extent2D>) {
        lock(&self.state).surface.current_extent = extent;
    }

    /// Snapshot of the call log
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.state).calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Misuse detected so far
    pub fn violations(&self) -> Vec<String> {
        lock(&self.state).violations.clone()
    }

    /// Objects created and not yet destroyed, by kind
    pub fn live_objects(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = lock(&self.state).objects.values().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for HeadlessInstance {
    fn default() -> Self {
        Self::new(HeadlessProfile::default())
    }
}

impl InstanceDriver for HeadlessInstance {
    fn enumerate_adapters(&self) -> VulkanResult<Vec<AdapterInfo>> {
        Ok(self.profile.adapters.clone())
    }

    fn create_device(&self, adapter: &AdapterInfo, request: &DeviceRequest) -> VulkanResult<Arc<dyn DeviceDriver>> {
        let family = |index: u32| adapter.queue_families.get(index as usize).copied();
        let graphics_ok = family(request.queues.graphics)
            .map(|f| f.flags.contains(vk::QueueFlags::GRAPHICS))
            .unwrap_or(false);
        let present_ok = family(request.queues.present)
            .map(|f| f.present_support)
            .unwrap_or(false);
        if !graphics_ok || !present_ok {
            return Err(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        if let Some(missing) = request.extensions.iter().find(|ext| !adapter.supports_extension(ext)) {
            log::error!("Headless adapter lacks extension {missing}");
            return Err(VulkanError::Api(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
        }

        let mut state = lock(&self.state);
        let graphics_queue = vk::Queue::from_raw(state.mint());
        let present_queue = if request.queues.graphics == request.queues.present {
            graphics_queue
        } else {
            vk::Queue::from_raw(state.mint())
        };
        drop(state);

        Ok(Arc::new(HeadlessDevice {
            adapter: adapter.clone(),
            families: request.queues,
            graphics_queue,
            present_queue,
            depth_formats: self.profile.depth_formats.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Simulated logical device
pub struct HeadlessDevice {
    adapter: AdapterInfo,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    depth_formats: Vec<vk::Format>,
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessDevice {
    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        lock(&self.state)
    }

    fn record(&self, call: DriverCall) {
        self.state().calls.push(call);
    }
}

impl DeviceDriver for HeadlessDevice {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.families
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    fn device_wait_idle(&self) -> VulkanResult<()> {
        let mut state = self.state();
        state.complete_all();
        state.calls.push(DriverCall::DeviceWaitIdle);
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VulkanResult<()> {
        let mut state = self.state();
        state.complete_all();
        state.calls.push(DriverCall::QueueWaitIdle);
        Ok(())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let mut properties = vk::FormatProperties::default();
        if self.depth_formats.contains(&format) {
            properties.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        } else if matches!(
            format,
            vk::Format::B8G8R8A8_SRGB
                | vk::Format::B8G8R8A8_UNORM
                | vk::Format::R8G8B8A8_SRGB
                | vk::Format::R8G8B8A8_UNORM
        ) {
            properties.optimal_tiling_features = vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::TRANSFER_DST;
            properties.linear_tiling_features = vk::FormatFeatureFlags::TRANSFER_DST;
        }
        properties
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            memory_heap_count: 2,
            ..Default::default()
        };
        properties.memory_heaps[0] = vk::MemoryHeap {
            size: 4 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        properties.memory_heaps[1] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        properties.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        properties.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        properties.memory_types[2] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
            heap_index: 1,
        };
        properties
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.state();
        let surface = &state.surface;
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: surface.min_image_count,
            max_image_count: surface.max_image_count,
            current_extent: surface.current_extent.unwrap_or(vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }),
            min_image_extent: surface.min_extent,
            max_image_extent: surface.max_extent,
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: surface.composite_alpha,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        })
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state().surface.formats.clone())
    }

    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state().surface.present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let surface = state.surface.clone();

        if desc.min_image_count < surface.min_image_count
            || (surface.max_image_count > 0 && desc.min_image_count > surface.max_image_count)
        {
            state.violation(format!("swapchain image count {} outside surface bounds", desc.min_image_count));
        }
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation("swapchain created with zero extent".to_string());
        }
        if !surface.present_modes.contains(&desc.present_mode) {
            state.violation(format!("unsupported present mode {:?}", desc.present_mode));
        }
        if desc.old_swapchain != vk::SwapchainKHR::null() && !state.swapchains.contains_key(&desc.old_swapchain.as_raw()) {
            state.violation("old swapchain is not alive".to_string());
        }

        let raw = state.create("swapchain");
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(state.mint()))
            .collect();
        state.swapchains.insert(
            raw,
            SwapchainState {
                images,
                extent: desc.extent,
                next: 0,
                out_of_date: false,
            },
        );
        state.calls.push(DriverCall::CreateSwapchain {
            image_count: desc.min_image_count,
            extent: desc.extent,
            format: desc.surface_format.format,
            present_mode: desc.present_mode,
        });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|sc| sc.images.clone())
            .ok_or(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.destroy(swapchain.as_raw(), "swapchain");
        state.swapchains.remove(&swapchain.as_raw());
        state.calls.push(DriverCall::DestroySwapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: Duration,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome> {
        let mut state = self.state();
        state.counters.acquires += 1;
        let nth = state.counters.acquires;
        let forced_stale = state.take_fault(Fault::OutOfDateOnAcquire(nth));
        let surface_extent = state.surface.current_extent;

        let outcome = match state.swapchains.get_mut(&swapchain.as_raw()) {
            None => return Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Some(sc) => {
                let resized = surface_extent.map(|extent| extent != sc.extent).unwrap_or(false);
                if forced_stale || resized {
                    sc.out_of_date = true;
                }
                if sc.out_of_date {
                    AcquireOutcome::OutOfDate
                } else {
                    let index = sc.next;
                    sc.next = (sc.next + 1) % sc.images.len() as u32;
                    AcquireOutcome::Acquired { index, suboptimal: false }
                }
            }
        };

        if matches!(outcome, AcquireOutcome::Acquired { .. }) {
            state.signal_semaphore(signal, "acquire");
        }
        state.calls.push(DriverCall::AcquireNextImage { semaphore: signal, outcome });
        Ok(outcome)
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> VulkanResult<PresentOutcome> {
        let mut state = self.state();
        state.counters.presents += 1;
        let nth = state.counters.presents;
        state.consume_semaphores(wait, "present");

        let stale = state.take_fault(Fault::OutOfDateOnPresent(nth));
        let suboptimal = state.take_fault(Fault::SuboptimalOnPresent(nth));
        let outcome = match state.swapchains.get_mut(&swapchain.as_raw()) {
            None => return Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Some(sc) => {
                if image_index as usize >= sc.images.len() {
                    return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
                }
                if stale {
                    sc.out_of_date = true;
                }
                if sc.out_of_date {
                    PresentOutcome::OutOfDate
                } else {
                    PresentOutcome::Presented { suboptimal }
                }
            }
        };

        state.calls.push(DriverCall::QueuePresent {
            image_index,
            wait: wait.to_vec(),
            outcome,
        });
        Ok(outcome)
    }

    fn create_buffer(&self, size: vk::DeviceSize, _usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        if size == 0 {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let mut state = self.state();
        let raw = state.create("buffer");
        state.sizes.insert(raw, size);
        Ok(vk::Buffer::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        state.destroy(buffer.as_raw(), "buffer");
        state.sizes.remove(&buffer.as_raw());
        state.buffer_bindings.remove(&buffer.as_raw());
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self.state().sizes.get(&buffer.as_raw()).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size: aligned(size),
            alignment: 256,
            memory_type_bits: 0b111,
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let mut state = self.state();
        if desc.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
            && (desc.array_layers < 6 || desc.extent.width != desc.extent.height)
        {
            state.violation(format!(
                "cube-compatible image with {} layers of {}x{}",
                desc.array_layers, desc.extent.width, desc.extent.height
            ));
        }
        let raw = state.create("image");
        let texels = u64::from(desc.extent.width) * u64::from(desc.extent.height) * u64::from(desc.extent.depth.max(1));
        let size = texels * 4 * u64::from(desc.array_layers.max(1)) * u64::from(desc.samples.as_raw().max(1));
        state.sizes.insert(raw, size);
        Ok(vk::Image::from_raw(raw))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        state.destroy(image.as_raw(), "image");
        state.sizes.remove(&image.as_raw());
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self.state().sizes.get(&image.as_raw()).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size: aligned(size),
            alignment: 256,
            // Images never land in host-cached memory
            memory_type_bits: 0b011,
        }
    }

    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory> {
        let properties = self.memory_properties();
        if memory_type_index >= properties.memory_type_count {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let host_visible = properties.memory_types[memory_type_index as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let len = usize::try_from(size).map_err(|_| VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;

        let mut state = self.state();
        let raw = state.create("memory");
        state.memory.insert(
            raw,
            MemoryState {
                bytes: vec![0; len],
                host_visible,
            },
        );
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        state.destroy(memory.as_raw(), "memory");
        state.memory.remove(&memory.as_raw());
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        let mut state = self.state();
        if !state.memory.contains_key(&memory.as_raw()) {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        state.buffer_bindings.insert(buffer.as_raw(), (memory.as_raw(), offset));
        Ok(())
    }

    fn bind_image_memory(&self, _image: vk::Image, memory: vk::DeviceMemory, _offset: vk::DeviceSize) -> VulkanResult<()> {
        if self.state().memory.contains_key(&memory.as_raw()) {
            Ok(())
        } else {
            Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT))
        }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let mut state = self.state();
        let block = state
            .memory
            .get_mut(&memory.as_raw())
            .ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        if !block.host_visible {
            return Err(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > block.bytes.len() {
            return Err(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        block.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        let state = self.state();
        let block = state
            .memory
            .get(&memory.as_raw())
            .ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        if !block.host_visible {
            return Err(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let start = offset as usize;
        block
            .bytes
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, _offset: vk::DeviceSize, _size: vk::DeviceSize) -> VulkanResult<()> {
        if self.state().memory.contains_key(&memory.as_raw()) {
            Ok(())
        } else {
            Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT))
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let mut state = self.state();
        let layers_fit = match desc.view_type {
            vk::ImageViewType::CUBE => desc.layer_count == 6,
            vk::ImageViewType::CUBE_ARRAY => desc.layer_count % 6 == 0,
            vk::ImageViewType::TYPE_2D => desc.layer_count == 1,
            _ => true,
        };
        if !layers_fit {
            state.violation(format!("{:?} view over {} layers", desc.view_type, desc.layer_count));
        }
        Ok(vk::ImageView::from_raw(state.create("image view")))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().destroy(view.as_raw(), "image view");
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let mut state = self.state();
        if desc.anisotropy.is_some() && self.adapter.features.sampler_anisotropy != vk::TRUE {
            state.violation("anisotropic sampler without the sampler_anisotropy feature".to_string());
        }
        Ok(vk::Sampler::from_raw(state.create("sampler")))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().destroy(sampler.as_raw(), "sampler");
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let mut state = self.state();
        if !desc.resolve.is_empty() && desc.resolve.len() != desc.color.len() {
            state.violation("resolve attachment count differs from color count".to_string());
        }
        let raw = state.create("render pass");
        state.calls.push(DriverCall::CreateRenderPass {
            attachments: desc.attachments.len(),
        });
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().destroy(render_pass.as_raw(), "render pass");
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let mut state = self.state();
        if extent.width == 0 || extent.height == 0 {
            state.violation("framebuffer with zero extent".to_string());
        }
        let raw = state.create("framebuffer");
        state.calls.push(DriverCall::CreateFramebuffer {
            attachments: attachments.len(),
        });
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state().destroy(framebuffer.as_raw(), "framebuffer");
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        if code.first() != Some(&0x0723_0203) {
            return Err(VulkanError::Api(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(vk::ShaderModule::from_raw(self.state().create("shader module")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state().destroy(module.as_raw(), "shader module");
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(self.state().create("descriptor set layout")))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state().destroy(layout.as_raw(), "descriptor set layout");
    }

    fn create_descriptor_pool(&self, max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let mut state = self.state();
        let raw = state.create("descriptor pool");
        state.descriptor_pools.insert(raw, (max_sets, Vec::new()));
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        state.destroy(pool.as_raw(), "descriptor pool");
        state.descriptor_pools.remove(&pool.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        let (max_sets, live) = state
            .descriptor_pools
            .get(&pool.as_raw())
            .map(|(max, sets)| (*max, sets.len()))
            .ok_or(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT))?;
        if live + layouts.len() > max_sets as usize {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let raws: Vec<u64> = layouts.iter().map(|_| state.mint()).collect();
        if let Some((_, sets)) = state.descriptor_pools.get_mut(&pool.as_raw()) {
            sets.extend(&raws);
        }
        Ok(raws.into_iter().map(vk::DescriptorSet::from_raw).collect())
    }

    fn free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        let mut state = self.state();
        let mut unknown = Vec::new();
        match state.descriptor_pools.get_mut(&pool.as_raw()) {
            Some((_, live)) => {
                for set in sets {
                    match live.iter().position(|raw| *raw == set.as_raw()) {
                        Some(index) => {
                            live.swap_remove(index);
                        }
                        None => unknown.push(set.as_raw()),
                    }
                }
            }
            None => return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
        for raw in unknown {
            state.violation(format!("freed descriptor set {raw:#x} not owned by the pool"));
        }
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        for write in writes {
            let known = state
                .descriptor_pools
                .values()
                .any(|(_, sets)| sets.contains(&write.set.as_raw()));
            if !known {
                state.violation(format!("descriptor write to dead set {:#x}", write.set.as_raw()));
            }
        }
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let mut state = self.state();
        let limit = self.adapter.limits.max_push_constants_size;
        if push_constant_ranges.iter().any(|r| r.offset + r.size > limit) {
            state.violation(format!("push constant range exceeds {limit} bytes"));
        }
        Ok(vk::PipelineLayout::from_raw(state.create("pipeline layout")))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state().destroy(layout.as_raw(), "pipeline layout");
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> VulkanResult<vk::PipelineCache> {
        let mut state = self.state();
        let raw = state.create("pipeline cache");
        state.pipeline_caches.insert(raw, initial_data.to_vec());
        Ok(vk::PipelineCache::from_raw(raw))
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> VulkanResult<Vec<u8>> {
        self.state()
            .pipeline_caches
            .get(&cache.as_raw())
            .cloned()
            .ok_or(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        let mut state = self.state();
        state.destroy(cache.as_raw(), "pipeline cache");
        state.pipeline_caches.remove(&cache.as_raw());
    }

    fn create_graphics_pipeline(&self, cache: vk::PipelineCache, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let mut state = self.state();
        if desc.stages.is_empty() {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        if desc.sample_shading && self.adapter.features.sample_rate_shading != vk::TRUE {
            state.violation("sample shading without the sample_rate_shading feature".to_string());
        }
        if let Some(blob) = state.pipeline_caches.get_mut(&cache.as_raw()) {
            blob.extend_from_slice(&(desc.stages.len() as u32).to_le_bytes());
        }
        let raw = state.create("pipeline");
        state.calls.push(DriverCall::CreateGraphicsPipeline);
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn create_compute_pipeline(
        &self,
        cache: vk::PipelineCache,
        _layout: vk::PipelineLayout,
        stage: &ShaderStageDesc,
    ) -> VulkanResult<vk::Pipeline> {
        if stage.stage != vk::ShaderStageFlags::COMPUTE {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let mut state = self.state();
        if let Some(blob) = state.pipeline_caches.get_mut(&cache.as_raw()) {
            blob.extend_from_slice(&1u32.to_le_bytes());
        }
        let raw = state.create("pipeline");
        state.calls.push(DriverCall::CreateComputePipeline);
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().destroy(pipeline.as_raw(), "pipeline");
    }

    fn create_command_pool(&self, queue_family: u32) -> VulkanResult<vk::CommandPool> {
        if queue_family != self.families.graphics && queue_family != self.families.present {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        Ok(vk::CommandPool::from_raw(self.state().create("command pool")))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        let owned: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| cb.pool == pool.as_raw())
            .map(|(raw, _)| *raw)
            .collect();
        for raw in owned {
            state.check_not_in_flight(vk::CommandBuffer::from_raw(raw), "destruction");
            state.command_buffers.remove(&raw);
            state.objects.remove(&raw);
        }
        state.destroy(pool.as_raw(), "command pool");
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        if !state.objects.contains_key(&pool.as_raw()) {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = state.create("command buffer");
            state.command_buffers.insert(
                raw,
                CommandBufferState {
                    pool: pool.as_raw(),
                    state: RecordState::Initial,
                    fence: None,
                },
            );
            buffers.push(vk::CommandBuffer::from_raw(raw));
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for buffer in buffers {
            state.check_not_in_flight(*buffer, "free");
            state.command_buffers.remove(&buffer.as_raw());
            state.destroy(buffer.as_raw(), "command buffer");
        }
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        state.check_not_in_flight(buffer, "reset");
        state.set_record_state(buffer, RecordState::Initial);
        state.calls.push(DriverCall::ResetCommandBuffer { buffer });
        Ok(())
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, _one_time: bool) -> VulkanResult<()> {
        let mut state = self.state();
        state.check_not_in_flight(buffer, "begin");
        let recording = state
            .command_buffers
            .get(&buffer.as_raw())
            .map(|cb| cb.state == RecordState::Recording)
            .unwrap_or(false);
        if recording {
            state.violation(format!("begin of command buffer {:#x} already recording", buffer.as_raw()));
        }
        state.set_record_state(buffer, RecordState::Recording);
        state.calls.push(DriverCall::BeginCommandBuffer { buffer });
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        let recording = state
            .command_buffers
            .get(&buffer.as_raw())
            .map(|cb| cb.state == RecordState::Recording)
            .unwrap_or(false);
        if !recording {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        state.set_record_state(buffer, RecordState::Executable);
        state.calls.push(DriverCall::EndCommandBuffer { buffer });
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _area: vk::Rect2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.record(DriverCall::BeginRenderPass { framebuffer });
    }

    fn cmd_end_render_pass(&self, _buffer: vk::CommandBuffer) {
        self.record(DriverCall::EndRenderPass);
    }

    fn cmd_set_viewport(&self, _buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(DriverCall::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(DriverCall::SetScissor { extent: scissor.extent });
    }

    fn cmd_bind_pipeline(&self, _buffer: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(DriverCall::BindPipeline { pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(DriverCall::BindDescriptorSets { count: sets.len() });
    }

    fn cmd_push_constants(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(DriverCall::PushConstants { offset, size: data.len() });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        _buffer: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.record(DriverCall::BindVertexBuffers { count: buffers.len() });
    }

    fn cmd_bind_index_buffer(
        &self,
        _buffer: vk::CommandBuffer,
        _index_buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.record(DriverCall::BindIndexBuffer { index_type });
    }

    fn cmd_draw(&self, _buffer: vk::CommandBuffer, vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.record(DriverCall::Draw { vertex_count });
    }

    fn cmd_draw_indexed(
        &self,
        _buffer: vk::CommandBuffer,
        index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(DriverCall::DrawIndexed { index_count });
    }

    fn cmd_dispatch(&self, _buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(DriverCall::Dispatch { groups: [x, y, z] });
    }

    fn cmd_copy_buffer(&self, _buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        // Copies execute at record time; submission ordering is not modelled
        let mut state = self.state();
        if let (Some((src_mem, src_base)), Some((dst_mem, dst_base))) = (state.buffer_bytes(src), state.buffer_bytes(dst)) {
            for region in regions {
                let from = (src_base + region.src_offset) as usize;
                let to = (dst_base + region.dst_offset) as usize;
                let len = region.size as usize;
                let chunk = state
                    .memory
                    .get(&src_mem)
                    .and_then(|m| m.bytes.get(from..from + len))
                    .map(<[u8]>::to_vec);
                let fits = state
                    .memory
                    .get(&dst_mem)
                    .map(|target| to + len <= target.bytes.len())
                    .unwrap_or(false);
                match (chunk, fits) {
                    (Some(chunk), true) => {
                        if let Some(target) = state.memory.get_mut(&dst_mem) {
                            target.bytes[to..to + len].copy_from_slice(&chunk);
                        }
                    }
                    _ => state.violation("buffer copy out of bounds".to_string()),
                }
            }
        } else {
            state.violation("buffer copy between unbound buffers".to_string());
        }
        state.calls.push(DriverCall::CopyBuffer);
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _buffer: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Image,
        layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        let mut state = self.state();
        if layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            state.violation(format!("buffer to image copy into {layout:?}"));
        }
        state.calls.push(DriverCall::CopyBufferToImage);
    }

    fn cmd_blit_image(
        &self,
        _buffer: vk::CommandBuffer,
        _src: vk::Image,
        src_layout: vk::ImageLayout,
        _dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        _filter: vk::Filter,
    ) {
        let mut state = self.state();
        if src_layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL || dst_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            state.violation(format!("blit from {src_layout:?} into {dst_layout:?}"));
        }
        let (src_level, dst_level) = regions
            .first()
            .map_or((0, 0), |region| (region.src_subresource.mip_level, region.dst_subresource.mip_level));
        state.calls.push(DriverCall::BlitImage { src_level, dst_level });
    }

    fn cmd_memory_barrier(
        &self,
        _buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        _src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        self.record(DriverCall::MemoryBarrier { dst_access });
    }

    fn cmd_pipeline_barrier(
        &self,
        _buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        let new_layout = image_barriers
            .first()
            .map(|b| b.new_layout)
            .unwrap_or(vk::ImageLayout::UNDEFINED);
        self.record(DriverCall::PipelineBarrier { new_layout });
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.state().create("semaphore")))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state();
        state.destroy(semaphore.as_raw(), "semaphore");
        state.signaled_semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.create("fence");
        let initial = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        state.fences.insert(raw, initial);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if matches!(state.fences.get(&fence.as_raw()), Some(FenceState::Pending)) {
            state.violation(format!("destroyed fence {:#x} while in flight", fence.as_raw()));
        }
        state.destroy(fence.as_raw(), "fence");
        state.fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: Duration) -> VulkanResult<FenceWait> {
        let mut state = self.state();
        state.calls.push(DriverCall::WaitForFence { fence });
        match state.fences.get(&fence.as_raw()).copied() {
            Some(FenceState::Signaled) => Ok(FenceWait::Signaled),
            Some(FenceState::Pending) => {
                state.complete_fence(fence.as_raw());
                Ok(FenceWait::Signaled)
            }
            Some(FenceState::Unsignaled | FenceState::Hung) => Ok(FenceWait::TimedOut),
            None => Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool> {
        match self.state().fences.get(&fence.as_raw()) {
            Some(state) => Ok(*state == FenceState::Signaled),
            None => Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state();
        match state.fences.get(&fence.as_raw()).copied() {
            Some(FenceState::Pending | FenceState::Hung) => {
                state.violation(format!("reset of fence {:#x} still in flight", fence.as_raw()));
            }
            Some(_) => {}
            None => return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
        state.fences.insert(fence.as_raw(), FenceState::Unsignaled);
        state.calls.push(DriverCall::ResetFence { fence });
        Ok(())
    }

    fn queue_submit(&self, _queue: vk::Queue, submit: &SubmitDesc<'_>) -> VulkanResult<()> {
        let mut state = self.state();
        state.counters.submits += 1;
        let nth = state.counters.submits;

        if submit.wait_semaphores.len() != submit.wait_stages.len() {
            state.violation("wait semaphore and stage counts differ".to_string());
        }
        state.consume_semaphores(submit.wait_semaphores, "submit");

        let fence_raw = (submit.fence != vk::Fence::null()).then(|| submit.fence.as_raw());
        for buffer in submit.command_buffers {
            let executable = state
                .command_buffers
                .get(&buffer.as_raw())
                .map(|cb| cb.state == RecordState::Executable)
                .unwrap_or(false);
            if !executable {
                state.violation(format!("submitted command buffer {:#x} is not executable", buffer.as_raw()));
            }
            if let Some(cb) = state.command_buffers.get_mut(&buffer.as_raw()) {
                cb.state = RecordState::Pending;
                cb.fence = fence_raw;
            }
        }

        if let Some(raw) = fence_raw {
            if state.fences.get(&raw) != Some(&FenceState::Unsignaled) {
                state.violation(format!("submitted with fence {raw:#x} that was not reset"));
            }
            let hung = state.take_fault(Fault::HungSubmit(nth));
            state.fences.insert(raw, if hung { FenceState::Hung } else { FenceState::Pending });
        }

        for semaphore in submit.signal_semaphores {
            state.signal_semaphore(*semaphore, "submit");
        }

        state.calls.push(DriverCall::QueueSubmit {
            wait: submit.wait_semaphores.to_vec(),
            signal: submit.signal_semaphores.to_vec(),
            command_buffers: submit.command_buffers.to_vec(),
            fence: submit.fence,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(instance: &HeadlessInstance) -> Arc<dyn DeviceDriver> {
        let adapter = instance.enumerate_adapters().unwrap().remove(0);
        let request = DeviceRequest {
            queues: QueueFamilyIndices { graphics: 0, present: 0 },
            features: vk::PhysicalDeviceFeatures::default(),
            extensions: vec!["VK_KHR_swapchain".into()],
        };
        instance.create_device(&adapter, &request).unwrap()
    }

    #[test]
    fn test_fence_completes_on_wait() {
        let instance = HeadlessInstance::default();
        let device = device(&instance);
        let fence = device.create_fence(false).unwrap();

        let pool = device.create_command_pool(0).unwrap();
        let cb = device.allocate_command_buffers(pool, 1).unwrap()[0];
        device.begin_command_buffer(cb, true).unwrap();
        device.end_command_buffer(cb).unwrap();
        device
            .queue_submit(
                device.graphics_queue(),
                &SubmitDesc {
                    wait_semaphores: &[],
                    wait_stages: &[],
                    command_buffers: &[cb],
                    signal_semaphores: &[],
                    fence,
                },
            )
            .unwrap();

        assert!(!device.fence_status(fence).unwrap());
        assert_eq!(device.wait_for_fence(fence, Duration::from_secs(1)).unwrap(), FenceWait::Signaled);
        assert!(device.fence_status(fence).unwrap());
        assert!(instance.violations().is_empty());

        device.destroy_command_pool(pool);
        device.destroy_fence(fence);
        assert!(instance.live_objects().is_empty());
    }

    #[test]
    fn test_reset_of_pending_fence_is_a_violation() {
        let instance = HeadlessInstance::default();
        let device = device(&instance);
        let fence = device.create_fence(false).unwrap();
        device
            .queue_submit(
                device.graphics_queue(),
                &SubmitDesc {
                    wait_semaphores: &[],
                    wait_stages: &[],
                    command_buffers: &[],
                    signal_semaphores: &[],
                    fence,
                },
            )
            .unwrap();

        device.reset_fence(fence).unwrap();
        assert_eq!(instance.violations().len(), 1);
        device.destroy_fence(fence);
    }

    #[test]
    fn test_hung_submit_times_out() {
        let instance = HeadlessInstance::default();
        instance.inject(Fault::HungSubmit(1));
        let device = device(&instance);
        let fence = device.create_fence(false).unwrap();
        let submit = SubmitDesc {
            wait_semaphores: &[],
            wait_stages: &[],
            command_buffers: &[],
            signal_semaphores: &[],
            fence,
        };
        device.queue_submit(device.graphics_queue(), &submit).unwrap();

        assert_eq!(device.wait_for_fence(fence, Duration::from_millis(1)).unwrap(), FenceWait::TimedOut);
    }

    #[test]
    fn test_memory_round_trip_and_double_free() {
        let instance = HeadlessInstance::default();
        let device = device(&instance);

        let memory = device.allocate_memory(64, 1).unwrap();
        device.write_memory(memory, 8, &[1, 2, 3]).unwrap();
        assert_eq!(device.read_memory(memory, 8, 3).unwrap(), vec![1, 2, 3]);
        assert!(device.write_memory(memory, 62, &[0; 4]).is_err());

        let device_local = device.allocate_memory(64, 0).unwrap();
        assert!(device.write_memory(device_local, 0, &[1]).is_err());

        device.free_memory(memory);
        device.free_memory(memory);
        device.free_memory(device_local);
        assert_eq!(instance.violations().len(), 1);
    }

    #[test]
    fn test_acquire_round_robin_and_stale_fault() {
        let instance = HeadlessInstance::default();
        instance.inject(Fault::OutOfDateOnAcquire(3));
        let device = device(&instance);
        let desc = SwapchainDesc {
            min_image_count: 3,
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            extent: vk::Extent2D { width: 800, height: 600 },
            present_mode: vk::PresentModeKHR::FIFO,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            shared_families: Vec::new(),
            old_swapchain: vk::SwapchainKHR::null(),
        };
        let swapchain = device.create_swapchain(&desc).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        let timeout = Duration::from_secs(1);

        let first = device.acquire_next_image(swapchain, timeout, semaphore).unwrap();
        assert_eq!(first, AcquireOutcome::Acquired { index: 0, suboptimal: false });
        device
            .queue_present(device.present_queue(), swapchain, 0, &[semaphore])
            .unwrap();

        let second = device.acquire_next_image(swapchain, timeout, semaphore).unwrap();
        assert_eq!(second, AcquireOutcome::Acquired { index: 1, suboptimal: false });
        device
            .queue_present(device.present_queue(), swapchain, 1, &[semaphore])
            .unwrap();

        let third = device.acquire_next_image(swapchain, timeout, semaphore).unwrap();
        assert_eq!(third, AcquireOutcome::OutOfDate);
        let fourth = device.acquire_next_image(swapchain, timeout, semaphore).unwrap();
        assert_eq!(fourth, AcquireOutcome::OutOfDate);
        assert!(instance.violations().is_empty());

        device.destroy_semaphore(semaphore);
        device.destroy_swapchain(swapchain);
    }

    #[test]
    fn test_device_rejects_missing_present_family() {
        let mut adapter = HeadlessProfile::adapter("no present", vk::PhysicalDeviceType::INTEGRATED_GPU);
        adapter.queue_families[0].present_support = false;
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_adapters(vec![adapter]));
        let adapter = instance.enumerate_adapters().unwrap().remove(0);
        let request = DeviceRequest {
            queues: QueueFamilyIndices { graphics: 0, present: 0 },
            features: vk::PhysicalDeviceFeatures::default(),
            extensions: Vec::new(),
        };
        assert!(instance.create_device(&adapter, &request).is_err());
    }
}
