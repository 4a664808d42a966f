//! Driver capability table
//!
//! Every GPU call the backend makes goes through [`InstanceDriver`] or
//! [`DeviceDriver`]. Components hold an `Arc<dyn DeviceDriver>` in place of a
//! raw `ash::Device`, which lets the same code run against the real Vulkan
//! loader ([`vulkan`]) or the simulated device used in tests ([`headless`]).
//!
//! Handles stay plain `ash::vk` handles; descriptor structs below replace the
//! pointer-carrying `*CreateInfo` structs at the trait boundary.

pub mod headless;
pub mod vulkan;

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::VulkanResult;

/// Queue family description reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Operations the family supports
    pub flags: vk::QueueFlags,
    /// Number of queues in the family
    pub queue_count: u32,
    /// Whether the family can present to the bound surface
    pub present_support: bool,
}

/// Adapter limits the backend consults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterLimits {
    /// Sample counts usable for color attachments
    pub framebuffer_color_sample_counts: vk::SampleCountFlags,
    /// Sample counts usable for depth attachments
    pub framebuffer_depth_sample_counts: vk::SampleCountFlags,
    /// Upper bound for sampler anisotropy
    pub max_sampler_anisotropy: f32,
    /// Bytes available for push constants
    pub max_push_constants_size: u32,
}

impl Default for AdapterLimits {
    fn default() -> Self {
        Self {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            max_sampler_anisotropy: 1.0,
            max_push_constants_size: 128,
        }
    }
}

/// A physical device as seen during selection
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Physical device handle
    pub handle: vk::PhysicalDevice,
    /// Human-readable device name
    pub name: String,
    /// Discrete, integrated, virtual, cpu or other
    pub device_type: vk::PhysicalDeviceType,
    /// Supported optional features
    pub features: vk::PhysicalDeviceFeatures,
    /// Relevant limits
    pub limits: AdapterLimits,
    /// Queue families in index order
    pub queue_families: Vec<QueueFamilyInfo>,
    /// Supported device extension names
    pub extensions: Vec<String>,
}

impl AdapterInfo {
    /// Whether the named device extension is available
    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

/// Queue family indices chosen for a logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics and transfer submissions
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Logical device request
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    /// Queue families to create one queue from
    pub queues: QueueFamilyIndices,
    /// Features to enable
    pub features: vk::PhysicalDeviceFeatures,
    /// Device extensions to enable
    pub extensions: Vec<String>,
}

/// Creates devices for the adapters it exposes
pub trait InstanceDriver {
    /// List every physical device in enumeration order
    fn enumerate_adapters(&self) -> VulkanResult<Vec<AdapterInfo>>;

    /// Create a logical device on `adapter`
    fn create_device(
        &self,
        adapter: &AdapterInfo,
        request: &DeviceRequest,
    ) -> VulkanResult<Arc<dyn DeviceDriver>>;
}

/// Swapchain creation parameters
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    /// Image count to request
    pub min_image_count: u32,
    /// Image format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Surface transform to apply
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Alpha compositing mode
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    /// Families sharing the images; empty means exclusive ownership
    pub shared_families: Vec<u32>,
    /// Swapchain being replaced, or null
    pub old_swapchain: vk::SwapchainKHR,
}

/// Result of asking the swapchain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired
    Acquired {
        /// Swapchain image index
        index: u32,
        /// The swapchain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain must be recreated before it can be used again
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued
    Presented {
        /// The swapchain should be recreated at the next opportunity
        suboptimal: bool,
    },
    /// The swapchain must be recreated
    OutOfDate,
}

/// Result of a bounded fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    /// The fence is signaled
    Signaled,
    /// The bound elapsed first
    TimedOut,
}

/// Image creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Texel format
    pub format: vk::Format,
    /// Size in texels
    pub extent: vk::Extent3D,
    /// Mip level count
    pub mip_levels: u32,
    /// Array layer count
    pub array_layers: u32,
    /// Samples per texel
    pub samples: vk::SampleCountFlags,
    /// Memory layout
    pub tiling: vk::ImageTiling,
    /// Allowed usages
    pub usage: vk::ImageUsageFlags,
    /// Creation flags, e.g. cube compatibility
    pub flags: vk::ImageCreateFlags,
}

/// Image view creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    /// Image to view
    pub image: vk::Image,
    /// 2D, 2D array or cube
    pub view_type: vk::ImageViewType,
    /// View format
    pub format: vk::Format,
    /// Color, depth or stencil aspect
    pub aspect: vk::ImageAspectFlags,
    /// Channel swizzle
    pub components: vk::ComponentMapping,
    /// Mip level count
    pub mip_levels: u32,
    /// Array layer count
    pub layer_count: u32,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Addressing for all three coordinates
    pub address_mode: vk::SamplerAddressMode,
    /// Anisotropy level, `None` disables it
    pub anisotropy: Option<f32>,
    /// Highest mip level sampled
    pub max_lod: f32,
}

/// Single-subpass render pass description
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    /// Attachments in framebuffer order
    pub attachments: Vec<vk::AttachmentDescription>,
    /// Color attachment references
    pub color: Vec<vk::AttachmentReference>,
    /// Resolve references, empty or one per color reference
    pub resolve: Vec<vk::AttachmentReference>,
    /// Depth attachment reference
    pub depth: Option<vk::AttachmentReference>,
    /// External dependencies
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Resource bound by a descriptor write
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    /// Uniform or storage buffer range
    Buffer(vk::DescriptorBufferInfo),
    /// Sampled image
    Image(vk::DescriptorImageInfo),
}

/// One descriptor binding update
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    /// Target set
    pub set: vk::DescriptorSet,
    /// Target binding
    pub binding: u32,
    /// Element within an arrayed binding
    pub array_element: u32,
    /// Descriptor type at the binding
    pub kind: vk::DescriptorType,
    /// Resource written
    pub resource: DescriptorResource,
}

/// Shader stage of a pipeline
#[derive(Debug, Clone)]
pub struct ShaderStageDesc {
    /// Stage the module runs in
    pub stage: vk::ShaderStageFlags,
    /// Compiled module
    pub module: vk::ShaderModule,
    /// Entry point name
    pub entry_point: String,
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<'a> {
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Programmable stages
    pub stages: &'a [ShaderStageDesc],
    /// Vertex buffer bindings
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    /// Vertex attributes
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Patch size when tessellation stages are present
    pub patch_control_points: Option<u32>,
    /// Initial viewport, ignored when dynamic
    pub viewport: vk::Viewport,
    /// Initial scissor, ignored when dynamic
    pub scissor: vk::Rect2D,
    /// Polygon mode
    pub polygon_mode: vk::PolygonMode,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Rasterized line width
    pub line_width: f32,
    /// Rasterization samples
    pub samples: vk::SampleCountFlags,
    /// Per-sample shading
    pub sample_shading: bool,
    /// Depth test enable
    pub depth_test: bool,
    /// Depth write enable
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare: vk::CompareOp,
    /// One blend state per color attachment
    pub blend_attachments: &'a [vk::PipelineColorBlendAttachmentState],
    /// States set at record time
    pub dynamic_states: &'a [vk::DynamicState],
}

/// Queue submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc<'a> {
    /// Semaphores waited before execution
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Stage each wait applies to
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Command buffers executed in order
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores signaled on completion
    pub signal_semaphores: &'a [vk::Semaphore],
    /// Fence signaled on completion, or null
    pub fence: vk::Fence,
}

/// Logical device capability table
///
/// Methods map one-to-one to Vulkan entry points. Destroy calls are
/// infallible to fit inside `Drop`.
pub trait DeviceDriver: Send + Sync {
    // Device ------------------------------------------------------------

    /// Adapter the device was created on
    fn adapter(&self) -> &AdapterInfo;
    /// Queue families the device was created with
    fn queue_families(&self) -> QueueFamilyIndices;
    /// Queue for graphics and transfer work
    fn graphics_queue(&self) -> vk::Queue;
    /// Queue for presentation
    fn present_queue(&self) -> vk::Queue;
    /// Block until the device finished all work
    fn device_wait_idle(&self) -> VulkanResult<()>;
    /// Block until a queue finished all work
    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()>;
    /// Format capabilities of the adapter
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
    /// Memory heaps and types of the adapter
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    // Surface and swapchain ---------------------------------------------

    /// Current surface capabilities
    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR>;
    /// Supported surface formats
    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>>;
    /// Supported present modes
    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>>;
    /// Create a swapchain on the bound surface
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR>;
    /// Images owned by a swapchain
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Acquire the next presentable image
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: Duration,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome>;
    /// Queue an image for presentation
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> VulkanResult<PresentOutcome>;

    // Memory and resources ----------------------------------------------

    /// Create a buffer
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer>;
    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Memory needs of a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    /// Create an image
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image>;
    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);
    /// Memory needs of an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// Allocate device memory
    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory>;
    /// Free device memory
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Bind memory to a buffer
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()>;
    /// Bind memory to an image
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()>;
    /// Map, copy `data` in, unmap
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;
    /// Map, copy `len` bytes out, unmap
    fn read_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>>;
    /// Flush a non-coherent mapped range
    fn flush_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()>;
    /// Create an image view
    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Render targets and shaders ----------------------------------------

    /// Create a single-subpass render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a framebuffer
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    // Descriptors and pipelines -----------------------------------------

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a pool whose sets can be freed individually
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a pool and every set it holds
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate one set per layout
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;
    /// Return sets to their pool
    fn free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VulkanResult<()>;
    /// Write descriptor bindings
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);
    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a pipeline cache seeded with `initial_data`
    fn create_pipeline_cache(&self, initial_data: &[u8]) -> VulkanResult<vk::PipelineCache>;
    /// Serialized contents of a pipeline cache
    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> VulkanResult<Vec<u8>>;
    /// Destroy a pipeline cache
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> VulkanResult<vk::Pipeline>;
    /// Create a compute pipeline
    fn create_compute_pipeline(
        &self,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        stage: &ShaderStageDesc,
    ) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Commands ----------------------------------------------------------

    /// Create a resettable command pool
    fn create_command_pool(&self, queue_family: u32) -> VulkanResult<vk::CommandPool>;
    /// Destroy a pool and its buffers
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate primary command buffers
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;
    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Reset a command buffer to the initial state
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Begin recording
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, one_time: bool) -> VulkanResult<()>;
    /// Finish recording
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Begin a render pass with inline contents
    fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    );
    /// End the current render pass
    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    /// Set the dynamic viewport
    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport);
    /// Set the dynamic scissor
    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    /// Bind a pipeline
    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    /// Bind descriptor sets
    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    /// Update push constants
    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    /// Bind vertex buffers
    fn cmd_bind_vertex_buffers(
        &self,
        buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    /// Bind an index buffer
    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    /// Non-indexed draw
    fn cmd_draw(&self, buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    /// Indexed draw
    fn cmd_draw_indexed(
        &self,
        buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    /// Compute dispatch
    fn cmd_dispatch(&self, buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);
    /// Buffer to buffer copy
    fn cmd_copy_buffer(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    /// Buffer to image copy
    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    /// Scaled copy between regions of images, used for mip chains
    fn cmd_blit_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );
    /// Image layout barrier
    fn cmd_pipeline_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    );
    /// Global memory barrier, e.g. between compute writes and vertex input
    fn cmd_memory_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    );

    // Synchronization ---------------------------------------------------

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    /// Create a fence, optionally signaled
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Wait for a fence with a bound
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> VulkanResult<FenceWait>;
    /// Non-blocking fence query
    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;
    /// Submit command buffers
    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc<'_>) -> VulkanResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices { graphics: 0, present: 0 };
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilyIndices { graphics: 0, present: 2 };
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn test_extension_lookup() {
        let adapter = AdapterInfo {
            handle: vk::PhysicalDevice::null(),
            name: "test".into(),
            device_type: vk::PhysicalDeviceType::CPU,
            features: vk::PhysicalDeviceFeatures::default(),
            limits: AdapterLimits::default(),
            queue_families: Vec::new(),
            extensions: vec!["VK_KHR_swapchain".into()],
        };
        assert!(adapter.supports_extension("VK_KHR_swapchain"));
        assert!(!adapter.supports_extension("VK_KHR_ray_tracing_pipeline"));
    }
}
