//! `ash` implementation of the device capability table

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use super::{
    AcquireOutcome, AdapterInfo, DescriptorResource, DescriptorWrite, DeviceDriver, DeviceRequest, FenceWait,
    GraphicsPipelineDesc, ImageDesc, ImageViewDesc, PresentOutcome, QueueFamilyIndices, RenderPassDesc, SamplerDesc,
    ShaderStageDesc, SubmitDesc, SwapchainDesc,
};
use crate::backend::initialization::instance::InstanceShared;
use crate::backend::{VulkanError, VulkanResult};

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

fn entry_point(name: &str) -> VulkanResult<CString> {
    CString::new(name).map_err(|_| VulkanError::invalid(format!("Entry point {name:?} contains a NUL byte")))
}

/// Logical device backed by the Vulkan loader
///
/// Holds the instance alive through [`InstanceShared`]; the device is
/// destroyed before the instance because this struct drops first.
pub struct VulkanDeviceDriver {
    instance: Arc<InstanceShared>,
    adapter: AdapterInfo,
    device: ash::Device,
    swapchain_loader: SwapchainLoader,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl VulkanDeviceDriver {
    /// Create the logical device with one queue per unique family
    pub(crate) fn new(instance: Arc<InstanceShared>, adapter: &AdapterInfo, request: &DeviceRequest) -> VulkanResult<Self> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = request
            .queues
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names = request
            .extensions
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;
        let extension_ptrs: Vec<*const std::os::raw::c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&request.features);

        let device = unsafe {
            instance
                .instance
                .create_device(adapter.handle, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(request.queues.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(request.queues.present, 0) };
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);

        log::info!(
            "Created logical device on {} (graphics family {}, present family {})",
            adapter.name,
            request.queues.graphics,
            request.queues.present
        );

        Ok(Self {
            instance,
            adapter: adapter.clone(),
            device,
            swapchain_loader,
            families: request.queues,
            graphics_queue,
            present_queue,
        })
    }
}

impl Drop for VulkanDeviceDriver {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

impl DeviceDriver for VulkanDeviceDriver {
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
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()> {
        unsafe { self.device.queue_wait_idle(queue).map_err(VulkanError::Api) }
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.adapter.handle, format)
        }
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_memory_properties(self.adapter.handle)
        }
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance
                .surface_loader
                .get_physical_device_surface_capabilities(self.adapter.handle, self.instance.surface)
                .map_err(VulkanError::Api)
        }
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance
                .surface_loader
                .get_physical_device_surface_formats(self.adapter.handle, self.instance.surface)
                .map_err(VulkanError::Api)
        }
    }

    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.instance
                .surface_loader
                .get_physical_device_surface_present_modes(self.adapter.handle, self.instance.surface)
                .map_err(VulkanError::Api)
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR> {
        let sharing_mode = if desc.shared_families.is_empty() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.instance.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&desc.shared_families)
            .pre_transform(desc.pre_transform)
            .composite_alpha(desc.composite_alpha)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe {
            self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: Duration,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns(timeout), signal, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(VulkanError::Timeout { waited: timeout }),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> VulkanResult<PresentOutcome> {
        let swapchains = [swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(PresentOutcome::Presented { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device.create_buffer(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .flags(desc.flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { self.device.create_image(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> VulkanResult<vk::DeviceMemory> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        unsafe {
            self.device
                .bind_buffer_memory(buffer, memory, offset)
                .map_err(VulkanError::Api)
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        unsafe {
            self.device
                .bind_image_memory(image, memory, offset)
                .map_err(VulkanError::Api)
        }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, offset, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn read_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, offset, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), bytes.as_mut_ptr(), len);
            self.device.unmap_memory(memory);
        }
        Ok(bytes)
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(offset)
            .size(size)
            .build();
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::Api)
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .components(desc.components)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.layer_count,
            });
        unsafe { self.device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.anisotropy.is_some())
            .max_anisotropy(desc.anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(desc.max_lod);
        unsafe { self.device.create_sampler(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&desc.color);
        if !desc.resolve.is_empty() {
            subpass = subpass.resolve_attachments(&desc.resolve);
        }
        if let Some(depth) = desc.depth.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass.build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&desc.attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);
        unsafe { self.device.create_render_pass(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device.create_shader_module(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe {
            self.device
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    fn free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        unsafe { self.device.free_descriptor_sets(pool, sets).map_err(VulkanError::Api) }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.kind);
                match &write.resource {
                    DescriptorResource::Buffer(info) => builder.buffer_info(std::slice::from_ref(info)).build(),
                    DescriptorResource::Image(info) => builder.image_info(std::slice::from_ref(info)).build(),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe {
            self.device
                .create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> VulkanResult<vk::PipelineCache> {
        let create_info = vk::PipelineCacheCreateInfo::builder().initial_data(initial_data);
        unsafe {
            self.device
                .create_pipeline_cache(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> VulkanResult<Vec<u8>> {
        unsafe { self.device.get_pipeline_cache_data(cache).map_err(VulkanError::Api) }
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) }
    }

    fn create_graphics_pipeline(&self, cache: vk::PipelineCache, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let names = desc
            .stages
            .iter()
            .map(|stage| entry_point(&stage.entry_point))
            .collect::<VulkanResult<Vec<_>>>()?;
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .zip(&names)
            .map(|(stage, name)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(name)
                    .build()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);
        let tessellation = desc
            .patch_control_points
            .map(|points| vk::PipelineTessellationStateCreateInfo::builder().patch_control_points(points).build());

        let viewports = [desc.viewport];
        let scissors = [desc.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.polygon_mode)
            .line_width(desc.line_width)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(desc.samples)
            .sample_shading_enable(desc.sample_shading)
            .min_sample_shading(if desc.sample_shading { 0.2 } else { 1.0 });

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(desc.blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(desc.dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);
        if let Some(tessellation) = tessellation.as_ref() {
            pipeline_info = pipeline_info.tessellation_state(tessellation);
        }

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(cache, &[pipeline_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn create_compute_pipeline(
        &self,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        stage: &ShaderStageDesc,
    ) -> VulkanResult<vk::Pipeline> {
        let name = entry_point(&stage.entry_point)?;
        let stage_info = vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage.stage)
            .module(stage.module)
            .name(&name);
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage_info.build())
            .layout(layout);

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(cache, &[pipeline_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_command_pool(&self, queue_family: u32) -> VulkanResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        unsafe { self.device.create_command_pool(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, one_time: bool) -> VulkanResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe {
            self.device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device.end_command_buffer(buffer).map_err(VulkanError::Api) }
    }

    fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(area)
            .clear_values(clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(buffer, &begin_info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(buffer) }
    }

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(buffer, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(buffer, 0, &[scissor]) }
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(buffer, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(buffer, bind_point, layout, first_set, sets, &[])
        }
    }

    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(buffer, layout, stages, offset, data) }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(buffer, first_binding, buffers, offsets)
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(buffer, index_buffer, offset, index_type)
        }
    }

    fn cmd_draw(&self, buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn cmd_draw_indexed(
        &self,
        buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_dispatch(&self, buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(buffer, x, y, z) }
    }

    fn cmd_copy_buffer(&self, buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(buffer, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(buffer, src, dst, layout, regions)
        }
    }

    fn cmd_blit_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.device
                .cmd_blit_image(buffer, src, src_layout, dst, dst_layout, regions, filter)
        }
    }

    fn cmd_memory_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            )
        }
    }

    fn cmd_pipeline_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            )
        }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> VulkanResult<FenceWait> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(fence).map_err(VulkanError::Api) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[fence]).map_err(VulkanError::Api) }
    }

    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc<'_>) -> VulkanResult<()> {
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(submit.wait_semaphores)
            .wait_dst_stage_mask(submit.wait_stages)
            .command_buffers(submit.command_buffers)
            .signal_semaphores(submit.signal_semaphores)
            .build();
        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], submit.fence)
                .map_err(VulkanError::Api)
        }
    }
}
