//! Pipelines and their resource sets
//!
//! A [`Pipeline`] keeps the [`PipelineSpecification`] it was built from so
//! the GPU object can be rebuilt against a new render pass. Each pipeline
//! owns a fixed descriptor pool sized for `max_resource_sets` allocations;
//! the pool never grows.

use ash::vk;
use std::sync::Arc;

use super::pipeline_cache::PipelineCache;
use super::reflection::{PushConstantBlock, ResourceBinding, ResourceLayout};
use super::render_pass::{RenderPass, RenderPassCompatibility};
use super::shader::{ShaderCode, ShaderModule};
use super::vertex_layout::VertexLayout;
use crate::backend::driver::{DescriptorResource, DescriptorWrite, DeviceDriver, GraphicsPipelineDesc};
use crate::backend::initialization::device::Device;
use crate::backend::resources::buffer::Buffer;
use crate::backend::{VulkanError, VulkanResult};

/// Bind point a pipeline is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineUsage {
    /// Rasterization inside a render pass
    Graphics,
    /// Compute dispatches outside render passes
    Compute,
    /// Ray tracing; not implemented
    RayTracing,
}

impl PipelineUsage {
    /// Vulkan bind point
    pub fn bind_point(self) -> VulkanResult<vk::PipelineBindPoint> {
        match self {
            Self::Graphics => Ok(vk::PipelineBindPoint::GRAPHICS),
            Self::Compute => Ok(vk::PipelineBindPoint::COMPUTE),
            Self::RayTracing => Err(VulkanError::UnsupportedPipelineUsage),
        }
    }
}

/// Color blending of the single color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Overwrite
    Opaque,
    /// Standard alpha blending
    Alpha,
    /// Additive blending for particles and lights
    Additive,
}

impl BlendMode {
    fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            Self::Opaque => builder.blend_enable(false).build(),
            Self::Alpha => builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
            Self::Additive => builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
        }
    }
}

/// Rasterization state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    /// Fill, line or point
    pub polygon_mode: vk::PolygonMode,
    /// Culled faces
    pub cull_mode: vk::CullModeFlags,
    /// Front-face winding
    pub front_face: vk::FrontFace,
    /// Line width
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
        }
    }
}

/// Depth testing; ignored when the render pass has no depth attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    /// Test fragments against the depth buffer
    pub test: bool,
    /// Write passing fragments' depth
    pub write: bool,
    /// Comparison used by the test
    pub compare: vk::CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare: vk::CompareOp::LESS,
        }
    }
}

/// Where the descriptor layout comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLayoutSource {
    /// Bindings listed by the caller
    Explicit {
        /// Descriptor bindings
        bindings: Vec<ResourceBinding>,
        /// Push-constant blocks
        push_constants: Vec<PushConstantBlock>,
    },
    /// Merged from the shaders' reflection data
    Reflected,
}

/// Everything needed to build (and rebuild) a pipeline
#[derive(Debug, Clone)]
pub struct PipelineSpecification {
    /// One shader per stage
    pub shaders: Vec<ShaderCode>,
    /// Vertex input; empty for compute or vertex-pulling pipelines
    pub vertex_layout: VertexLayout,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Patch size when tessellation stages are present
    pub patch_control_points: u32,
    /// Rasterization state
    pub rasterizer: RasterizerState,
    /// Per-sample shading; the sample count follows the render pass
    pub sample_shading: bool,
    /// Depth testing
    pub depth_stencil: DepthStencilState,
    /// Color blending
    pub color_blend: BlendMode,
    /// States set at record time
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Descriptor layout source
    pub resources: ResourceLayoutSource,
    /// Resource sets the pipeline's pool can hand out
    pub max_resource_sets: u32,
}

impl PipelineSpecification {
    /// Defaults: filled triangles, back-face culling, depth LESS with writes,
    /// no blending, dynamic viewport and scissor, reflected resources
    pub fn new(shaders: Vec<ShaderCode>) -> Self {
        Self {
            shaders,
            vertex_layout: VertexLayout::default(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            patch_control_points: 3,
            rasterizer: RasterizerState::default(),
            sample_shading: false,
            depth_stencil: DepthStencilState::default(),
            color_blend: BlendMode::Opaque,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            resources: ResourceLayoutSource::Reflected,
            max_resource_sets: 16,
        }
    }

    /// Set the vertex layout
    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    /// Set the primitive topology
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the rasterization state
    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Set the depth state
    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    /// Set the blend mode
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.color_blend = blend;
        self
    }

    /// Enable per-sample shading
    pub fn with_sample_shading(mut self, enabled: bool) -> Self {
        self.sample_shading = enabled;
        self
    }

    /// Use an explicit resource layout instead of reflection
    pub fn with_resources(mut self, bindings: Vec<ResourceBinding>, push_constants: Vec<PushConstantBlock>) -> Self {
        self.resources = ResourceLayoutSource::Explicit { bindings, push_constants };
        self
    }

    /// Set the resource set capacity
    pub fn with_max_resource_sets(mut self, max: u32) -> Self {
        self.max_resource_sets = max;
        self
    }

    fn has_stage(&self, stage: vk::ShaderStageFlags) -> bool {
        self.shaders.iter().any(|shader| shader.stage() == stage)
    }

    fn validate(&self, usage: PipelineUsage) -> VulkanResult<()> {
        for (index, shader) in self.shaders.iter().enumerate() {
            if self.shaders[..index].iter().any(|s| s.stage() == shader.stage()) {
                return Err(VulkanError::invalid(format!("{:?} stage given twice", shader.stage())));
            }
        }
        match usage {
            PipelineUsage::Graphics => {
                if !self.has_stage(vk::ShaderStageFlags::VERTEX) {
                    return Err(VulkanError::invalid("graphics pipeline needs a vertex shader"));
                }
                if self.has_stage(vk::ShaderStageFlags::COMPUTE) {
                    return Err(VulkanError::invalid("compute shader in a graphics pipeline"));
                }
            }
            PipelineUsage::Compute => {
                if self.shaders.len() != 1 || !self.has_stage(vk::ShaderStageFlags::COMPUTE) {
                    return Err(VulkanError::invalid("compute pipeline needs exactly one compute shader"));
                }
            }
            PipelineUsage::RayTracing => return Err(VulkanError::UnsupportedPipelineUsage),
        }
        if self.max_resource_sets == 0 {
            return Err(VulkanError::invalid("pipeline needs room for at least one resource set"));
        }
        Ok(())
    }

    fn resource_layout(&self) -> VulkanResult<ResourceLayout> {
        match &self.resources {
            ResourceLayoutSource::Explicit { bindings, push_constants } => {
                ResourceLayout::from_explicit(bindings, push_constants)
            }
            ResourceLayoutSource::Reflected => {
                ResourceLayout::from_reflections(self.shaders.iter().map(|s| (s.stage(), s.reflection())))
            }
        }
    }
}

/// Push-constant data pushed whenever the pipeline is bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBlock {
    /// Stages reading the block
    pub stages: vk::ShaderStageFlags,
    /// Byte offset
    pub offset: u32,
    /// Declared size
    pub size: u32,
    /// Last submitted data; empty until the first submission
    pub data: Vec<u8>,
}

/// Descriptor sets allocated together, one per set index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSet {
    sets: Vec<vk::DescriptorSet>,
}

impl ResourceSet {
    /// Descriptor sets in set-index order
    pub fn handles(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }
}

/// Pipeline with its layout, descriptor pool and stored specification
pub struct Pipeline {
    driver: Arc<dyn DeviceDriver>,
    usage: PipelineUsage,
    spec: PipelineSpecification,
    resource_layout: ResourceLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    pipeline: vk::Pipeline,
    compatibility: Option<RenderPassCompatibility>,
    constant_blocks: Vec<ConstantBlock>,
    live_sets: Vec<ResourceSet>,
}

impl Pipeline {
    /// Build a pipeline; graphics pipelines target `render_pass` at `extent`
    pub fn new(
        device: &Device,
        cache: &PipelineCache,
        spec: PipelineSpecification,
        usage: PipelineUsage,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        spec.validate(usage)?;
        let resource_layout = spec.resource_layout()?;

        let push_limit = device.adapter().limits.max_push_constants_size;
        if let Some(block) = resource_layout
            .push_constants()
            .iter()
            .find(|block| block.offset + block.size > push_limit)
        {
            return Err(VulkanError::invalid(format!(
                "push constant block {}+{} exceeds the device limit of {push_limit} bytes",
                block.offset, block.size
            )));
        }

        let constant_blocks = resource_layout
            .push_constants()
            .iter()
            .map(|block| ConstantBlock {
                stages: block.stages,
                offset: block.offset,
                size: block.size,
                data: Vec::new(),
            })
            .collect();

        let mut pipeline = Self {
            driver: Arc::clone(device.driver()),
            usage,
            spec,
            resource_layout,
            set_layouts: Vec::new(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            pipeline: vk::Pipeline::null(),
            compatibility: None,
            constant_blocks,
            live_sets: Vec::new(),
        };
        // Partially built objects are released by Drop on error
        pipeline.create_layouts()?;
        pipeline.pipeline = pipeline.create_gpu_pipeline(cache, render_pass, extent)?;
        if usage == PipelineUsage::Graphics {
            pipeline.compatibility = Some(render_pass.compatibility());
        }

        log::debug!(
            "Created {:?} pipeline: {} stages, {} resource sets",
            usage,
            pipeline.spec.shaders.len(),
            pipeline.resource_layout.set_count()
        );
        Ok(pipeline)
    }

    fn create_layouts(&mut self) -> VulkanResult<()> {
        for set in 0..self.resource_layout.set_count() {
            let layout = self
                .driver
                .create_descriptor_set_layout(&self.resource_layout.layout_bindings(set))?;
            self.set_layouts.push(layout);
        }
        self.pipeline_layout = self
            .driver
            .create_pipeline_layout(&self.set_layouts, &self.resource_layout.push_constant_ranges())?;

        if self.resource_layout.has_descriptors() {
            let capacity = self.spec.max_resource_sets;
            self.descriptor_pool = self.driver.create_descriptor_pool(
                capacity * self.set_layouts.len() as u32,
                &self.resource_layout.pool_sizes(capacity),
            )?;
        }
        Ok(())
    }

    fn create_gpu_pipeline(
        &self,
        cache: &PipelineCache,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Pipeline> {
        let modules: Vec<ShaderModule> = self
            .spec
            .shaders
            .iter()
            .map(|code| ShaderModule::with_driver(&self.driver, code))
            .collect::<VulkanResult<_>>()?;
        let stages: Vec<_> = modules.iter().map(ShaderModule::stage_desc).collect();

        match self.usage {
            PipelineUsage::Compute => {
                self.driver
                    .create_compute_pipeline(cache.handle(), self.pipeline_layout, &stages[0])
            }
            PipelineUsage::Graphics => {
                let spec = &self.spec;
                let tessellated = spec.has_stage(vk::ShaderStageFlags::TESSELLATION_CONTROL);
                let vertex_bindings = spec.vertex_layout.binding_descriptions();
                let vertex_attributes = spec.vertex_layout.attribute_descriptions()?;
                let blend = [spec.color_blend.attachment_state()];
                let depth = render_pass.has_depth() && spec.depth_stencil.test;

                self.driver.create_graphics_pipeline(
                    cache.handle(),
                    &GraphicsPipelineDesc {
                        layout: self.pipeline_layout,
                        render_pass: render_pass.handle(),
                        stages: &stages,
                        vertex_bindings: &vertex_bindings,
                        vertex_attributes: &vertex_attributes,
                        topology: if tessellated {
                            vk::PrimitiveTopology::PATCH_LIST
                        } else {
                            spec.topology
                        },
                        patch_control_points: tessellated.then_some(spec.patch_control_points),
                        viewport: vk::Viewport {
                            x: 0.0,
                            y: 0.0,
                            width: extent.width as f32,
                            height: extent.height as f32,
                            min_depth: 0.0,
                            max_depth: 1.0,
                        },
                        scissor: vk::Rect2D {
                            offset: vk::Offset2D::default(),
                            extent,
                        },
                        polygon_mode: spec.rasterizer.polygon_mode,
                        cull_mode: spec.rasterizer.cull_mode,
                        front_face: spec.rasterizer.front_face,
                        line_width: spec.rasterizer.line_width,
                        samples: render_pass.samples(),
                        sample_shading: spec.sample_shading,
                        depth_test: depth,
                        depth_write: depth && spec.depth_stencil.write,
                        depth_compare: spec.depth_stencil.compare,
                        blend_attachments: &blend,
                        dynamic_states: &spec.dynamic_states,
                    },
                )
            }
            PipelineUsage::RayTracing => Err(VulkanError::UnsupportedPipelineUsage),
        }
    }

    /// Rebuild the GPU pipeline for a new render pass or extent
    ///
    /// Layouts, the descriptor pool and allocated resource sets survive.
    pub fn recreate(&mut self, cache: &PipelineCache, render_pass: &RenderPass, extent: vk::Extent2D) -> VulkanResult<()> {
        let pipeline = self.create_gpu_pipeline(cache, render_pass, extent)?;
        self.driver.destroy_pipeline(self.pipeline);
        self.pipeline = pipeline;
        if self.usage == PipelineUsage::Graphics {
            self.compatibility = Some(render_pass.compatibility());
        }
        log::debug!("Recreated {:?} pipeline", self.usage);
        Ok(())
    }

    /// Whether the pipeline must be rebuilt to be used with `render_pass`
    pub fn needs_recreation(&self, render_pass: &RenderPass) -> bool {
        match &self.compatibility {
            Some(key) => *key != render_pass.compatibility(),
            None => false,
        }
    }

    /// Allocate one descriptor set per set index from the fixed pool
    pub fn allocate_resources(&mut self) -> VulkanResult<ResourceSet> {
        if self.descriptor_pool == vk::DescriptorPool::null() {
            return Err(VulkanError::invalid("pipeline has no resource bindings"));
        }
        let capacity = self.spec.max_resource_sets;
        if self.live_sets.len() as u32 >= capacity {
            return Err(VulkanError::DescriptorPoolExhausted { capacity });
        }
        let sets = self
            .driver
            .allocate_descriptor_sets(self.descriptor_pool, &self.set_layouts)
            .map_err(|e| match e {
                VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    VulkanError::DescriptorPoolExhausted { capacity }
                }
                other => other,
            })?;
        let set = ResourceSet { sets };
        self.live_sets.push(set.clone());
        Ok(set)
    }

    /// Return a resource set's capacity to the pool
    ///
    /// The caller must ensure no in-flight frame still uses the set.
    pub fn deallocate_resources(&mut self, set: &ResourceSet) -> VulkanResult<()> {
        let index = self
            .live_sets
            .iter()
            .position(|live| live == set)
            .ok_or(VulkanError::StaleHandle { kind: "resource set" })?;
        self.driver.free_descriptor_sets(self.descriptor_pool, &set.sets)?;
        self.live_sets.swap_remove(index);
        Ok(())
    }

    /// Write every binding of `set` in set and binding order
    ///
    /// Buffer bindings take the next entries of `buffers`, image bindings the
    /// next entries of `images`; arrayed bindings take one entry per element.
    /// Both lists must be consumed exactly.
    pub fn update(
        &self,
        set: &ResourceSet,
        buffers: &[&Buffer],
        images: &[vk::DescriptorImageInfo],
    ) -> VulkanResult<()> {
        if !self.live_sets.contains(set) {
            return Err(VulkanError::StaleHandle { kind: "resource set" });
        }
        let mut buffers = buffers.iter();
        let mut images = images.iter();
        let mut writes = Vec::new();

        for (set_index, bindings) in self.resource_layout.sets() {
            let target = set.sets[set_index as usize];
            for binding in bindings {
                let kind = binding.kind.to_vk();
                for array_element in 0..binding.count {
                    let resource = if binding.kind.is_buffer() {
                        let buffer = buffers.next().ok_or_else(|| {
                            VulkanError::invalid(format!("no buffer for binding {set_index}.{}", binding.binding))
                        })?;
                        if buffer.kind().descriptor_type() != Some(kind) {
                            return Err(VulkanError::invalid(format!(
                                "{:?} buffer bound to {:?} binding {set_index}.{}",
                                buffer.kind(),
                                binding.kind,
                                binding.binding
                            )));
                        }
                        DescriptorResource::Buffer(vk::DescriptorBufferInfo {
                            buffer: buffer.handle(),
                            offset: 0,
                            range: buffer.size(),
                        })
                    } else {
                        let image = images.next().ok_or_else(|| {
                            VulkanError::invalid(format!("no image for binding {set_index}.{}", binding.binding))
                        })?;
                        DescriptorResource::Image(*image)
                    };
                    writes.push(DescriptorWrite {
                        set: target,
                        binding: binding.binding,
                        array_element,
                        kind,
                        resource,
                    });
                }
            }
        }

        let unused = buffers.len() + images.len();
        if unused > 0 {
            return Err(VulkanError::invalid(format!("{unused} resources left over after the last binding")));
        }
        self.driver.update_descriptor_sets(&writes);
        Ok(())
    }

    /// Store push-constant data for block `block`, pushed at every bind
    pub fn submit_constant_data(&mut self, block: usize, data: &[u8]) -> VulkanResult<()> {
        let count = self.constant_blocks.len();
        let target = self
            .constant_blocks
            .get_mut(block)
            .ok_or_else(|| VulkanError::invalid(format!("constant block {block} out of range ({count} declared)")))?;
        if data.is_empty() || data.len() % 4 != 0 || data.len() > target.size as usize {
            return Err(VulkanError::invalid(format!(
                "{} bytes do not fit constant block {block} of {} bytes",
                data.len(),
                target.size
            )));
        }
        target.data.clear();
        target.data.extend_from_slice(data);
        Ok(())
    }

    /// Bind point usage
    pub fn usage(&self) -> PipelineUsage {
        self.usage
    }

    /// Vulkan bind point
    pub fn bind_point(&self) -> VulkanResult<vk::PipelineBindPoint> {
        self.usage.bind_point()
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Push-constant blocks with their stored data
    pub fn constant_blocks(&self) -> &[ConstantBlock] {
        &self.constant_blocks
    }

    /// Merged descriptor layout
    pub fn resource_layout(&self) -> &ResourceLayout {
        &self.resource_layout
    }

    /// Specification the pipeline was built from
    pub fn specification(&self) -> &PipelineSpecification {
        &self.spec
    }

    /// Resource sets currently allocated
    pub fn allocated_resources(&self) -> usize {
        self.live_sets.len()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.pipeline != vk::Pipeline::null() {
            self.driver.destroy_pipeline(self.pipeline);
        }
        if self.descriptor_pool != vk::DescriptorPool::null() {
            self.driver.destroy_descriptor_pool(self.descriptor_pool);
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            self.driver.destroy_pipeline_layout(self.pipeline_layout);
        }
        for layout in self.set_layouts.drain(..) {
            self.driver.destroy_descriptor_set_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::{DriverCall, HeadlessInstance};
    use crate::backend::initialization::device::tests::headless_device;
    use crate::backend::rendering::reflection::{ResourceKind, ShaderReflection};
    use crate::backend::rendering::render_pass::SubpassTag;
    use crate::backend::rendering::shader::test_spirv;
    use crate::backend::resources::buffer::BufferKind;
    use crate::backend::resources::memory::MemoryClass;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 640, height: 480 };

    struct Fixture {
        instance: HeadlessInstance,
        device: Device,
        cache: PipelineCache,
        render_pass: RenderPass,
    }

    fn fixture() -> Fixture {
        let (instance, device) = headless_device();
        let cache = PipelineCache::new(&device, &[]).unwrap();
        let render_pass = RenderPass::new(
            &device,
            &[SubpassTag::Swapchain, SubpassTag::Depth, SubpassTag::Color],
            vk::Format::B8G8R8A8_SRGB,
        )
        .unwrap();
        Fixture {
            instance,
            device,
            cache,
            render_pass,
        }
    }

    fn shader(stage: vk::ShaderStageFlags, reflection: ShaderReflection) -> ShaderCode {
        ShaderCode::from_bytes(stage, &test_spirv(), reflection).unwrap()
    }

    fn lit_spec() -> PipelineSpecification {
        let vertex = ShaderReflection::new()
            .with_binding(0, 0, ResourceKind::UniformBuffer, 1)
            .with_push_constant(0, 64);
        let fragment = ShaderReflection::new()
            .with_binding(0, 0, ResourceKind::UniformBuffer, 1)
            .with_binding(0, 1, ResourceKind::SampledImage, 1);
        PipelineSpecification::new(vec![
            shader(vk::ShaderStageFlags::VERTEX, vertex),
            shader(vk::ShaderStageFlags::FRAGMENT, fragment),
        ])
        .with_vertex_layout(VertexLayout::position_normal_uv())
        .with_max_resource_sets(2)
    }

    fn build(f: &Fixture, spec: PipelineSpecification, usage: PipelineUsage) -> VulkanResult<Pipeline> {
        Pipeline::new(&f.device, &f.cache, spec, usage, &f.render_pass, EXTENT)
    }

    #[test]
    fn test_specification_defaults() {
        let spec = PipelineSpecification::new(Vec::new());
        assert_eq!(spec.rasterizer.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(spec.rasterizer.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(spec.rasterizer.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(spec.depth_stencil, DepthStencilState::default());
        assert_eq!(spec.depth_stencil.compare, vk::CompareOp::LESS);
        assert_eq!(spec.color_blend, BlendMode::Opaque);
        assert_eq!(spec.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(spec.dynamic_states, vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
    }

    #[test]
    fn test_graphics_pipeline_merges_reflection() {
        let f = fixture();
        let pipeline = build(&f, lit_spec(), PipelineUsage::Graphics).unwrap();
        assert_eq!(pipeline.bind_point().unwrap(), vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(pipeline.resource_layout().set(0).len(), 2);
        assert_eq!(pipeline.constant_blocks().len(), 1);
        assert!(!pipeline.needs_recreation(&f.render_pass));
        assert!(f.instance.calls().contains(&DriverCall::CreateGraphicsPipeline));
        assert!(!f.cache.data().unwrap().is_empty());

        drop(pipeline);
        let leftovers: Vec<_> = f
            .instance
            .live_objects()
            .into_iter()
            .filter(|kind| !matches!(*kind, "pipeline cache" | "render pass" | "image" | "image view" | "memory"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_ray_tracing_is_unsupported() {
        let f = fixture();
        let result = build(&f, lit_spec(), PipelineUsage::RayTracing);
        assert!(matches!(result, Err(VulkanError::UnsupportedPipelineUsage)));
        assert!(PipelineUsage::RayTracing.bind_point().is_err());
    }

    #[test]
    fn test_stage_validation() {
        let f = fixture();
        let fragment_only =
            PipelineSpecification::new(vec![shader(vk::ShaderStageFlags::FRAGMENT, ShaderReflection::new())]);
        assert!(build(&f, fragment_only, PipelineUsage::Graphics).is_err());

        let compute = PipelineSpecification::new(vec![shader(
            vk::ShaderStageFlags::COMPUTE,
            ShaderReflection::new().with_binding(0, 0, ResourceKind::StorageBuffer, 1),
        )]);
        let pipeline = build(&f, compute.clone(), PipelineUsage::Compute).unwrap();
        assert_eq!(pipeline.bind_point().unwrap(), vk::PipelineBindPoint::COMPUTE);
        assert!(build(&f, compute, PipelineUsage::Graphics).is_err());
    }

    #[test]
    fn test_resource_pool_never_grows() {
        let f = fixture();
        let mut pipeline = build(&f, lit_spec(), PipelineUsage::Graphics).unwrap();
        let first = pipeline.allocate_resources().unwrap();
        let _second = pipeline.allocate_resources().unwrap();
        assert!(matches!(
            pipeline.allocate_resources(),
            Err(VulkanError::DescriptorPoolExhausted { capacity: 2 })
        ));

        pipeline.deallocate_resources(&first).unwrap();
        assert_eq!(pipeline.allocated_resources(), 1);
        assert!(pipeline.allocate_resources().is_ok());
        assert!(matches!(
            pipeline.deallocate_resources(&first),
            Err(VulkanError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_update_consumes_resources_in_binding_order() {
        let f = fixture();
        let mut pipeline = build(&f, lit_spec(), PipelineUsage::Graphics).unwrap();
        let set = pipeline.allocate_resources().unwrap();
        let uniform = Buffer::new(&f.device, BufferKind::Uniform, 64, MemoryClass::UPLOAD).unwrap();
        let storage = Buffer::new(&f.device, BufferKind::Storage, 64, MemoryClass::UPLOAD).unwrap();
        let image = vk::DescriptorImageInfo::default();

        pipeline.update(&set, &[&uniform], &[image]).unwrap();
        assert!(pipeline.update(&set, &[], &[image]).is_err(), "missing buffer");
        assert!(pipeline.update(&set, &[&storage], &[image]).is_err(), "wrong buffer kind");
        assert!(pipeline.update(&set, &[&uniform], &[image, image]).is_err(), "extra image");
        assert!(f.instance.violations().is_empty(), "{:?}", f.instance.violations());
    }

    #[test]
    fn test_constant_data_is_pushed_on_bind() {
        let f = fixture();
        let mut pipeline = build(&f, lit_spec(), PipelineUsage::Graphics).unwrap();
        assert!(pipeline.submit_constant_data(1, &[0; 16]).is_err());
        assert!(pipeline.submit_constant_data(0, &[0; 68]).is_err());
        pipeline.submit_constant_data(0, &[7; 64]).unwrap();
        assert_eq!(pipeline.constant_blocks()[0].data, vec![7; 64]);
        assert_eq!(pipeline.constant_blocks()[0].stages, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_oversized_push_constants_are_rejected() {
        let f = fixture();
        let spec = PipelineSpecification::new(vec![shader(
            vk::ShaderStageFlags::VERTEX,
            ShaderReflection::new().with_push_constant(0, 256),
        )]);
        assert!(matches!(
            build(&f, spec, PipelineUsage::Graphics),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(f.instance.violations().is_empty());
    }

    #[test]
    fn test_recreate_follows_render_pass() {
        let f = fixture();
        let mut pipeline = build(&f, lit_spec(), PipelineUsage::Graphics).unwrap();
        let set = pipeline.allocate_resources().unwrap();
        let single = RenderPass::new(&f.device, &[SubpassTag::Swapchain], vk::Format::B8G8R8A8_SRGB).unwrap();
        assert!(pipeline.needs_recreation(&single));

        let before = pipeline.handle();
        pipeline.recreate(&f.cache, &single, EXTENT).unwrap();
        assert_ne!(pipeline.handle(), before);
        assert!(!pipeline.needs_recreation(&single));
        assert_eq!(pipeline.allocated_resources(), 1, "resource sets survive recreation");
        assert!(pipeline.deallocate_resources(&set).is_ok());
        let pipelines = f.instance.live_objects().iter().filter(|kind| **kind == "pipeline").count();
        assert_eq!(pipelines, 1);
    }
}
