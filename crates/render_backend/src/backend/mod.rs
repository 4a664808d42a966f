//! Vulkan rendering backend
//!
//! Components are layered bottom-up: the [`driver`] capability table, then
//! [`initialization`], [`resources`], [`rendering`] and [`state`], with the
//! [`renderer::Renderer`] orchestrating them per frame.

pub mod driver;
pub mod error;
pub mod initialization;
pub mod renderer;
pub mod rendering;
pub mod resources;
pub mod state;

pub use error::{VulkanError, VulkanResult};

// Re-export commonly used types
pub use driver::headless::{Fault, HeadlessInstance, HeadlessProfile};
pub use initialization::{device::Device, instance::VulkanInstance, window::Window};
pub use renderer::{DispatchItem, DrawItem, DrawList, FrameOutcome, FrameStats, MipLevels, PipelineHandle, Renderer};
pub use rendering::{
    pipeline::{BlendMode, DepthStencilState, Pipeline, PipelineSpecification, PipelineUsage, RasterizerState, ResourceSet},
    reflection::{PushConstantBlock, ResourceBinding, ResourceKind, ShaderReflection},
    render_pass::SubpassTag,
    shader::ShaderCode,
    vertex_layout::{AttributeFormat, AttributeSemantic, VertexAttribute, VertexLayout},
};
