//! Render passes, framebuffers, pipelines and command recording
//!
//! Pipelines are built from a stored [`pipeline::PipelineSpecification`] so
//! they can be rebuilt when a swapchain rebuild changes the render pass.

pub mod commands;
pub mod framebuffer;
pub mod pipeline;
pub mod pipeline_cache;
pub mod reflection;
pub mod render_pass;
pub mod shader;
pub mod vertex_layout;
