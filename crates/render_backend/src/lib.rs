//! # render_backend
//!
//! Vulkan GPU backend for a real-time 3D engine: device selection, swapchain
//! management, render passes, pipelines with resource sets, and frame pacing
//! with a bounded number of frames in flight.
//!
//! ```rust,no_run
//! use render_backend::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     render_backend::foundation::logging::init();
//!     let mut window = Window::new("demo", 800, 600)?;
//!     let config = BackendConfig::default();
//!     let instance = VulkanInstance::new(&mut window, &config)?;
//!     let mut renderer = Renderer::new(
//!         &instance,
//!         config,
//!         window.framebuffer_extent(),
//!         &[SubpassTag::Swapchain, SubpassTag::Depth],
//!     )?;
//!     renderer.draw_frame(&DrawList::new())?;
//!     renderer.shutdown()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod foundation;

/// Commonly used types
pub mod prelude {
    pub use crate::backend::{
        DispatchItem, DrawItem, DrawList, FrameOutcome, MipLevels, PipelineHandle, PipelineSpecification, PipelineUsage, Renderer,
        ShaderCode, ShaderReflection, SubpassTag, VulkanError, VulkanInstance, VulkanResult, Window,
    };
    pub use crate::config::{BackendConfig, Config, PresentMode};
}
