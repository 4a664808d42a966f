//! GPU resource primitives
//!
//! Buffers, images, views, samplers and textures are RAII wrappers that
//! destroy themselves through the driver when dropped. The [`arena`] hands
//! out generation-checked handles so higher layers never hold references
//! across swapchain recreation.

pub mod arena;
pub mod buffer;
pub mod image;
pub mod memory;
pub mod texture;
