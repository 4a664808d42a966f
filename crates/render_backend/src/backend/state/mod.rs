//! Presentation and frame-pacing state: swapchain, sync objects, frame slots

pub mod frame;
pub mod swapchain;
pub mod sync;
