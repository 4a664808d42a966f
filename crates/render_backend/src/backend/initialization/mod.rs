//! Vulkan initialization: instance, window surface and logical device

pub mod device;
pub mod instance;
pub mod window;
