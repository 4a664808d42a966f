//! Backend error types

use ash::vk;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Vulkan backend errors
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// No adapter satisfies the backend's requirements
    #[error("No suitable GPU: {reason}")]
    DeviceUnavailable {
        /// Every rejection, one per adapter
        reason: String,
    },

    /// The requested subpass tags cannot be expressed as a render pass
    #[error("Unsupported render pass configuration: {reason}")]
    UnsupportedRenderPassConfiguration {
        /// What made the tag list invalid
        reason: String,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// None of the candidate formats is supported
    #[error("No supported format among the candidates")]
    NoSupportedFormat,

    /// A fence wait exceeded its bound
    #[error("GPU did not signal within {waited:?}")]
    Timeout {
        /// How long the CPU waited
        waited: Duration,
    },

    /// The swapchain no longer matches the surface and must be recreated
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// A pipeline's resource-set pool has no free sets left
    #[error("Descriptor pool exhausted ({capacity} sets)")]
    DescriptorPoolExhausted {
        /// Sets the pool was sized for
        capacity: u32,
    },

    /// A handle refers to a destroyed or replaced object
    #[error("Stale {kind} handle")]
    StaleHandle {
        /// Kind of object the handle named
        kind: &'static str,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The pipeline bind point is not implemented
    #[error("Unsupported pipeline usage")]
    UnsupportedPipelineUsage,

    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// File IO (pipeline cache, shaders)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VulkanError {
    /// Shorthand for [`VulkanError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Whether the frame loop can continue after recreating the swapchain
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SwapchainOutOfDate | Self::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
