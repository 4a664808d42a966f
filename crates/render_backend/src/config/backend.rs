//! # Backend Configuration
//!
//! Settings consumed by device initialization and threaded through every
//! subordinate component (swapchain, render pass, pipelines, frame pacing).

use ash::vk;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::{Config, ConfigError};

/// Presentation mode requested from the swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    /// Vertical sync; always available
    Fifo,
    /// Vertical sync that tears when a frame is late
    FifoRelaxed,
    /// Triple-buffered, newest image wins
    Mailbox,
    /// No synchronization with the display; may tear
    Immediate,
    /// Lowest latency the surface offers: mailbox, then immediate, then fifo
    Adaptive,
}

impl PresentMode {
    /// The exact Vulkan mode this request names, `None` for [`PresentMode::Adaptive`]
    pub fn to_vk(self) -> Option<vk::PresentModeKHR> {
        match self {
            Self::Fifo => Some(vk::PresentModeKHR::FIFO),
            Self::FifoRelaxed => Some(vk::PresentModeKHR::FIFO_RELAXED),
            Self::Mailbox => Some(vk::PresentModeKHR::MAILBOX),
            Self::Immediate => Some(vk::PresentModeKHR::IMMEDIATE),
            Self::Adaptive => None,
        }
    }
}

/// Lowest validation-layer severity forwarded to the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSeverity {
    /// Diagnostic chatter
    Verbose,
    /// Informational messages
    Info,
    /// Likely misuse
    Warning,
    /// Vulkan API usage violations
    Error,
}

impl ValidationSeverity {
    /// Severity mask covering this level and everything above it
    pub fn message_mask(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        let mut mask = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        if self <= Self::Warning {
            mask |= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
        }
        if self <= Self::Info {
            mask |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
        }
        if self <= Self::Verbose {
            mask |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
        }
        mask
    }
}

/// # Backend Configuration
///
/// Application metadata, frame pacing and quality settings for the Vulkan
/// backend. Loaded from TOML/RON through [`Config`] or built in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_validation: Option<bool>,
    /// Lowest validation severity routed to the logger
    pub validation_severity: ValidationSeverity,
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Requested presentation mode
    pub present_mode: PresentMode,
    /// Requested MSAA sample count, clamped to what the device supports
    pub msaa_samples: u32,
    /// Upper bound on a single fence wait, in milliseconds
    pub fence_timeout_ms: u64,
    /// Clear color for the presentable attachment
    pub clear_color: [f32; 4],
    /// Reject adapters without anisotropic sampling
    pub require_sampler_anisotropy: bool,
    /// Where the pipeline cache blob is loaded from and saved to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_cache_path: Option<PathBuf>,
    /// Descriptor sets each pipeline's resource pool can hand out
    pub max_resource_sets: u32,
}

impl BackendConfig {
    /// Create a new backend configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            enable_validation: None,
            validation_severity: ValidationSeverity::Warning,
            frames_in_flight: 2,
            present_mode: PresentMode::Fifo,
            msaa_samples: 4,
            fence_timeout_ms: 5_000,
            clear_color: [2.0 / 255.0, 8.0 / 255.0, 32.0 / 255.0, 1.0],
            require_sampler_anisotropy: true,
            pipeline_cache_path: None,
            max_resource_sets: 16,
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the requested present mode
    pub fn with_present_mode(mut self, mode: PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the requested MSAA sample count
    pub fn with_msaa_samples(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    /// Set the fence wait bound
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Persist the pipeline cache at this path
    pub fn with_pipeline_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_cache_path = Some(path.into());
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Fence wait bound as a duration
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if !(1..=8).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "Frames in flight must be within 1..=8, got {}",
                self.frames_in_flight
            )));
        }

        if !self.msaa_samples.is_power_of_two() || self.msaa_samples > 64 {
            return Err(ConfigError::Invalid(format!(
                "MSAA sample count must be a power of two up to 64, got {}",
                self.msaa_samples
            )));
        }

        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Fence timeout must be non-zero".to_string()));
        }

        if self.max_resource_sets == 0 {
            return Err(ConfigError::Invalid("Resource pools need at least one set".to_string()));
        }

        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new("Render Backend Application")
    }
}

impl Config for BackendConfig {}
