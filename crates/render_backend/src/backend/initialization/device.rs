//! Adapter selection and the logical device
//!
//! [`Device`] picks an adapter, creates the logical device through the
//! capability table and answers format, memory and sample-count queries for
//! the rest of the backend. Every component keeps its own clone of the
//! driver `Arc`, so the logical device is destroyed only after the last
//! dependent object has been dropped.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::instance::swapchain_extension_name;
use crate::backend::driver::{AdapterInfo, DeviceDriver, DeviceRequest, InstanceDriver, QueueFamilyIndices};
use crate::backend::resources::memory::{self, MemoryClass};
use crate::backend::{VulkanError, VulkanResult};
use crate::config::BackendConfig;

/// Depth formats in descending precision
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 2] = [vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT];

/// Logical device plus the adapter facts the backend needs
pub struct Device {
    driver: Arc<dyn DeviceDriver>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    msaa_samples: vk::SampleCountFlags,
    fence_timeout: Duration,
}

impl Device {
    /// Select an adapter and create the logical device on it
    pub fn initialize(instance: &dyn InstanceDriver, config: &BackendConfig) -> VulkanResult<Self> {
        config.validate()?;

        let adapters = instance.enumerate_adapters()?;
        let (adapter, queues) = select_adapter(&adapters, config)?;
        log::info!("Selected GPU: {} ({:?})", adapter.name, adapter.device_type);

        let supported = &adapter.features;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            sample_rate_shading: supported.sample_rate_shading,
            fill_mode_non_solid: supported.fill_mode_non_solid,
            tessellation_shader: supported.tessellation_shader,
            ..Default::default()
        };
        let request = DeviceRequest {
            queues,
            features,
            extensions: vec![swapchain_extension_name().to_string()],
        };

        let driver = instance.create_device(adapter, &request)?;
        Ok(Self::from_driver(driver, config))
    }

    /// Wrap an already created logical device
    pub fn from_driver(driver: Arc<dyn DeviceDriver>, config: &BackendConfig) -> Self {
        let memory_properties = driver.memory_properties();
        let max_samples = max_usable_sample_count(driver.adapter());
        let msaa_samples = clamp_sample_count(config.msaa_samples, max_samples);
        if msaa_samples.as_raw() != config.msaa_samples {
            log::warn!(
                "Requested {}x MSAA, using {}x (device maximum {}x)",
                config.msaa_samples,
                msaa_samples.as_raw(),
                max_samples.as_raw()
            );
        }

        Self {
            driver,
            memory_properties,
            msaa_samples,
            fence_timeout: config.fence_timeout(),
        }
    }

    /// Capability table of the logical device
    pub fn driver(&self) -> &Arc<dyn DeviceDriver> {
        &self.driver
    }

    /// The selected adapter
    pub fn adapter(&self) -> &AdapterInfo {
        self.driver.adapter()
    }

    /// Queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.driver.queue_families()
    }

    /// Graphics ("process") queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.driver.graphics_queue()
    }

    /// Present ("utility") queue
    pub fn present_queue(&self) -> vk::Queue {
        self.driver.present_queue()
    }

    /// Sample count used for multisampled attachments
    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    /// Upper bound on any single CPU wait for GPU work
    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    /// Highest sample count usable for both color and depth attachments
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_usable_sample_count(self.adapter())
    }

    /// Memory type index satisfying `type_bits` and `class`
    pub fn find_memory_type(&self, type_bits: u32, class: MemoryClass) -> VulkanResult<u32> {
        memory::find_memory_type(&self.memory_properties, type_bits, class).ok_or(VulkanError::NoSuitableMemoryType)
    }

    /// First candidate whose features under `tiling` include `features`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|format| {
                let properties = self.driver.format_properties(*format);
                let available = match tiling {
                    vk::ImageTiling::LINEAR => properties.linear_tiling_features,
                    _ => properties.optimal_tiling_features,
                };
                available.contains(features)
            })
            .ok_or(VulkanError::NoSupportedFormat)
    }

    /// Best supported depth-stencil attachment format
    pub fn depth_format(&self) -> VulkanResult<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Block until the device finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.driver.device_wait_idle()
    }

    /// Wait for outstanding work and release this handle to the logical device
    ///
    /// The device itself is destroyed once every object created from it is dropped.
    pub fn terminate(self) -> VulkanResult<()> {
        self.wait_idle()?;
        log::debug!("Terminating device {}", self.adapter().name);
        Ok(())
    }
}

/// Pick the best adapter satisfying the backend's requirements
///
/// Ranks discrete > integrated > virtual > cpu > other; ties keep enumeration
/// order. The error lists why every adapter was rejected.
pub fn select_adapter<'a>(
    adapters: &'a [AdapterInfo],
    config: &BackendConfig,
) -> VulkanResult<(&'a AdapterInfo, QueueFamilyIndices)> {
    let mut rejections = Vec::new();
    let mut best: Option<(&AdapterInfo, QueueFamilyIndices, u32)> = None;

    for adapter in adapters {
        match evaluate_adapter(adapter, config) {
            Ok(queues) => {
                let rank = type_rank(adapter.device_type);
                if best.map(|(_, _, best_rank)| rank < best_rank).unwrap_or(true) {
                    best = Some((adapter, queues, rank));
                }
            }
            Err(reason) => {
                log::debug!("Rejected GPU {}: {reason}", adapter.name);
                rejections.push(format!("{}: {reason}", adapter.name));
            }
        }
    }

    match best {
        Some((adapter, queues, _)) => Ok((adapter, queues)),
        None if rejections.is_empty() => Err(VulkanError::DeviceUnavailable {
            reason: "no adapters reported".to_string(),
        }),
        None => Err(VulkanError::DeviceUnavailable {
            reason: rejections.join("; "),
        }),
    }
}

fn evaluate_adapter(adapter: &AdapterInfo, config: &BackendConfig) -> Result<QueueFamilyIndices, String> {
    let graphics = adapter
        .queue_families
        .iter()
        .position(|family| family.queue_count > 0 && family.flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or("no graphics queue family")? as u32;

    let present = if adapter.queue_families[graphics as usize].present_support {
        graphics
    } else {
        adapter
            .queue_families
            .iter()
            .position(|family| family.queue_count > 0 && family.present_support)
            .ok_or("no queue family can present to the surface")? as u32
    };

    if !adapter.supports_extension(swapchain_extension_name()) {
        return Err("swapchain extension not supported".to_string());
    }
    if config.require_sampler_anisotropy && adapter.features.sampler_anisotropy != vk::TRUE {
        return Err("sampler anisotropy not supported".to_string());
    }

    Ok(QueueFamilyIndices { graphics, present })
}

fn type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

/// Highest single sample count in both the color and depth limits
pub fn max_usable_sample_count(adapter: &AdapterInfo) -> vk::SampleCountFlags {
    let counts = adapter.limits.framebuffer_color_sample_counts & adapter.limits.framebuffer_depth_sample_counts;
    highest_sample_count(counts)
}

fn highest_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|flag| counts.contains(*flag))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Requested sample count lowered to what the device allows
pub fn clamp_sample_count(requested: u32, max: vk::SampleCountFlags) -> vk::SampleCountFlags {
    let requested = requested.max(1).min(max.as_raw().max(1));
    // Flag bits equal the sample counts, so the highest set bit is a valid count
    highest_sample_count(vk::SampleCountFlags::from_raw(1 << (31 - requested.leading_zeros())))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::driver::headless::{DriverCall, HeadlessInstance, HeadlessProfile};

    /// Device on the default headless profile
    pub(crate) fn headless_device() -> (HeadlessInstance, Device) {
        let instance = HeadlessInstance::default();
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        (instance, device)
    }

    fn adapter(name: &str, device_type: vk::PhysicalDeviceType) -> AdapterInfo {
        HeadlessProfile::adapter(name, device_type)
    }

    #[test]
    fn test_prefers_discrete_over_integrated() {
        let adapters = vec![
            adapter("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            adapter("discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
            adapter("second discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        let (chosen, queues) = select_adapter(&adapters, &BackendConfig::default()).unwrap();
        assert_eq!(chosen.name, "discrete");
        assert_eq!(queues, QueueFamilyIndices { graphics: 0, present: 0 });
    }

    #[test]
    fn test_rejects_adapter_without_anisotropy() {
        let mut weak = adapter("weak", vk::PhysicalDeviceType::DISCRETE_GPU);
        weak.features.sampler_anisotropy = vk::FALSE;

        let err = select_adapter(std::slice::from_ref(&weak), &BackendConfig::default()).unwrap_err();
        match err {
            VulkanError::DeviceUnavailable { reason } => assert!(reason.contains("anisotropy")),
            other => panic!("unexpected error {other:?}"),
        }

        let mut relaxed = BackendConfig::default();
        relaxed.require_sampler_anisotropy = false;
        assert!(select_adapter(std::slice::from_ref(&weak), &relaxed).is_ok());
    }

    #[test]
    fn test_split_present_family() {
        let mut split = adapter("split", vk::PhysicalDeviceType::DISCRETE_GPU);
        split.queue_families[0].present_support = false;
        split.queue_families.push(crate::backend::driver::QueueFamilyInfo {
            flags: vk::QueueFlags::TRANSFER,
            queue_count: 1,
            present_support: true,
        });

        let (_, queues) = select_adapter(std::slice::from_ref(&split), &BackendConfig::default()).unwrap();
        assert_eq!(queues, QueueFamilyIndices { graphics: 0, present: 1 });
        assert_eq!(queues.unique(), vec![0, 1]);
    }

    #[test]
    fn test_no_adapters_is_unavailable() {
        let err = select_adapter(&[], &BackendConfig::default()).unwrap_err();
        assert!(matches!(err, VulkanError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_depth_format_search() {
        let (_, device) = headless_device();
        assert_eq!(device.depth_format().unwrap(), vk::Format::D32_SFLOAT_S8_UINT);

        let instance = HeadlessInstance::new(
            HeadlessProfile::default().with_depth_formats(vec![vk::Format::D24_UNORM_S8_UINT]),
        );
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        assert_eq!(device.depth_format().unwrap(), vk::Format::D24_UNORM_S8_UINT);

        let instance = HeadlessInstance::new(HeadlessProfile::default().with_depth_formats(Vec::new()));
        let device = Device::initialize(&instance, &BackendConfig::default()).unwrap();
        assert!(matches!(device.depth_format(), Err(VulkanError::NoSupportedFormat)));
    }

    #[test]
    fn test_sample_count_clamping() {
        let (_, device) = headless_device();
        assert_eq!(device.max_usable_sample_count(), vk::SampleCountFlags::TYPE_8);
        assert_eq!(device.msaa_samples(), vk::SampleCountFlags::TYPE_4);

        assert_eq!(clamp_sample_count(16, vk::SampleCountFlags::TYPE_8), vk::SampleCountFlags::TYPE_8);
        assert_eq!(clamp_sample_count(1, vk::SampleCountFlags::TYPE_8), vk::SampleCountFlags::TYPE_1);
        assert_eq!(clamp_sample_count(4, vk::SampleCountFlags::TYPE_1), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_memory_type_lookup() {
        let (_, device) = headless_device();
        assert_eq!(device.find_memory_type(0b111, MemoryClass::DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(device.find_memory_type(0b111, MemoryClass::UPLOAD).unwrap(), 1);
        assert!(matches!(
            device.find_memory_type(0b001, MemoryClass::HOST_VISIBLE),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_terminate_waits_for_idle() {
        let (instance, device) = headless_device();
        device.terminate().unwrap();
        assert_eq!(instance.calls().last(), Some(&DriverCall::DeviceWaitIdle));
    }
}
