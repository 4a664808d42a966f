//! Vulkan instance, validation messenger and window surface

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Entry, Instance};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use super::window::Window;
use crate::backend::driver::vulkan::VulkanDeviceDriver;
use crate::backend::driver::{AdapterInfo, AdapterLimits, DeviceDriver, DeviceRequest, InstanceDriver, QueueFamilyInfo};
use crate::backend::{VulkanError, VulkanResult};
use crate::config::BackendConfig;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Instance-level objects shared by every device created from the instance
pub(crate) struct InstanceShared {
    _entry: Entry,
    pub(crate) instance: Instance,
    pub(crate) surface_loader: Surface,
    pub(crate) surface: vk::SurfaceKHR,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Vulkan instance bound to a window surface
pub struct VulkanInstance {
    shared: Arc<InstanceShared>,
}

impl VulkanInstance {
    /// Create an instance, optionally with validation, and a surface for `window`
    pub fn new(window: &mut Window, config: &BackendConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| VulkanError::InitializationFailed("Application name contains a NUL byte".to_string()))?;
        let engine_name = CString::new("render_backend")
            .map_err(|_| VulkanError::InitializationFailed("Engine name contains a NUL byte".to_string()))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let required_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}")))?;
        let extension_names = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;
        let mut extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let validation = config.validation_enabled() && Self::validation_layer_available(&entry);
        if config.validation_enabled() && !validation {
            log::warn!("{VALIDATION_LAYER} requested but not installed; continuing without validation");
        }

        let layer_name = CString::new(VALIDATION_LAYER)
            .map_err(|_| VulkanError::InitializationFailed("Invalid layer name".to_string()))?;
        let mut layer_ptrs: Vec<*const c_char> = Vec::new();
        if validation {
            extension_ptrs.push(DebugUtils::name().as_ptr());
            layer_ptrs.push(layer_name.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils, config)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        let surface = match window.create_vulkan_surface(instance.handle()) {
            Ok(surface) => surface,
            Err(e) => {
                unsafe {
                    if let Some((debug_utils, messenger)) = &debug {
                        debug_utils.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(VulkanError::InitializationFailed(e.to_string()));
            }
        };

        log::info!("Vulkan instance created (validation {})", if validation { "on" } else { "off" });

        Ok(Self {
            shared: Arc::new(InstanceShared {
                _entry: entry,
                instance,
                surface_loader,
                surface,
                debug,
            }),
        })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() };
        layers
            .map(|layers| {
                layers.iter().any(|layer| {
                    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    name.to_str().map(|n| n == VALIDATION_LAYER).unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils, config: &BackendConfig) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(config.validation_severity.message_mask())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Raw instance handle
    pub fn handle(&self) -> vk::Instance {
        self.shared.instance.handle()
    }

    fn describe_adapter(&self, device: vk::PhysicalDevice) -> VulkanResult<AdapterInfo> {
        let instance = &self.shared.instance;
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut queue_families = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let present_support = unsafe {
                self.shared
                    .surface_loader
                    .get_physical_device_surface_support(device, index as u32, self.shared.surface)
                    .map_err(VulkanError::Api)?
            };
            queue_families.push(QueueFamilyInfo {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present_support,
            });
        }

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        }
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect();

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Ok(AdapterInfo {
            handle: device,
            name,
            device_type: properties.device_type,
            features,
            limits: AdapterLimits {
                framebuffer_color_sample_counts: properties.limits.framebuffer_color_sample_counts,
                framebuffer_depth_sample_counts: properties.limits.framebuffer_depth_sample_counts,
                max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
                max_push_constants_size: properties.limits.max_push_constants_size,
            },
            queue_families,
            extensions,
        })
    }
}

impl InstanceDriver for VulkanInstance {
    fn enumerate_adapters(&self) -> VulkanResult<Vec<AdapterInfo>> {
        let devices = unsafe {
            self.shared
                .instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };
        devices.into_iter().map(|device| self.describe_adapter(device)).collect()
    }

    fn create_device(&self, adapter: &AdapterInfo, request: &DeviceRequest) -> VulkanResult<Arc<dyn DeviceDriver>> {
        let driver = VulkanDeviceDriver::new(Arc::clone(&self.shared), adapter, request)?;
        Ok(Arc::new(driver))
    }
}

/// Name of the swapchain device extension
pub fn swapchain_extension_name() -> &'static str {
    SwapchainLoader::name().to_str().unwrap_or("VK_KHR_swapchain")
}

/// Log level for a validation message severity
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    }
}

/// Validation messages go to the logger and never abort the call
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    log::log!(target: "vulkan", severity_level(message_severity), "{message_type:?} - {message}");

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_routing() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::VERBOSE), log::Level::Trace);
        assert_eq!(severity_level(S::INFO), log::Level::Info);
        assert_eq!(severity_level(S::WARNING), log::Level::Warn);
        assert_eq!(severity_level(S::ERROR), log::Level::Error);
    }

    #[test]
    fn test_swapchain_extension_name() {
        assert_eq!(swapchain_extension_name(), "VK_KHR_swapchain");
    }
}
