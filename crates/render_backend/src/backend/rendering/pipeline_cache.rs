//! Pipeline cache persistence
//!
//! The blob is opaque to the backend; the driver validates it and silently
//! ignores data from a different device or driver version.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use crate::backend::driver::DeviceDriver;
use crate::backend::initialization::device::Device;
use crate::backend::VulkanResult;

/// Pipeline cache wrapper with RAII cleanup
pub struct PipelineCache {
    driver: Arc<dyn DeviceDriver>,
    cache: vk::PipelineCache,
}

impl PipelineCache {
    /// Create a cache seeded with `initial` (may be empty)
    pub fn new(device: &Device, initial: &[u8]) -> VulkanResult<Self> {
        let driver = Arc::clone(device.driver());
        let cache = driver.create_pipeline_cache(initial)?;
        Ok(Self { driver, cache })
    }

    /// Seed from a file; a missing file yields an empty cache
    pub fn load(device: &Device, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let initial = match std::fs::read(path) {
            Ok(bytes) => {
                log::info!("Loaded pipeline cache: {} bytes from {}", bytes.len(), path.display());
                bytes
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No pipeline cache at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        Self::new(device, &initial)
    }

    /// Current contents of the cache
    pub fn data(&self) -> VulkanResult<Vec<u8>> {
        self.driver.pipeline_cache_data(self.cache)
    }

    /// Write the current contents to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> VulkanResult<()> {
        let path = path.as_ref();
        let data = self.data()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &data)?;
        log::info!("Saved pipeline cache: {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    /// Cache handle
    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.driver.destroy_pipeline_cache(self.cache);
    }
}
