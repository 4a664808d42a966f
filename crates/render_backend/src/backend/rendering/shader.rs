//! SPIR-V shader code and modules

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::reflection::ShaderReflection;
use crate::backend::driver::{DeviceDriver, ShaderStageDesc};
use crate::backend::initialization::device::Device;
use crate::backend::{VulkanError, VulkanResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Compiled shader for one stage, with the resources it uses
#[derive(Debug, Clone)]
pub struct ShaderCode {
    stage: vk::ShaderStageFlags,
    words: Vec<u32>,
    entry_point: String,
    reflection: ShaderReflection,
}

impl ShaderCode {
    /// Validate SPIR-V bytes for `stage`
    pub fn from_bytes(stage: vk::ShaderStageFlags, bytes: &[u8], reflection: ShaderReflection) -> VulkanResult<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(VulkanError::invalid(format!(
                "SPIR-V length {} is not a non-zero multiple of 4",
                bytes.len()
            )));
        }
        if stage.as_raw().count_ones() != 1 {
            return Err(VulkanError::invalid(format!("shader code needs exactly one stage, got {stage:?}")));
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if words[0] != SPIRV_MAGIC {
            return Err(VulkanError::invalid(format!("bad SPIR-V magic {:#010x}", words[0])));
        }

        log::debug!("Loaded {:?} shader: {} words", stage, words.len());
        Ok(Self {
            stage,
            words,
            entry_point: "main".to_string(),
            reflection,
        })
    }

    /// Read SPIR-V from a file
    pub fn from_file(
        stage: vk::ShaderStageFlags,
        path: impl AsRef<Path>,
        reflection: ShaderReflection,
    ) -> VulkanResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading shader from {}", path.display());
        let bytes = std::fs::read(path)?;
        Self::from_bytes(stage, &bytes, reflection)
    }

    /// Use a different entry point than `main`
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Pipeline stage
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    /// SPIR-V words
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Entry point name
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Resources the stage reads
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

/// Shader module wrapper; destroyed on drop
pub struct ShaderModule {
    driver: Arc<dyn DeviceDriver>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: String,
}

impl ShaderModule {
    /// Create a module from validated code
    pub fn new(device: &Device, code: &ShaderCode) -> VulkanResult<Self> {
        Self::with_driver(device.driver(), code)
    }

    pub(crate) fn with_driver(driver: &Arc<dyn DeviceDriver>, code: &ShaderCode) -> VulkanResult<Self> {
        let driver = Arc::clone(driver);
        let module = driver.create_shader_module(code.words())?;
        Ok(Self {
            driver,
            module,
            stage: code.stage(),
            entry_point: code.entry_point().to_string(),
        })
    }

    /// Stage description for pipeline creation
    pub fn stage_desc(&self) -> ShaderStageDesc {
        ShaderStageDesc {
            stage: self.stage,
            module: self.module,
            entry_point: self.entry_point.clone(),
        }
    }

    /// Get the shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.driver.destroy_shader_module(self.module);
    }
}

/// Smallest valid-looking SPIR-V: magic, version, generator, bound, schema
#[cfg(test)]
pub(crate) fn test_spirv() -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}
