//! Memory-type classification and device memory allocations

use ash::vk;
use bitflags::bitflags;
use std::sync::Arc;

use crate::backend::driver::DeviceDriver;
use crate::backend::initialization::device::Device;
use crate::backend::VulkanResult;

bitflags! {
    /// Where an allocation lives and how the CPU may touch it
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryClass: u32 {
        /// Fast GPU memory, not necessarily CPU-visible
        const DEVICE_LOCAL = 1 << 0;
        /// CPU-mappable
        const HOST_VISIBLE = 1 << 1;
        /// CPU writes need no explicit flush
        const HOST_COHERENT = 1 << 2;
        /// Staging and per-frame uploads
        const UPLOAD = Self::HOST_VISIBLE.bits() | Self::HOST_COHERENT.bits();
    }
}

impl MemoryClass {
    /// Equivalent Vulkan property flags
    pub fn to_vk(self) -> vk::MemoryPropertyFlags {
        let mut flags = vk::MemoryPropertyFlags::empty();
        if self.contains(Self::DEVICE_LOCAL) {
            flags |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
        }
        if self.contains(Self::HOST_VISIBLE) {
            flags |= vk::MemoryPropertyFlags::HOST_VISIBLE;
        }
        if self.contains(Self::HOST_COHERENT) {
            flags |= vk::MemoryPropertyFlags::HOST_COHERENT;
        }
        flags
    }
}

/// First memory type allowed by `type_bits` whose properties cover `class`
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    class: MemoryClass,
) -> Option<u32> {
    let wanted = class.to_vk();
    (0..properties.memory_type_count).find(|&index| {
        type_bits & (1 << index) != 0
            && properties.memory_types[index as usize]
                .property_flags
                .contains(wanted)
    })
}

/// A device memory block, freed on drop
pub struct Allocation {
    driver: Arc<dyn DeviceDriver>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    class: MemoryClass,
}

impl Allocation {
    /// Allocate memory satisfying `requirements` in a type matching `class`
    pub fn new(device: &Device, requirements: vk::MemoryRequirements, class: MemoryClass) -> VulkanResult<Self> {
        let type_index = device.find_memory_type(requirements.memory_type_bits, class)?;
        let driver = Arc::clone(device.driver());
        let memory = driver.allocate_memory(requirements.size, type_index)?;
        Ok(Self {
            driver,
            memory,
            size: requirements.size,
            class,
        })
    }

    /// Memory handle
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Allocated bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Requested memory class
    pub fn class(&self) -> MemoryClass {
        self.class
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.driver.free_memory(self.memory);
    }
}
