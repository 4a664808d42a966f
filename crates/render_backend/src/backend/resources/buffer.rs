//! Buffer management for vertex, index, uniform and staging data
//!
//! CPU access maps, copies and unmaps within a single call, so no buffer
//! stays mapped while the GPU may read it.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::memory::{Allocation, MemoryClass};
use crate::backend::driver::DeviceDriver;
use crate::backend::initialization::device::Device;
use crate::backend::rendering::commands::CommandPool;
use crate::backend::{VulkanError, VulkanResult};

/// What a buffer is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// CPU-written source of transfers
    Staging,
    /// Vertex attributes
    Vertex,
    /// Vertex indices
    Index,
    /// Uniform data read by shaders
    Uniform,
    /// Storage data read and written by shaders
    Storage,
    /// Indirect draw parameters
    Indirect,
}

impl BufferKind {
    /// Usage flags; every kind can also be a transfer destination
    pub fn usage(self) -> vk::BufferUsageFlags {
        let usage = match self {
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            Self::Indirect => vk::BufferUsageFlags::INDIRECT_BUFFER,
        };
        usage | vk::BufferUsageFlags::TRANSFER_DST
    }

    /// Descriptor type when bound as a shader resource
    pub fn descriptor_type(self) -> Option<vk::DescriptorType> {
        match self {
            Self::Uniform => Some(vk::DescriptorType::UNIFORM_BUFFER),
            Self::Storage => Some(vk::DescriptorType::STORAGE_BUFFER),
            _ => None,
        }
    }
}

/// Width of the indices in an index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

impl IndexWidth {
    /// Bytes per index
    pub fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Vulkan index type
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            Self::U16 => vk::IndexType::UINT16,
            Self::U32 => vk::IndexType::UINT32,
        }
    }
}

/// A buffer and the memory backing it
pub struct Buffer {
    driver: Arc<dyn DeviceDriver>,
    buffer: vk::Buffer,
    allocation: Allocation,
    kind: BufferKind,
    size: vk::DeviceSize,
    element_count: u32,
    index_width: Option<IndexWidth>,
}

impl Buffer {
    /// Create a buffer of `size` bytes in memory of `class`
    pub fn new(device: &Device, kind: BufferKind, size: vk::DeviceSize, class: MemoryClass) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::invalid("buffer size must be non-zero"));
        }
        let driver = Arc::clone(device.driver());
        let buffer = driver.create_buffer(size, kind.usage())?;

        let requirements = driver.buffer_memory_requirements(buffer);
        let allocation = match Allocation::new(device, requirements, class) {
            Ok(allocation) => allocation,
            Err(e) => {
                driver.destroy_buffer(buffer);
                return Err(e);
            }
        };
        if let Err(e) = driver.bind_buffer_memory(buffer, allocation.handle(), 0) {
            driver.destroy_buffer(buffer);
            return Err(e);
        }

        log::trace!("Created {kind:?} buffer of {size} bytes ({class:?})");
        Ok(Self {
            driver,
            buffer,
            allocation,
            kind,
            size,
            element_count: 0,
            index_width: None,
        })
    }

    /// Upload `count` vertices of `stride` bytes into device-local memory
    pub fn vertex_from_bytes(
        device: &Device,
        pool: &CommandPool,
        bytes: &[u8],
        stride: usize,
        count: u32,
    ) -> VulkanResult<Self> {
        if stride == 0 || bytes.len() != stride * count as usize {
            return Err(VulkanError::invalid(format!(
                "{} vertex bytes do not hold {count} vertices of {stride} bytes",
                bytes.len()
            )));
        }
        let mut buffer = Self::upload(device, pool, BufferKind::Vertex, bytes)?;
        buffer.element_count = count;
        Ok(buffer)
    }

    /// Upload `count` indices of `width` into device-local memory
    pub fn index_from_bytes(
        device: &Device,
        pool: &CommandPool,
        bytes: &[u8],
        width: IndexWidth,
        count: u32,
    ) -> VulkanResult<Self> {
        if bytes.len() != width.size() * count as usize {
            return Err(VulkanError::invalid(format!(
                "{} index bytes do not hold {count} {width:?} indices",
                bytes.len()
            )));
        }
        let mut buffer = Self::upload(device, pool, BufferKind::Index, bytes)?;
        buffer.element_count = count;
        buffer.index_width = Some(width);
        Ok(buffer)
    }

    fn upload(device: &Device, pool: &CommandPool, kind: BufferKind, bytes: &[u8]) -> VulkanResult<Self> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = Self::new(device, BufferKind::Staging, size, MemoryClass::UPLOAD)?;
        staging.set_data(0, bytes)?;

        let target = Self::new(device, kind, size, MemoryClass::DEVICE_LOCAL)?;
        target.copy_from(pool, &staging, size, 0, 0)?;
        Ok(target)
    }

    /// Write `bytes` at `offset`
    pub fn set_data(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        self.check_host_access()?;
        self.check_range(offset, bytes.len() as vk::DeviceSize)?;
        self.driver.write_memory(self.allocation.handle(), offset, bytes)?;
        if !self.allocation.class().contains(MemoryClass::HOST_COHERENT) {
            self.flush()?;
        }
        Ok(())
    }

    /// Write a slice of plain-old-data values at `offset`
    pub fn set_pod<T: Pod>(&self, offset: vk::DeviceSize, values: &[T]) -> VulkanResult<()> {
        self.set_data(offset, bytemuck::cast_slice(values))
    }

    /// Read `len` bytes starting at `offset`
    pub fn get_data(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        self.check_host_access()?;
        self.check_range(offset, len as vk::DeviceSize)?;
        self.driver.read_memory(self.allocation.handle(), offset, len)
    }

    /// Make host writes visible to the device
    pub fn flush(&self) -> VulkanResult<()> {
        self.driver.flush_memory(self.allocation.handle(), 0, vk::WHOLE_SIZE)
    }

    /// Copy `size` bytes from `src` through a one-time command buffer
    pub fn copy_from(
        &self,
        pool: &CommandPool,
        src: &Buffer,
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        src.check_range(src_offset, size)?;
        self.check_range(dst_offset, size)?;
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        pool.one_time_submit(|recorder| recorder.copy_buffer(src, self, &[region]))
    }

    fn check_host_access(&self) -> VulkanResult<()> {
        if self.allocation.class().contains(MemoryClass::HOST_VISIBLE) {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!("{:?} buffer memory is not host visible", self.kind)))
        }
    }

    fn check_range(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> VulkanResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(VulkanError::invalid(format!(
                "range {offset}+{len} exceeds {} byte buffer",
                self.size
            ))),
        }
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// What the buffer holds
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Memory class backing the buffer
    pub fn memory_class(&self) -> MemoryClass {
        self.allocation.class()
    }

    /// Vertices or indices uploaded, zero for raw buffers
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Index width for index buffers
    pub fn index_width(&self) -> Option<IndexWidth> {
        self.index_width
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.driver.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::initialization::device::tests::headless_device;

    #[test]
    fn test_usage_includes_transfer_dst() {
        for kind in [
            BufferKind::Staging,
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Uniform,
            BufferKind::Storage,
            BufferKind::Indirect,
        ] {
            assert!(kind.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert!(BufferKind::Staging.usage().contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert_eq!(BufferKind::Uniform.descriptor_type(), Some(vk::DescriptorType::UNIFORM_BUFFER));
        assert_eq!(BufferKind::Vertex.descriptor_type(), None);
    }

    #[test]
    fn test_set_and_get_data() {
        let (_instance, device) = headless_device();
        let buffer = Buffer::new(&device, BufferKind::Uniform, 64, MemoryClass::UPLOAD).unwrap();

        buffer.set_pod(16, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let bytes = buffer.get_data(16, 16).unwrap();
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_out_of_range_access_is_rejected() {
        let (_instance, device) = headless_device();
        let buffer = Buffer::new(&device, BufferKind::Staging, 8, MemoryClass::UPLOAD).unwrap();

        assert!(matches!(buffer.set_data(4, &[0; 8]), Err(VulkanError::InvalidOperation { .. })));
        assert!(matches!(buffer.get_data(u64::MAX, 2), Err(VulkanError::InvalidOperation { .. })));
        assert!(buffer.set_data(0, &[0; 8]).is_ok());
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let (_instance, device) = headless_device();
        let buffer = Buffer::new(&device, BufferKind::Vertex, 8, MemoryClass::DEVICE_LOCAL).unwrap();
        assert!(matches!(buffer.set_data(0, &[1; 4]), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_zero_sized_buffer_is_rejected() {
        let (_instance, device) = headless_device();
        assert!(Buffer::new(&device, BufferKind::Vertex, 0, MemoryClass::UPLOAD).is_err());
    }

    #[test]
    fn test_copy_between_buffers() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();
        let src = Buffer::new(&device, BufferKind::Staging, 16, MemoryClass::UPLOAD).unwrap();
        let dst = Buffer::new(&device, BufferKind::Storage, 32, MemoryClass::UPLOAD).unwrap();
        src.set_data(0, &[7; 16]).unwrap();

        dst.copy_from(&pool, &src, 8, 4, 16).unwrap();
        assert_eq!(dst.get_data(16, 8).unwrap(), vec![7; 8]);
        assert_eq!(dst.get_data(0, 16).unwrap(), vec![0; 16]);

        assert!(dst.copy_from(&pool, &src, 32, 0, 0).is_err());
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }

    #[test]
    fn test_vertex_and_index_upload() {
        let (instance, device) = headless_device();
        let pool = CommandPool::new(&device).unwrap();

        let vertices = [0.0f32, 0.5, -0.5, -0.5, 0.5, -0.5];
        let buffer = Buffer::vertex_from_bytes(&device, &pool, bytemuck::cast_slice(&vertices), 8, 3).unwrap();
        assert_eq!(buffer.element_count(), 3);
        assert_eq!(buffer.kind(), BufferKind::Vertex);
        assert_eq!(buffer.memory_class(), MemoryClass::DEVICE_LOCAL);

        let indices = [0u16, 1, 2];
        let index = Buffer::index_from_bytes(&device, &pool, bytemuck::cast_slice(&indices), IndexWidth::U16, 3).unwrap();
        assert_eq!(index.index_width(), Some(IndexWidth::U16));

        assert!(Buffer::vertex_from_bytes(&device, &pool, &[0; 10], 8, 3).is_err());
        assert!(Buffer::index_from_bytes(&device, &pool, &[0; 6], IndexWidth::U32, 3).is_err());
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }
}
