//! Typed GPU buffers.

use crate::context::{GpuContext, QueueKind};
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;

/// Where a buffer's contents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMemory {
    /// Host-visible and persistently mapped; written directly every frame.
    Mapped,
    /// Device-local; filled through a staging copy.
    DeviceLocal,
}

impl BufferMemory {
    fn properties(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::Mapped => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            Self::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    fn usage(self, usage: vk::BufferUsageFlags) -> vk::BufferUsageFlags {
        match self {
            Self::Mapped => usage,
            Self::DeviceLocal => usage | vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    fn check_host_write(self) -> Result<()> {
        match self {
            Self::Mapped => Ok(()),
            Self::DeviceLocal => Err(GpuError::InvalidState(
                "Device-local buffer cannot be written from the host".to_string(),
            )),
        }
    }

    fn check_staging_target(self) -> Result<()> {
        match self {
            Self::DeviceLocal => Ok(()),
            Self::Mapped => Err(GpuError::InvalidState(
                "Mapped buffer cannot be a staging copy destination".to_string(),
            )),
        }
    }
}

/// Check that `count` elements starting at `first` fit in `len`.
fn check_range(first: usize, count: usize, len: usize) -> Result<()> {
    match first.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(GpuError::InvalidState(format!(
            "Elements {first}..{} out of range for buffer of {len}",
            first.saturating_add(count)
        ))),
    }
}

/// A buffer holding `len` elements of `T`.
pub struct Buffer<T: Pod> {
    raw: GpuBuffer,
    len: usize,
    memory: BufferMemory,
    _marker: PhantomData<T>,
}

impl<T: Pod> Buffer<T> {
    /// Element stride in bytes.
    pub const STRIDE: u64 = std::mem::size_of::<T>() as u64;

    fn check_len(len: usize, name: &str) -> Result<u64> {
        if len == 0 || Self::STRIDE == 0 {
            return Err(GpuError::InvalidState(format!("Empty buffer '{name}'")));
        }
        Ok(Self::STRIDE * len as u64)
    }

    const fn wrap(raw: GpuBuffer, len: usize, memory: BufferMemory) -> Self {
        Self {
            raw,
            len,
            memory,
            _marker: PhantomData,
        }
    }

    /// Allocate an uninitialised buffer for `len` elements, owned by one
    /// queue family.
    pub fn new(
        gpu: &GpuContext,
        len: usize,
        usage: vk::BufferUsageFlags,
        memory: BufferMemory,
        name: &str,
    ) -> Result<Self> {
        let size = Self::check_len(len, name)?;
        let raw = gpu.create_buffer(size, memory.usage(usage), memory.properties(), name)?;
        Ok(Self::wrap(raw, len, memory))
    }

    /// Like [`Buffer::new`], but usable from the graphics and compute queues
    /// at once.
    pub fn new_shared(
        gpu: &GpuContext,
        len: usize,
        usage: vk::BufferUsageFlags,
        memory: BufferMemory,
        name: &str,
    ) -> Result<Self> {
        let size = Self::check_len(len, name)?;
        let raw = gpu.create_shared_buffer(size, memory.usage(usage), memory.properties(), name)?;
        Ok(Self::wrap(raw, len, memory))
    }

    /// Allocate a device-local buffer and fill it from `data` on `queue`,
    /// the queue that will use it.
    pub fn from_slice(
        gpu: &GpuContext,
        queue: QueueKind,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        let mut buffer = Self::new(gpu, data.len(), usage, BufferMemory::DeviceLocal, name)?;
        if let Err(e) = buffer.init_with_staging(gpu, queue, data) {
            if let Err(cleanup) = buffer.destroy(gpu) {
                tracing::error!("Failed to destroy buffer '{name}' after upload error: {cleanup}");
            }
            return Err(e);
        }
        Ok(buffer)
    }

    /// Upload `data` to the start of a device-local buffer through a staging
    /// copy on `queue`. Blocks until the transfer has completed.
    pub fn init_with_staging(&self, gpu: &GpuContext, queue: QueueKind, data: &[T]) -> Result<()> {
        self.memory.check_staging_target()?;
        check_range(0, data.len(), self.len)?;

        let dst = self.raw.buffer;
        let size = Self::STRIDE * data.len() as u64;
        gpu.copy_with_staging(queue, bytemuck::cast_slice(data), |cmd, src| {
            let region = vk::BufferCopy::default().size(size);
            unsafe {
                gpu.device().cmd_copy_buffer(cmd, src, dst, &[region]);
            }
        })
    }

    /// Copy `data` into a mapped buffer starting at element `first`.
    ///
    /// No synchronization: the caller guarantees the GPU is done reading.
    pub fn write_at(&self, first: usize, data: &[T]) -> Result<()> {
        self.memory.check_host_write()?;
        check_range(first, data.len(), self.len)?;
        self.raw
            .write_bytes(Self::STRIDE * first as u64, bytemuck::cast_slice(data))
    }

    /// Copy `data` into a mapped buffer from the start.
    pub fn write(&self, data: &[T]) -> Result<()> {
        self.write_at(0, data)
    }

    /// Raw buffer handle.
    pub const fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    /// Number of elements.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty buffers are rejected at creation.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    pub const fn size(&self) -> u64 {
        self.raw.size
    }

    /// How the buffer is backed.
    pub const fn memory(&self) -> BufferMemory {
        self.memory
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.raw.buffer)
            .offset(0)
            .range(self.raw.size)
    }

    /// Release the buffer and its memory.
    pub fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        gpu.free_buffer(&mut self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_local_gets_transfer_dst() {
        let usage = BufferMemory::DeviceLocal.usage(vk::BufferUsageFlags::VERTEX_BUFFER);
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        let usage = BufferMemory::Mapped.usage(vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert_eq!(usage, vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn mapped_memory_is_host_coherent() {
        let props = BufferMemory::Mapped.properties();
        assert!(props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(props.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(!BufferMemory::DeviceLocal
            .properties()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    }

    #[test]
    fn write_paths_are_exclusive() {
        assert!(BufferMemory::Mapped.check_host_write().is_ok());
        assert!(BufferMemory::Mapped.check_staging_target().is_err());
        assert!(BufferMemory::DeviceLocal.check_host_write().is_err());
        assert!(BufferMemory::DeviceLocal.check_staging_target().is_ok());
    }

    #[test]
    fn ranges() {
        assert!(check_range(0, 4, 4).is_ok());
        assert!(check_range(2, 2, 4).is_ok());
        assert!(check_range(3, 2, 4).is_err());
        assert!(check_range(usize::MAX, 1, 4).is_err());
    }

    #[test]
    fn stride_matches_element() {
        assert_eq!(Buffer::<[f32; 4]>::STRIDE, 16);
        assert_eq!(Buffer::<u32>::STRIDE, 4);
    }
}
