//! Vertex format and GPU meshes.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use orrery_gpu::{Buffer, GpuContext, GpuError, QueueKind, Result};

/// Mesh vertex (locations 0..3 of the mesh shader).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, color: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
            normal: normal.to_array(),
            uv: uv.to_array(),
        }
    }

    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, color)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, normal)),
            attribute(3, vk::Format::R32G32_SFLOAT, std::mem::offset_of!(Self, uv)),
        ]
    }
}

/// CPU-side geometry.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    /// Triangle-list indices; empty for non-indexed drawing.
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Check that there is something to draw and every index is in range.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() {
            return Err(GpuError::InvalidState("Mesh has no vertices".to_string()));
        }
        let count = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= count) {
            return Err(GpuError::InvalidState(format!(
                "Mesh index {bad} out of range for {count} vertices"
            )));
        }
        Ok(())
    }
}

/// Something the draw loop can bind and draw.
pub trait Drawable {
    /// Bind vertex (and index) buffers.
    ///
    /// # Safety
    /// `cmd` must be recording inside a render pass.
    unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer);

    /// Record the draw call.
    ///
    /// # Safety
    /// `bind` must have been recorded first on the same command buffer.
    unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer);
}

/// Device-local vertex and optional index buffer.
pub struct Mesh {
    vertices: Buffer<Vertex>,
    indices: Option<Buffer<u32>>,
}

impl Mesh {
    /// Upload `data` through the graphics queue.
    pub fn new(gpu: &GpuContext, data: &MeshData, name: &str) -> Result<Self> {
        data.validate()?;

        let vertices = Buffer::from_slice(
            gpu,
            QueueKind::Graphics,
            &data.vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{name} vertices"),
        )?;
        let indices = if data.indices.is_empty() {
            None
        } else {
            Some(Buffer::from_slice(
                gpu,
                QueueKind::Graphics,
                &data.indices,
                vk::BufferUsageFlags::INDEX_BUFFER,
                &format!("{name} indices"),
            )?)
        };

        tracing::debug!(
            "Mesh '{name}': {} vertices, {} indices",
            data.vertices.len(),
            data.indices.len()
        );
        Ok(Self { vertices, indices })
    }

    pub const fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.as_ref().map_or(0, Buffer::len)
    }

    pub fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        if let Some(indices) = &mut self.indices {
            indices.destroy(gpu)?;
        }
        self.vertices.destroy(gpu)
    }
}

impl Drawable for Mesh {
    unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.handle()], &[0]);
            if let Some(indices) = &self.indices {
                device.cmd_bind_index_buffer(cmd, indices.handle(), 0, vk::IndexType::UINT32);
            }
        }
    }

    unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            match &self.indices {
                Some(indices) => device.cmd_draw_indexed(cmd, indices.len() as u32, 1, 0, 0, 0),
                None => device.cmd_draw(cmd, self.vertices.len() as u32, 1, 0, 0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        let v = |x, y| Vertex::new(Vec3::new(x, y, 0.0), Vec3::ONE, Vec3::Z, Vec2::ZERO);
        MeshData {
            vertices: vec![v(0.0, 0.0), v(1.0, 0.0), v(0.0, 1.0)],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(Vertex::binding_descriptions()[0].stride, 44);
    }

    #[test]
    fn validates_indices() {
        assert!(triangle().validate().is_ok());

        let mut bad = triangle();
        bad.indices.push(3);
        assert!(bad.validate().is_err());

        let unindexed = MeshData {
            indices: Vec::new(),
            ..triangle()
        };
        assert!(unindexed.validate().is_ok());
        assert!(MeshData::default().validate().is_err());
    }
}
