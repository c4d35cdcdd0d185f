//! Draw systems recorded inside the frame's render pass.

use crate::camera::PointLight;
use crate::mesh::{Drawable, Vertex};
use crate::scene::{PushData, Scene};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use orrery_gpu::{GpuContext, GpuError, GraphicsPipeline, GraphicsPipelineConfig, Result};
use orrery_shaders::{ShaderLibrary, MESH_FRAG, MESH_VERT, POINT_LIGHT_FRAG, POINT_LIGHT_VERT};

const MESH_PUSH_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

fn load(shaders: &ShaderLibrary, name: &str) -> Result<Vec<u32>> {
    shaders
        .load(name)
        .map_err(|e| GpuError::ShaderModule(e.to_string()))
}

fn push_range<T>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(stages)
        .offset(0)
        .size(std::mem::size_of::<T>() as u32)
}

/// Draws every scene object with its push payload.
pub struct MeshDrawSystem {
    pipeline: GraphicsPipeline,
}

impl MeshDrawSystem {
    pub fn new(
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        render_pass: vk::RenderPass,
        frame_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let vert = load(shaders, MESH_VERT)?;
        let frag = load(shaders, MESH_FRAG)?;

        let mut config = GraphicsPipelineConfig::new(&vert, &frag, render_pass);
        config.vertex_bindings = Vertex::binding_descriptions();
        config.vertex_attributes = Vertex::attribute_descriptions();

        let pipeline = unsafe {
            GraphicsPipeline::new(
                gpu.device(),
                &config,
                &[frame_layout],
                &[push_range::<PushData>(MESH_PUSH_STAGES)],
            )?
        };
        Ok(Self { pipeline })
    }

    /// Record the scene. Each object's `mesh` indexes `meshes`.
    pub fn render<D: Drawable>(
        &self,
        gpu: &GpuContext,
        cmd: vk::CommandBuffer,
        frame_set: vk::DescriptorSet,
        scene: &Scene,
        meshes: &[D],
        gravity: bool,
    ) -> Result<()> {
        let device = gpu.device();
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[frame_set],
                &[],
            );
        }

        for object in scene.objects() {
            let mesh = meshes.get(object.mesh).ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "Object {:?} uses mesh {} of {}",
                    object.id,
                    object.mesh,
                    meshes.len()
                ))
            })?;
            let push = object.push_data(gravity);
            unsafe {
                device.cmd_push_constants(
                    cmd,
                    self.pipeline.layout,
                    MESH_PUSH_STAGES,
                    0,
                    bytemuck::bytes_of(&push),
                );
                mesh.bind(device, cmd);
                mesh.draw(device, cmd);
            }
        }
        Ok(())
    }

    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&self, gpu: &GpuContext) {
        unsafe { self.pipeline.destroy(gpu.device()) };
    }
}

/// Push constants of the point light billboard.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PointLightPush {
    pub position: [f32; 4],
    /// rgb colour, w intensity
    pub color: [f32; 4],
    pub radius: f32,
    pub _pad: [f32; 3],
}

impl From<&PointLight> for PointLightPush {
    fn from(light: &PointLight) -> Self {
        Self {
            position: light.position.extend(1.0).to_array(),
            color: light.color.extend(light.intensity).to_array(),
            radius: light.radius,
            _pad: [0.0; 3],
        }
    }
}

/// Camera-facing billboard marking the point light.
pub struct PointLightSystem {
    pipeline: GraphicsPipeline,
}

impl PointLightSystem {
    pub fn new(
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        render_pass: vk::RenderPass,
        frame_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let vert = load(shaders, POINT_LIGHT_VERT)?;
        let frag = load(shaders, POINT_LIGHT_FRAG)?;

        let mut config = GraphicsPipelineConfig::new(&vert, &frag, render_pass);
        config.alpha_blend = true;
        config.depth_write = false;

        let pipeline = unsafe {
            GraphicsPipeline::new(
                gpu.device(),
                &config,
                &[frame_layout],
                &[push_range::<PointLightPush>(MESH_PUSH_STAGES)],
            )?
        };
        Ok(Self { pipeline })
    }

    pub fn render(
        &self,
        gpu: &GpuContext,
        cmd: vk::CommandBuffer,
        frame_set: vk::DescriptorSet,
        light: &PointLight,
    ) {
        let device = gpu.device();
        let push = PointLightPush::from(light);
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[frame_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.pipeline.layout,
                MESH_PUSH_STAGES,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_draw(cmd, 6, 1, 0, 0);
        }
    }

    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&self, gpu: &GpuContext) {
        unsafe { self.pipeline.destroy(gpu.device()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn push_ranges_cover_payloads() {
        let range = push_range::<PushData>(MESH_PUSH_STAGES);
        assert_eq!(range.size, 96);
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::VERTEX));
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(push_range::<PointLightPush>(MESH_PUSH_STAGES).size, 48);
    }

    #[test]
    fn light_push_packs_intensity() {
        let light = PointLight {
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 4.0,
            radius: 0.2,
        };
        let push = PointLightPush::from(&light);
        assert_eq!(push.position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(push.color, [1.0, 0.5, 0.25, 4.0]);
    }
}
