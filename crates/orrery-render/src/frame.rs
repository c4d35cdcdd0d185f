//! Per-frame-slot resources: global uniforms and the frame descriptor set.

use crate::camera::GlobalUbo;
use crate::gravity::{BodySnapshot, ForceSample, GravitySimulation};
use crate::texture::Texture;
use ash::vk;
use orrery_core::constants::FRAMES_IN_FLIGHT;
use orrery_gpu::{Buffer, BufferMemory, DescriptorSets, GpuContext, Result, SetSpec};

/// One value per frame slot.
#[derive(Debug, Clone)]
pub struct PerFrame<T> {
    items: Vec<T>,
}

impl<T> PerFrame<T> {
    /// Build one value per slot, stopping at the first error.
    pub fn try_new<E>(mut make: impl FnMut(usize) -> std::result::Result<T, E>) -> std::result::Result<Self, E> {
        let items = (0..FRAMES_IN_FLIGHT).map(&mut make).collect::<std::result::Result<_, _>>()?;
        Ok(Self { items })
    }

    pub fn get(&self, slot: usize) -> &T {
        &self.items[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut T {
        &mut self.items[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

/// Buffers bound when no simulation runs, so the frame layout stays the same.
struct Placeholders {
    force: Buffer<ForceSample>,
    snapshot: Buffer<BodySnapshot>,
}

/// Uniform buffers and descriptor sets for every frame slot.
///
/// Set 0 of the mesh and point light pipelines:
/// binding 0 global uniforms, binding 1 texture, binding 2 force field,
/// binding 3 body snapshot.
pub struct FrameResources {
    ubos: PerFrame<Buffer<GlobalUbo>>,
    placeholders: Option<Placeholders>,
    descriptors: DescriptorSets,
}

impl FrameResources {
    pub fn new(
        gpu: &GpuContext,
        texture: &Texture,
        gravity: Option<&GravitySimulation>,
    ) -> Result<Self> {
        let ubos = PerFrame::try_new(|slot| {
            Buffer::new(
                gpu,
                1,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                BufferMemory::Mapped,
                &format!("global ubo {slot}"),
            )
        })?;

        let storage = vk::BufferUsageFlags::STORAGE_BUFFER;
        let (placeholders, gravity_buffers) = match gravity {
            Some(sim) => {
                let buffers: Vec<_> = (0..FRAMES_IN_FLIGHT)
                    .map(|slot| (sim.force_buffer(slot), sim.snapshot_buffer(slot)))
                    .collect();
                (None, buffers)
            }
            None => {
                let p = Placeholders {
                    force: Buffer::new(gpu, 1, storage, BufferMemory::DeviceLocal, "no force field")?,
                    snapshot: Buffer::new(gpu, 1, storage, BufferMemory::DeviceLocal, "no bodies")?,
                };
                let pair = (p.force.handle(), p.snapshot.handle());
                (Some(p), vec![pair; FRAMES_IN_FLIGHT])
            }
        };

        let graphics = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let specs: Vec<SetSpec> = gravity_buffers
            .iter()
            .enumerate()
            .map(|(slot, &(force, snapshot))| {
                SetSpec::new()
                    .uniform_buffer(0, graphics, ubos.get(slot).handle())
                    .sampled_image(1, vk::ShaderStageFlags::FRAGMENT, texture.view(), texture.sampler())
                    .storage_buffer(2, vk::ShaderStageFlags::VERTEX, force)
                    .storage_buffer(3, vk::ShaderStageFlags::VERTEX, snapshot)
            })
            .collect();

        let descriptors = unsafe { DescriptorSets::allocate(gpu.device(), &specs)? };

        Ok(Self {
            ubos,
            placeholders,
            descriptors,
        })
    }

    /// Write the slot's uniforms. The slot's fence must have been waited on.
    pub fn write_ubo(&self, slot: usize, ubo: &GlobalUbo) -> Result<()> {
        self.ubos.get(slot).write(std::slice::from_ref(ubo))
    }

    /// The slot's descriptor set.
    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.descriptors.set(slot)
    }

    /// Layout shared by every frame set.
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.descriptors.layout(0)
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        unsafe { self.descriptors.destroy(gpu.device()) };
        for ubo in self.ubos.iter_mut() {
            ubo.destroy(gpu)?;
        }
        if let Some(p) = &mut self.placeholders {
            p.force.destroy(gpu)?;
            p.snapshot.destroy(gpu)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::FrameRing;

    #[test]
    fn one_value_per_slot() {
        let frames: PerFrame<usize> = PerFrame::try_new(|slot| Ok::<_, ()>(slot * 10)).unwrap();
        assert_eq!(frames.iter().copied().collect::<Vec<_>>(), vec![0, 10]);
    }

    #[test]
    fn construction_stops_at_first_error() {
        let mut calls = 0;
        let result: std::result::Result<PerFrame<u32>, &str> = PerFrame::try_new(|slot| {
            calls += 1;
            if slot == 0 { Err("boom") } else { Ok(1) }
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn slot_values_survive_other_slots_writes() {
        // Uniforms are written to the slot the ring hands out, so after N
        // frames slot 0 still holds frame 0 and frame N overwrites it.
        let mut ubos: PerFrame<u64> = PerFrame::try_new(|_| Ok::<_, ()>(u64::MAX)).unwrap();
        let mut ring = FrameRing::new(FRAMES_IN_FLIGHT);
        let render = |ring: &mut FrameRing, ubos: &mut PerFrame<u64>| {
            let slot = ring.begin().unwrap();
            *ubos.get_mut(slot) = ring.index();
            ring.end(slot).unwrap();
            ring.settle(&Ok(()));
        };

        for _ in 0..FRAMES_IN_FLIGHT {
            render(&mut ring, &mut ubos);
        }
        assert_eq!(*ubos.get(0), 0);
        assert_eq!(*ubos.get(1), 1);

        render(&mut ring, &mut ubos);
        assert_eq!(*ubos.get(0), FRAMES_IN_FLIGHT as u64);
        assert_eq!(*ubos.get(1), 1);
    }
}
