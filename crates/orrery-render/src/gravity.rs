//! Compute-to-graphics gravity bridge.
//!
//! Body state lives in `FRAMES_IN_FLIGHT` device-local mass buffers used as a
//! ping-pong ring. Every integration sub-step reads the slot written by the
//! previous sub-step and writes the next one. A global sub-step counter picks
//! the slots, and every frame runs a multiple of the ring length, so each
//! frame starts writing slot 0 and ends with the newest state in the last
//! slot.
//!
//! After integration a field stage samples the newest state into the frame
//! slot's force buffer and snapshots body positions for the vertex stage.
//! The compute submission signals a semaphore the frame's graphics submission
//! waits on at the vertex shader stage.

use crate::settings::GravitySettings;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use orrery_core::constants::FRAMES_IN_FLIGHT;
use orrery_core::previous_slot;
use orrery_gpu::{
    begin_command_buffer, create_semaphore, end_command_buffer, submit_command_buffers, Buffer,
    BufferMemory, ComputePipeline, DescriptorSets, GpuContext, GpuError, QueueKind, Result,
    SemaphoreWait, SetSpec,
};
use orrery_shaders::{ShaderLibrary, FIELD_COMP, GRAVITY_COMP};
use std::time::Duration;

/// A point mass (std430, 32 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MassBody {
    pub position: [f32; 3],
    pub mass: f32,
    pub velocity: [f32; 3],
    pub _pad: f32,
}

impl MassBody {
    pub fn new(position: Vec3, mass: f32, velocity: Vec3) -> Self {
        Self {
            position: position.to_array(),
            mass,
            velocity: velocity.to_array(),
            _pad: 0.0,
        }
    }
}

/// A point where the force field is sampled.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FieldSample {
    pub position: [f32; 3],
    pub _pad: f32,
}

impl FieldSample {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            _pad: 0.0,
        }
    }
}

/// Summed pull at one field sample; `magnitude` is the length of `force`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ForceSample {
    pub force: [f32; 3],
    pub magnitude: f32,
}

/// Body position and mass copied out for the vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BodySnapshot {
    pub position: [f32; 3],
    pub mass: f32,
}

/// Push constants of the integration shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct IntegratePush {
    pub dt: f32,
    pub body_count: u32,
    pub gravity: f32,
    pub softening: f32,
}

/// Push constants of the field shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FieldPush {
    pub body_count: u32,
    pub sample_count: u32,
    pub gravity: f32,
    pub softening: f32,
}

/// How one frame's elapsed time is split into integration sub-steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubstepPlan {
    /// Number of sub-steps; a positive multiple of the ring length.
    pub steps: u32,
    /// Seconds simulated per sub-step.
    pub dt: f32,
}

impl SubstepPlan {
    /// Split `elapsed` into steps of about `step`, rounded up to a multiple
    /// of `slots` and never fewer than `slots`.
    pub fn new(elapsed: Duration, step: Duration, slots: usize) -> Self {
        let slots = slots.max(1) as u64;
        let step_nanos = step.as_nanos().max(1);
        let wanted = elapsed.as_nanos().div_ceil(step_nanos);
        let wanted = u64::try_from(wanted).unwrap_or(u64::MAX);
        let steps = wanted.div_ceil(slots).saturating_mul(slots).max(slots);
        let steps = u32::try_from(steps).unwrap_or(u32::MAX);
        Self {
            steps,
            dt: elapsed.as_secs_f32() / steps as f32,
        }
    }

    /// Total simulated seconds.
    pub fn simulated(&self) -> f32 {
        self.dt * self.steps as f32
    }
}

/// Slot selection for the mass ring, driven by a global sub-step counter.
#[derive(Debug, Clone)]
pub struct PingPong {
    slots: usize,
    counter: u64,
}

impl PingPong {
    pub const fn new(slots: usize) -> Self {
        Self { slots, counter: 0 }
    }

    /// Slot the next sub-step writes.
    pub const fn write_slot(&self) -> usize {
        (self.counter % self.slots as u64) as usize
    }

    /// Slot the next sub-step reads.
    pub const fn read_slot(&self) -> usize {
        previous_slot(self.write_slot(), self.slots)
    }

    /// Slot holding the newest state.
    pub const fn latest_slot(&self) -> usize {
        self.read_slot()
    }

    pub fn advance(&mut self) {
        self.counter += 1;
    }

    /// Sub-steps run so far.
    pub const fn steps_taken(&self) -> u64 {
        self.counter
    }
}

/// N-body simulation on the compute queue feeding the graphics queue.
pub struct GravitySimulation {
    integrate: ComputePipeline,
    field: ComputePipeline,
    descriptors: DescriptorSets,
    mass: Vec<Buffer<MassBody>>,
    samples: Buffer<FieldSample>,
    forces: Vec<Buffer<ForceSample>>,
    snapshots: Vec<Buffer<BodySnapshot>>,
    compute_finished: Vec<vk::Semaphore>,
    compute_for_graphics: Vec<vk::Semaphore>,
    ping_pong: PingPong,
    settings: GravitySettings,
    body_count: u32,
    sample_count: u32,
}

impl GravitySimulation {
    /// Upload the bodies and field samples, build both pipelines and prime
    /// the compute semaphore chain.
    ///
    /// `samples` may be empty, in which case only the body snapshot is
    /// produced.
    pub fn new(
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        settings: GravitySettings,
        bodies: &[MassBody],
        samples: &[FieldSample],
    ) -> Result<Self> {
        if bodies.is_empty() {
            return Err(GpuError::InvalidState(
                "Gravity simulation needs at least one body".to_string(),
            ));
        }
        let gravity_code = shaders
            .load(GRAVITY_COMP)
            .map_err(|e| GpuError::ShaderModule(e.to_string()))?;
        let field_code = shaders
            .load(FIELD_COMP)
            .map_err(|e| GpuError::ShaderModule(e.to_string()))?;

        let storage = vk::BufferUsageFlags::STORAGE_BUFFER;
        let mut mass = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for slot in 0..FRAMES_IN_FLIGHT {
            mass.push(Buffer::from_slice(
                gpu,
                QueueKind::Compute,
                bodies,
                storage,
                &format!("gravity mass {slot}"),
            )?);
        }

        let placeholder = [FieldSample::default()];
        let sample_data = if samples.is_empty() { &placeholder[..] } else { samples };
        let samples_buffer =
            Buffer::from_slice(gpu, QueueKind::Compute, sample_data, storage, "field samples")?;

        let mut forces = Vec::with_capacity(FRAMES_IN_FLIGHT);
        let mut snapshots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for slot in 0..FRAMES_IN_FLIGHT {
            forces.push(Buffer::new_shared(
                gpu,
                sample_data.len(),
                storage,
                BufferMemory::DeviceLocal,
                &format!("force field {slot}"),
            )?);
            snapshots.push(Buffer::new_shared(
                gpu,
                bodies.len(),
                storage,
                BufferMemory::DeviceLocal,
                &format!("body snapshot {slot}"),
            )?);
        }

        let specs = set_specs(&mass, &samples_buffer, &forces, &snapshots);
        let device = gpu.device();
        let descriptors = unsafe { DescriptorSets::allocate(device, &specs)? };

        let integrate = unsafe {
            ComputePipeline::new(
                device,
                &gravity_code,
                &[descriptors.layout(0)],
                &[push_range::<IntegratePush>()],
            )?
        };
        let field = unsafe {
            ComputePipeline::new(
                device,
                &field_code,
                &[descriptors.layout(FRAMES_IN_FLIGHT)],
                &[push_range::<FieldPush>()],
            )?
        };

        let mut compute_finished = Vec::with_capacity(FRAMES_IN_FLIGHT);
        let mut compute_for_graphics = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            unsafe {
                compute_finished.push(create_semaphore(device)?);
                compute_for_graphics.push(create_semaphore(device)?);
            }
        }

        // The first frame waits on the last slot's semaphore
        unsafe {
            submit_command_buffers(
                device,
                gpu.compute_queue(),
                &[],
                &[],
                &[compute_finished[FRAMES_IN_FLIGHT - 1]],
                vk::Fence::null(),
            )?;
        }

        tracing::info!(
            "Gravity simulation ready: {} bodies, {} field samples, {:?} steps",
            bodies.len(),
            samples.len(),
            settings.step
        );

        Ok(Self {
            integrate,
            field,
            descriptors,
            mass,
            samples: samples_buffer,
            forces,
            snapshots,
            compute_finished,
            compute_for_graphics,
            ping_pong: PingPong::new(FRAMES_IN_FLIGHT),
            settings,
            body_count: bodies.len() as u32,
            sample_count: samples.len() as u32,
        })
    }

    /// Record and submit the frame slot's compute work.
    ///
    /// `cmd` must be the slot's compute command buffer and the slot's
    /// previous graphics submission must have completed. The returned wait
    /// belongs in the frame's graphics submission.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn record_and_submit(
        &mut self,
        gpu: &GpuContext,
        cmd: vk::CommandBuffer,
        slot: usize,
        elapsed: Duration,
    ) -> Result<SemaphoreWait> {
        let elapsed = elapsed.min(self.settings.max_frame_time);
        let plan = SubstepPlan::new(elapsed, self.settings.step, FRAMES_IN_FLIGHT);
        let device = gpu.device();

        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.integrate.pipeline);
            let push = IntegratePush {
                dt: plan.dt,
                body_count: self.body_count,
                gravity: self.settings.gravitational_constant,
                softening: self.settings.softening,
            };
            device.cmd_push_constants(
                cmd,
                self.integrate.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push),
            );
            for _ in 0..plan.steps {
                let set = self.descriptors.set(self.ping_pong.write_slot());
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    self.integrate.layout,
                    0,
                    &[set],
                    &[],
                );
                device.cmd_dispatch(cmd, 1, 1, 1);
                compute_barrier(device, cmd);
                self.ping_pong.advance();
            }

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.field.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.field.layout,
                0,
                &[self.descriptors.set(FRAMES_IN_FLIGHT + slot)],
                &[],
            );
            let push = FieldPush {
                body_count: self.body_count,
                sample_count: self.sample_count,
                gravity: self.settings.gravitational_constant,
                softening: self.settings.softening,
            };
            device.cmd_push_constants(
                cmd,
                self.field.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_dispatch(cmd, self.settings.field_workgroups.max(1), 1, 1);

            end_command_buffer(device, cmd)?;

            let wait = SemaphoreWait::new(
                self.compute_finished[previous_slot(slot, FRAMES_IN_FLIGHT)],
                vk::PipelineStageFlags::COMPUTE_SHADER,
            );
            submit_command_buffers(
                device,
                gpu.compute_queue(),
                &[cmd],
                &[wait],
                &[self.compute_finished[slot], self.compute_for_graphics[slot]],
                vk::Fence::null(),
            )?;
        }

        tracing::trace!("Gravity slot {slot}: {} sub-steps of {}s", plan.steps, plan.dt);

        Ok(SemaphoreWait::new(
            self.compute_for_graphics[slot],
            vk::PipelineStageFlags::VERTEX_SHADER,
        ))
    }

    /// Force field buffer the frame slot's draws read.
    pub fn force_buffer(&self, slot: usize) -> vk::Buffer {
        self.forces[slot].handle()
    }

    /// Body snapshot buffer the frame slot's draws read.
    pub fn snapshot_buffer(&self, slot: usize) -> vk::Buffer {
        self.snapshots[slot].handle()
    }

    pub const fn body_count(&self) -> u32 {
        self.body_count
    }

    pub const fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Sub-steps integrated since startup.
    pub const fn steps_taken(&self) -> u64 {
        self.ping_pong.steps_taken()
    }

    /// Destroy every GPU object.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        let device = gpu.device();
        unsafe {
            self.integrate.destroy(device);
            self.field.destroy(device);
            self.descriptors.destroy(device);
            for &semaphore in self.compute_finished.iter().chain(&self.compute_for_graphics) {
                device.destroy_semaphore(semaphore, None);
            }
        }
        self.compute_finished.clear();
        self.compute_for_graphics.clear();

        for buffer in &mut self.mass {
            buffer.destroy(gpu)?;
        }
        for buffer in &mut self.forces {
            buffer.destroy(gpu)?;
        }
        for buffer in &mut self.snapshots {
            buffer.destroy(gpu)?;
        }
        self.samples.destroy(gpu)
    }
}

/// Integration sets for every write slot, then field sets for every frame
/// slot.
fn set_specs(
    mass: &[Buffer<MassBody>],
    samples: &Buffer<FieldSample>,
    forces: &[Buffer<ForceSample>],
    snapshots: &[Buffer<BodySnapshot>],
) -> Vec<SetSpec> {
    let stage = vk::ShaderStageFlags::COMPUTE;
    let slots = mass.len();
    let integrate = (0..slots).map(|write| {
        SetSpec::new()
            .storage_buffer(0, stage, mass[previous_slot(write, slots)].handle())
            .storage_buffer(1, stage, mass[write].handle())
    });
    let field = (0..slots).map(|slot| {
        SetSpec::new()
            .storage_buffer(0, stage, mass[slots - 1].handle())
            .storage_buffer(1, stage, samples.handle())
            .storage_buffer(2, stage, forces[slot].handle())
            .storage_buffer(3, stage, snapshots[slot].handle())
    });
    integrate.chain(field).collect()
}

fn push_range<T>() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .offset(0)
        .size(std::mem::size_of::<T>() as u32)
}

/// Make one dispatch's writes visible to the next.
unsafe fn compute_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const N: usize = FRAMES_IN_FLIGHT;

    #[test]
    fn gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<MassBody>(), 32);
        assert_eq!(std::mem::size_of::<FieldSample>(), 16);
        assert_eq!(std::mem::size_of::<ForceSample>(), 16);
        assert_eq!(std::mem::size_of::<BodySnapshot>(), 16);
        assert_eq!(std::mem::size_of::<IntegratePush>(), 16);
        assert_eq!(std::mem::size_of::<FieldPush>(), 16);
    }

    #[test]
    fn plan_is_positive_multiple_of_ring() {
        let step = Duration::from_millis(1);
        for millis in [0, 1, 2, 3, 7, 16, 17, 33, 250] {
            let elapsed = Duration::from_millis(millis);
            let plan = SubstepPlan::new(elapsed, step, N);
            assert!(plan.steps >= N as u32, "{millis}ms");
            assert_eq!(plan.steps as usize % N, 0, "{millis}ms");
            assert_relative_eq!(plan.simulated(), elapsed.as_secs_f32(), epsilon = 1e-6);
        }
    }

    #[test]
    fn plan_steps_track_step_length() {
        let plan = SubstepPlan::new(Duration::from_micros(16_600), Duration::from_millis(1), N);
        assert_eq!(plan.steps, 18);
        assert!(plan.dt <= 0.001);

        let plan = SubstepPlan::new(Duration::from_millis(16), Duration::from_millis(1), 3);
        assert_eq!(plan.steps, 18);
    }

    #[test]
    fn zero_elapsed_still_cycles_ring() {
        let plan = SubstepPlan::new(Duration::ZERO, Duration::from_millis(1), N);
        assert_eq!(plan.steps, N as u32);
        assert_relative_eq!(plan.dt, 0.0);
    }

    #[test]
    fn substep_reads_previous_write() {
        let mut ring = PingPong::new(N);
        let mut last_written = None;
        for _ in 0..10 {
            if let Some(last) = last_written {
                assert_eq!(ring.read_slot(), last);
            }
            assert_ne!(ring.read_slot(), ring.write_slot());
            last_written = Some(ring.write_slot());
            ring.advance();
        }
    }

    #[test]
    fn every_frame_ends_on_last_slot() {
        let mut ring = PingPong::new(N);
        for millis in [16, 3, 0, 250, 1, 33] {
            let plan = SubstepPlan::new(Duration::from_millis(millis), Duration::from_millis(1), N);
            assert_eq!(ring.write_slot(), 0);
            for _ in 0..plan.steps {
                ring.advance();
            }
            assert_eq!(ring.latest_slot(), N - 1);
        }
    }
}
