//! Frame orchestration.
//!
//! A frame runs `begin_frame → begin_render_pass → (draws) → end_render_pass
//! → end_frame`. `begin_frame` waits for the frame slot's fence and acquires a
//! swapchain image; `end_frame` submits the slot's command buffer, presents
//! and advances the slot. A stale surface is reported as
//! [`GpuError::SurfaceStale`] and handled by the frame loop.

use crate::settings::RenderSettings;
use ash::vk;
use orrery_core::next_slot;
use orrery_gpu::{
    begin_command_buffer, end_command_buffer, GpuContext, GpuError, QueueKind, Result,
    SemaphoreWait, SwapchainManager,
};

/// A frame between `begin_frame` and `end_frame`.
#[derive(Debug)]
pub struct Frame {
    /// Frame slot in `0..FRAMES_IN_FLIGHT`.
    pub slot: usize,
    /// Acquired swapchain image.
    pub image: u32,
    /// Frames begun since startup.
    pub index: u64,
    /// The slot's graphics command buffer, already recording.
    pub command_buffer: vk::CommandBuffer,
    /// Extra semaphores the graphics submission waits on.
    pub waits: Vec<SemaphoreWait>,
}

/// Slot bookkeeping of the frame ring.
///
/// At most one frame is in progress. The slot advances once the frame's
/// command buffer has been submitted, which includes a present that found
/// the surface stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRing {
    frames_in_flight: usize,
    slot: usize,
    index: u64,
    started: bool,
}

impl FrameRing {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            slot: 0,
            index: 0,
            started: false,
        }
    }

    /// Mark a frame as started and return its slot.
    pub fn begin(&mut self) -> Result<usize> {
        if self.started {
            return Err(GpuError::InvalidState(
                "begin_frame called while a frame is in progress".to_string(),
            ));
        }
        self.started = true;
        Ok(self.slot)
    }

    /// Drop a frame that failed before anything was submitted.
    pub fn abort(&mut self) {
        self.started = false;
    }

    /// Close the frame begun on `slot`.
    ///
    /// Fails without changing anything when no frame is in progress or the
    /// frame belongs to another slot.
    pub fn end(&mut self, slot: usize) -> Result<()> {
        if !self.started || slot != self.slot {
            return Err(GpuError::InvalidState(
                "end_frame called without a matching begin_frame".to_string(),
            ));
        }
        self.started = false;
        Ok(())
    }

    /// Advance past the ended frame if its command buffer reached the queue.
    pub fn settle(&mut self, submission: &Result<()>) {
        match submission {
            Ok(()) | Err(GpuError::SurfaceStale) => {
                self.slot = next_slot(self.slot, self.frames_in_flight);
                self.index += 1;
            }
            Err(_) => {}
        }
    }

    /// Slot the current or next frame uses.
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Frames submitted so far.
    pub const fn index(&self) -> u64 {
        self.index
    }

    pub const fn is_started(&self) -> bool {
        self.started
    }

    pub const fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
}

/// Frame orchestrator owning the swapchain and per-slot command buffers.
pub struct Renderer {
    swapchain: SwapchainManager,
    graphics_commands: Vec<vk::CommandBuffer>,
    compute_commands: Vec<vk::CommandBuffer>,
    ring: FrameRing,
    clear_color: [f32; 4],
}

impl Renderer {
    /// Create the swapchain and one graphics and one compute command buffer
    /// per frame slot.
    pub fn new(gpu: &GpuContext, extent: vk::Extent2D, settings: &RenderSettings) -> Result<Self> {
        let mut swapchain = SwapchainManager::new(gpu, extent, settings.swapchain.clone())?;
        let ring = FrameRing::new(swapchain.frames_in_flight());
        let frames = ring.frames_in_flight() as u32;
        let device = gpu.device();

        let allocated = unsafe {
            gpu.command_pool(QueueKind::Graphics)
                .allocate(device, frames)
                .and_then(|graphics| {
                    gpu.command_pool(QueueKind::Compute)
                        .allocate(device, frames)
                        .map(|compute| (graphics, compute))
                })
        };
        let (graphics_commands, compute_commands) = match allocated {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { swapchain.destroy(gpu) };
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            graphics_commands,
            compute_commands,
            ring,
            clear_color: settings.clear_color,
        })
    }

    /// Wait for the current slot to be free, acquire an image and start
    /// recording the slot's graphics command buffer.
    ///
    /// On [`GpuError::SurfaceStale`] nothing has been recorded and the call
    /// can be retried after recreation.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame(&mut self, gpu: &GpuContext) -> Result<Frame> {
        let slot = self.ring.begin()?;
        let command_buffer = self.graphics_commands[slot];

        let started = self.swapchain.acquire_next_image(gpu, slot).and_then(|image| {
            unsafe {
                begin_command_buffer(
                    gpu.device(),
                    command_buffer,
                    vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                )?;
            }
            Ok(image)
        });
        let image = match started {
            Ok(image) => image,
            Err(e) => {
                self.ring.abort();
                return Err(e);
            }
        };

        Ok(Frame {
            slot,
            image,
            index: self.ring.index(),
            command_buffer,
            waits: Vec::new(),
        })
    }

    /// Begin the render pass on the frame's framebuffer and set the dynamic
    /// viewport and scissor to the current extent.
    pub fn begin_render_pass(&self, gpu: &GpuContext, frame: &Frame) -> Result<()> {
        let framebuffer = self.swapchain.framebuffer(frame.image).ok_or_else(|| {
            GpuError::InvalidState(format!("No framebuffer for image {}", frame.image))
        })?;
        let extent = self.swapchain.extent();
        let device = gpu.device();

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(
                frame.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_set_viewport(frame.command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(frame.command_buffer, 0, &[render_area]);
        }
        Ok(())
    }

    /// End the render pass.
    pub fn end_render_pass(&self, gpu: &GpuContext, frame: &Frame) {
        unsafe { gpu.device().cmd_end_render_pass(frame.command_buffer) };
    }

    /// Finish recording, submit and present, then advance the frame slot.
    ///
    /// The slot advances whenever the submission happened, including when
    /// presentation reports [`GpuError::SurfaceStale`].
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self, gpu: &GpuContext, frame: Frame) -> Result<()> {
        self.ring.end(frame.slot)?;

        unsafe { end_command_buffer(gpu.device(), frame.command_buffer)? };

        let result = self.swapchain.submit_and_present(
            gpu,
            frame.command_buffer,
            frame.slot,
            frame.image,
            &frame.waits,
        );

        self.ring.settle(&result);
        result
    }

    /// Recreate the swapchain and its extent-dependent resources.
    pub fn recreate(&mut self, gpu: &GpuContext, extent: vk::Extent2D) -> Result<()> {
        if self.ring.is_started() {
            return Err(GpuError::InvalidState(
                "Swapchain recreation requested mid-frame".to_string(),
            ));
        }
        self.swapchain.recreate(gpu, extent)
    }

    /// The slot's compute command buffer.
    pub fn compute_command_buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.compute_commands[slot]
    }

    /// Slot the next frame will use.
    pub const fn frame_slot(&self) -> usize {
        self.ring.slot()
    }

    /// Number of frames presented or submitted so far.
    pub const fn frame_index(&self) -> u64 {
        self.ring.index()
    }

    pub const fn frames_in_flight(&self) -> usize {
        self.ring.frames_in_flight()
    }

    pub const fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.aspect_ratio()
    }

    pub const fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// Destroy the command buffers and the swapchain.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        let device = gpu.device();
        unsafe {
            gpu.command_pool(QueueKind::Graphics)
                .free(device, &self.graphics_commands);
            gpu.command_pool(QueueKind::Compute)
                .free(device, &self.compute_commands);
            self.swapchain.destroy(gpu);
        }
        self.graphics_commands.clear();
        self.compute_commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_gpu::ImagesInFlight;

    fn submit(ring: &mut FrameRing, result: Result<()>) -> usize {
        let slot = ring.begin().unwrap();
        ring.end(slot).unwrap();
        ring.settle(&result);
        slot
    }

    #[test]
    fn slots_cycle_through_the_ring() {
        let mut ring = FrameRing::new(2);
        let slots: Vec<_> = (0..5).map(|_| submit(&mut ring, Ok(()))).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(ring.index(), 5);
        assert_eq!(ring.slot(), 1);
    }

    #[test]
    fn stale_present_still_advances() {
        let mut ring = FrameRing::new(2);
        submit(&mut ring, Err(GpuError::SurfaceStale));
        assert_eq!(ring.slot(), 1);
        assert_eq!(ring.index(), 1);
        assert!(!ring.is_started());
    }

    #[test]
    fn failed_submission_keeps_the_slot() {
        let mut ring = FrameRing::new(2);
        submit(&mut ring, Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
        assert_eq!(ring.slot(), 0);
        assert_eq!(ring.index(), 0);
        assert!(!ring.is_started());
    }

    #[test]
    fn second_begin_is_rejected() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.begin().unwrap(), 0);
        assert!(matches!(ring.begin(), Err(GpuError::InvalidState(_))));
        assert!(ring.is_started());
        ring.end(0).unwrap();
        assert_eq!(ring.begin().unwrap(), 0);
    }

    #[test]
    fn aborted_frame_can_be_retried() {
        // A stale acquire fails the frame before anything is recorded
        let mut ring = FrameRing::new(2);
        ring.begin().unwrap();
        ring.abort();
        assert!(!ring.is_started());
        assert_eq!(ring.begin().unwrap(), 0);
        assert_eq!(ring.index(), 0);
    }

    #[test]
    fn end_requires_the_started_slot() {
        let mut ring = FrameRing::new(2);
        assert!(ring.end(0).is_err());

        ring.begin().unwrap();
        assert!(ring.end(1).is_err());
        assert!(ring.is_started());
        assert!(ring.end(0).is_ok());
        assert!(ring.end(0).is_err());
    }

    #[test]
    fn ring_fences_guard_reacquired_images() {
        // Fences are slot indices. Each image reacquired under another slot
        // must first wait on the slot that last rendered to it.
        let mut ring = FrameRing::new(2);
        let mut images = ImagesInFlight::new(3);
        let acquired = [0, 1, 1, 0, 2, 2, 0];
        let mut waits = Vec::new();

        for (frame, &image) in acquired.iter().enumerate() {
            let slot = ring.begin().unwrap();
            waits.push(images.claim(image, slot));
            ring.end(slot).unwrap();
            let result = if frame == 3 { Err(GpuError::SurfaceStale) } else { Ok(()) };
            ring.settle(&result);
        }

        assert_eq!(
            waits,
            vec![None, None, Some(1), Some(0), None, Some(0), Some(1)]
        );
        assert_eq!(ring.index(), acquired.len() as u64);
    }
}
