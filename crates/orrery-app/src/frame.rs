//! Per-frame context for rendering.

use ash::vk;
use orrery_gpu::{GpuContext, SemaphoreWait};
use orrery_render::{Frame, Renderer};
use std::time::Duration;

/// The frame being recorded.
pub struct FrameContext<'a> {
    pub gpu: &'a GpuContext,
    pub renderer: &'a Renderer,
    pub frame: &'a mut Frame,
    /// Seconds since the previous frame.
    pub dt: f32,
    /// Wall time since the previous frame.
    pub elapsed: Duration,
}

impl FrameContext<'_> {
    /// Command buffer being recorded.
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.frame.command_buffer
    }

    /// Frame slot in `0..FRAMES_IN_FLIGHT`.
    pub const fn slot(&self) -> usize {
        self.frame.slot
    }

    /// Frames begun before this one.
    pub const fn frame_number(&self) -> u64 {
        self.frame.index
    }

    pub fn begin_render_pass(&self) -> orrery_gpu::Result<()> {
        self.renderer.begin_render_pass(self.gpu, self.frame)
    }

    pub fn end_render_pass(&self) {
        self.renderer.end_render_pass(self.gpu, self.frame);
    }

    /// Make the graphics submission wait on `wait`.
    pub fn add_wait(&mut self, wait: SemaphoreWait) {
        self.frame.waits.push(wait);
    }
}
