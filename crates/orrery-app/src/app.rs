//! `OrreryApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Orrery applications.
///
/// The framework owns the window, the GPU context and the frame
/// orchestrator; the application owns its scene and draw resources.
pub trait OrreryApp: Sized {
    /// Application-specific settings handed to [`OrreryApp::init`], such as
    /// parsed command line options. Use `()` when there are none.
    type Options;

    /// Initialize the application.
    ///
    /// Called once after the window, GPU context and renderer exist, with
    /// the options given to [`run_app`](crate::run_app).
    fn init(ctx: &mut AppContext, options: Self::Options) -> anyhow::Result<Self>;

    /// Update application state. `dt` is the time since the last frame in
    /// seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record the frame.
    ///
    /// The framework has acquired an image and started the frame's command
    /// buffer; it submits and presents afterwards. The application begins and
    /// ends the render pass through [`FrameContext`] and may add semaphore
    /// waits to the frame's graphics submission.
    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;

    /// Called after the swapchain was recreated for a new extent.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Destroy GPU resources. The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
