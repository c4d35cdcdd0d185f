//! Application context.

use std::sync::Arc;

use anyhow::Context;
use ash::vk;
use orrery_gpu::GpuContext;
use orrery_render::{Renderer, ResizeTracker};
use orrery_shaders::ShaderLibrary;
use winit::window::Window;

use crate::config::AppConfig;

/// Window, GPU and frame orchestrator shared with the application.
///
/// Fields drop in declaration order, so the GPU context (and with it the
/// surface) goes before the window it was created from.
pub struct AppContext {
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// Frame orchestrator and swapchain.
    pub renderer: Renderer,
    /// Where shaders are loaded from.
    pub shaders: ShaderLibrary,
    pub(crate) resize: ResizeTracker,
    /// Frames presented or submitted so far.
    pub frame_count: u64,
    /// The window handle.
    pub window: Arc<Window>,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let gpu = GpuContext::builder()
            .app_name(&config.title)
            .validation(config.validation)
            .build(window.as_ref())
            .context("Creating GPU context")?;

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let renderer = Renderer::new(&gpu, extent, &config.render_settings())
            .context("Creating swapchain and frame resources")?;

        Ok(Self {
            gpu,
            renderer,
            shaders: config.shader_library(),
            resize: ResizeTracker::new(extent),
            frame_count: 0,
            window,
        })
    }

    /// Current swapchain extent.
    pub const fn extent(&self) -> vk::Extent2D {
        self.renderer.extent()
    }

    /// Swapchain aspect ratio, 1.0 for a zero-height extent.
    pub fn aspect_ratio(&self) -> f32 {
        self.renderer.aspect_ratio()
    }

    /// Render pass every frame draws into.
    pub const fn render_pass(&self) -> vk::RenderPass {
        self.renderer.render_pass()
    }

    /// Whether the window currently has no drawable area.
    pub const fn is_minimized(&self) -> bool {
        self.resize.is_minimized()
    }

    /// Destroy the renderer. Application resources must already be gone.
    ///
    /// # Safety
    /// The device must be idle.
    pub(crate) unsafe fn cleanup(&mut self) {
        unsafe { self.renderer.destroy(&self.gpu) };
    }
}
