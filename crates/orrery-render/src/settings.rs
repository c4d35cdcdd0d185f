//! Renderer and simulation settings.

use orrery_gpu::SwapchainPreferences;
use std::time::Duration;

/// Settings for the frame orchestrator.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Colour the render pass clears to.
    pub clear_color: [f32; 4],
    /// Surface format, vsync and depth format preferences.
    pub swapchain: SwapchainPreferences,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.1, 0.1, 1.0],
            swapchain: SwapchainPreferences::default(),
        }
    }
}

impl RenderSettings {
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.swapchain.vsync = vsync;
        self
    }

    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

/// Settings for the gravity simulation.
#[derive(Debug, Clone)]
pub struct GravitySettings {
    /// Target length of one integration sub-step.
    pub step: Duration,
    /// Longest frame time simulated in one frame; longer stalls are cut.
    pub max_frame_time: Duration,
    /// Gravitational constant in scene units.
    pub gravitational_constant: f32,
    /// Added to squared distances so close encounters stay finite.
    pub softening: f32,
    /// Workgroups dispatched for the field stage.
    pub field_workgroups: u32,
}

impl Default for GravitySettings {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(1),
            max_frame_time: Duration::from_millis(250),
            gravitational_constant: 0.5,
            softening: 0.01,
            field_workgroups: 8,
        }
    }
}
