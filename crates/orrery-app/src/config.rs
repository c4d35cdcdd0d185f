//! Application configuration.

use orrery_render::RenderSettings;
use orrery_shaders::ShaderLibrary;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Force FIFO presentation instead of preferring mailbox.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Directory holding compiled `<name>.spv` shaders.
    ///
    /// `None` falls back to `ORRERY_SHADER_DIR`, then the bundled directory.
    pub shader_dir: Option<PathBuf>,
    /// Colour the frame is cleared to.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Orrery".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: false,
            validation: cfg!(debug_assertions),
            shader_dir: None,
            clear_color: RenderSettings::default().clear_color,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Load shaders from `dir`.
    #[must_use]
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Frame pacing interval, if a target FPS is set.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }

    /// Renderer settings derived from this config.
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings::default()
            .with_vsync(self.vsync)
            .with_clear_color(self.clear_color)
    }

    /// Shader library for the configured directory.
    pub fn shader_library(&self) -> ShaderLibrary {
        self.shader_dir
            .as_ref()
            .map_or_else(ShaderLibrary::from_env, ShaderLibrary::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = AppConfig::new("test")
            .with_size(640, 480)
            .with_vsync(true)
            .with_validation(false)
            .with_target_fps(60)
            .with_shader_dir("/tmp/spv");
        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(config.vsync);
        assert!(!config.validation);
        assert_eq!(config.shader_library().dir(), std::path::Path::new("/tmp/spv"));
    }

    #[test]
    fn frame_time_from_fps() {
        let config = AppConfig::default().with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert_eq!(AppConfig::default().target_frame_time(), None);
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }

    #[test]
    fn vsync_flows_into_render_settings() {
        let settings = AppConfig::default().with_vsync(true).render_settings();
        assert!(settings.swapchain.vsync);
        assert_eq!(settings.clear_color, [0.1, 0.1, 0.1, 1.0]);
    }
}
