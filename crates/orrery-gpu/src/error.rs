//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every variant except [`GpuError::SurfaceStale`] and
/// [`GpuError::SurfaceMinimized`] is fatal: the engine cannot continue without
/// the object that failed to be created.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The presentation surface no longer matches the swapchain.
    ///
    /// Raised by image acquisition (out of date) and presentation (out of
    /// date or suboptimal). The caller recreates the swapchain and retries.
    #[error("Swapchain is out of date with its surface")]
    SurfaceStale,

    /// The surface currently has no area, so no swapchain can be built for it.
    ///
    /// Raised by swapchain recreation while the window is minimized. The
    /// caller keeps the recreation pending and retries once the surface has
    /// an area again.
    #[error("Surface has a zero-area extent")]
    SurfaceMinimized,

    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be opened.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// No memory type satisfies a resource's requirements.
    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// No candidate format supports the requested usage.
    #[error("No supported format among {0:?}")]
    NoSupportedFormat(Vec<vk::Format>),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Descriptor pool or set allocation failed.
    #[error("Descriptor allocation failed: {0}")]
    DescriptorAllocation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Whether this is the recoverable "recreate the swapchain" signal.
    pub const fn is_surface_stale(&self) -> bool {
        matches!(self, Self::SurfaceStale)
    }

    /// Whether the surface has no area and recreation must wait.
    pub const fn is_surface_minimized(&self) -> bool {
        matches!(self, Self::SurfaceMinimized)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_surface_stale_is_recoverable() {
        assert!(GpuError::SurfaceStale.is_surface_stale());
        assert!(!GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_surface_stale());
        assert!(!GpuError::NoSuitableDevice.is_surface_stale());
        assert!(!GpuError::SurfaceMinimized.is_surface_stale());
    }

    #[test]
    fn minimized_surface_is_distinct_from_invalid_state() {
        assert!(GpuError::SurfaceMinimized.is_surface_minimized());
        assert!(!GpuError::InvalidState("zero extent".into()).is_surface_minimized());
        assert!(!GpuError::SurfaceStale.is_surface_minimized());
    }

    #[test]
    fn memory_type_error_names_filter() {
        let err = GpuError::NoSuitableMemoryType {
            type_filter: 0b101,
            properties: vk::MemoryPropertyFlags::HOST_VISIBLE,
        };
        assert!(err.to_string().contains("0b101"));
    }
}
