//! Surface support queries.

use crate::context::GpuContext;
use crate::error::Result;
use ash::vk;

/// What the surface supports on the selected physical device.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query the context's surface.
    ///
    /// Called on every swapchain (re)creation since the current extent and
    /// image count limits follow the window.
    pub fn query(gpu: &GpuContext) -> Result<Self> {
        let loader = gpu.surface_loader();
        let physical_device = gpu.physical_device();
        let surface = gpu.surface();

        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }

    /// Whether a swapchain can be built at all.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adequacy_requires_formats_and_modes() {
        let mut support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!support.is_adequate());

        support.formats.push(vk::SurfaceFormatKHR::default());
        assert!(support.is_adequate());

        support.present_modes.clear();
        assert!(!support.is_adequate());
    }
}
