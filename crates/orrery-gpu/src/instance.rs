//! Vulkan instance creation and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layer enabled when validation is requested.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions the engine cannot run without.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::khr::swapchain::NAME]
}

/// Create a Vulkan instance able to present to the given display.
///
/// Returns the instance and whether the validation layer was actually enabled.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Orrery")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    // Platform surface extensions come from the window provider
    let mut extension_names: Vec<*const c_char> =
        ash_window::enumerate_required_extensions(display)?.to_vec();

    let validation = enable_validation && unsafe { validation_layer_available(entry)? };
    if enable_validation && !validation {
        tracing::warn!(
            "Validation layer {} not available",
            VALIDATION_LAYER.to_string_lossy()
        );
    }
    if validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layer_names: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    Ok((instance, validation))
}

unsafe fn validation_layer_available(entry: &ash::Entry) -> Result<bool> {
    let available = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(available.iter().any(|props| {
        props
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER)
    }))
}

/// Queue family indices chosen for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics family, also able to present to the surface.
    pub graphics: u32,
    /// Compute family; equals `graphics` when no dedicated family exists.
    pub compute: u32,
}

impl QueueFamilies {
    /// Whether compute work runs on a different family than graphics.
    pub const fn has_dedicated_compute(&self) -> bool {
        self.graphics != self.compute
    }
}

/// Pick queue families from a device's family list.
///
/// The graphics family must also support presentation. Compute prefers a
/// family without graphics support and falls back to the first compute
/// capable family.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut dedicated_compute = None;
    let mut any_compute = None;

    for (i, family) in (0u32..).zip(families) {
        if family.queue_count == 0 {
            continue;
        }

        let flags = family.queue_flags;
        if flags.contains(vk::QueueFlags::COMPUTE) {
            any_compute.get_or_insert(i);
            if !flags.contains(vk::QueueFlags::GRAPHICS) {
                dedicated_compute.get_or_insert(i);
            }
        }

        if graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) && supports_present(i) {
            graphics = Some(i);
        }
    }

    let graphics = graphics?;
    let compute = dedicated_compute.or(any_compute)?;

    Some(QueueFamilies { graphics, compute })
}

/// A physical device that can drive the surface.
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub capabilities: GpuCapabilities,
}

/// Select the best physical device able to present to `surface`.
///
/// # Safety
/// The instance, surface loader and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<DeviceCandidate> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best: Option<(i32, DeviceCandidate)> = None;

    for device in devices {
        let capabilities = unsafe { GpuCapabilities::query(instance, device) };
        if !capabilities.meets_requirements() {
            tracing::debug!("Skipping {}: missing requirements", capabilities.device_name);
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let Some(queue_families) = find_queue_families(&families, |i| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        }) else {
            tracing::debug!("Skipping {}: no presentable graphics queue", capabilities.device_name);
            continue;
        };

        // A device must expose at least one format and present mode for the surface
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(device, surface)? };
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface)? };
        if formats.is_empty() || present_modes.is_empty() {
            continue;
        }

        let score = capabilities.score();
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((
                score,
                DeviceCandidate {
                    physical_device: device,
                    queue_families,
                    capabilities,
                },
            ));
        }
    }

    best.map(|(_, candidate)| candidate)
        .ok_or(GpuError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn graphics_family_must_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let chosen = find_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(chosen.graphics, 1);
        assert_eq!(chosen.compute, 0);
    }

    #[test]
    fn dedicated_compute_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let chosen = find_queue_families(&families, |_| true).unwrap();
        assert_eq!(chosen.graphics, 0);
        assert_eq!(chosen.compute, 2);
        assert!(chosen.has_dedicated_compute());
    }

    #[test]
    fn compute_falls_back_to_graphics_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let chosen = find_queue_families(&families, |_| true).unwrap();
        assert_eq!(chosen.compute, chosen.graphics);
        assert!(!chosen.has_dedicated_compute());
    }

    #[test]
    fn no_present_support_means_no_device() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        assert!(find_queue_families(&families, |_| false).is_none());
    }

    #[test]
    fn empty_families_are_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let chosen = find_queue_families(&families, |_| true).unwrap();
        assert_eq!(chosen.graphics, 1);
        assert_eq!(chosen.compute, 1);
    }
}
