//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::command::{execute_single_time_commands, CommandPool};
use crate::debug::DebugMessenger;
use crate::error::{GpuError, Result};
use crate::instance::{
    create_instance, required_device_extensions, select_physical_device, QueueFamilies,
};
use crate::memory::{GpuAllocator, GpuBuffer, GpuImage};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Queue a piece of work is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Graphics,
    Compute,
}

/// Main GPU context holding Vulkan resources.
///
/// Owns the instance, the presentation surface, the logical device with its
/// graphics and compute queues, one command pool per queue and the memory
/// allocator. The queue families are chosen once at build time.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,
    anisotropy_enabled: bool,

    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    graphics_pool: CommandPool,
    compute_pool: CommandPool,
}

impl GpuContext {
    /// Start building a context.
    pub fn builder() -> GpuContextBuilder {
        GpuContextBuilder::new()
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Presentation surface.
    pub const fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader.
    pub const fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Swapchain extension loader.
    pub const fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Chosen queue families.
    pub const fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Get the graphics queue (also used for presentation).
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the compute queue.
    pub const fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the graphics queue family index.
    pub const fn graphics_queue_family(&self) -> u32 {
        self.queue_families.graphics
    }

    /// Get the compute queue family index.
    pub const fn compute_queue_family(&self) -> u32 {
        self.queue_families.compute
    }

    /// Queue handle for a queue kind.
    pub const fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Compute => self.compute_queue,
        }
    }

    /// Command pool for a queue kind.
    pub const fn command_pool(&self, kind: QueueKind) -> &CommandPool {
        match kind {
            QueueKind::Graphics => &self.graphics_pool,
            QueueKind::Compute => &self.compute_pool,
        }
    }

    /// Maximum sampler anisotropy, when the feature was enabled.
    pub fn sampler_anisotropy(&self) -> Option<f32> {
        self.anisotropy_enabled
            .then_some(self.capabilities.max_sampler_anisotropy)
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Format properties of the physical device for `format`.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Create a buffer whose memory has the given properties.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.allocator
            .lock()
            .create_buffer(size, usage, properties, &[], name)
    }

    /// Create a buffer usable from both the graphics and compute queues
    /// without ownership transfers.
    pub fn create_shared_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let families = [self.queue_families.graphics, self.queue_families.compute];
        let families: &[u32] = if self.queue_families.has_dedicated_compute() {
            &families
        } else {
            &families[..1]
        };
        self.allocator
            .lock()
            .create_buffer(size, usage, properties, families, name)
    }

    /// Create an image whose memory has the given properties.
    pub fn create_image_with_info(
        &self,
        create_info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuImage> {
        self.allocator
            .lock()
            .create_image(create_info, properties, name)
    }

    /// Free a buffer created by this context.
    pub fn free_buffer(&self, buffer: &mut GpuBuffer) -> Result<()> {
        self.allocator.lock().free_buffer(buffer)
    }

    /// Free an image created by this context.
    pub fn free_image(&self, image: &mut GpuImage) -> Result<()> {
        self.allocator.lock().free_image(image)
    }

    /// Upload `data` through a transient host-visible buffer.
    ///
    /// `record` receives a one-shot command buffer and the staging buffer and
    /// records whatever copy (buffer to buffer, buffer to image with layout
    /// transitions) moves the data to its destination. The call blocks until
    /// the queue is idle, so it is only meant for startup-time uploads.
    pub fn copy_with_staging<F>(&self, queue: QueueKind, data: &[u8], record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, vk::Buffer),
    {
        if data.is_empty() {
            return Err(GpuError::InvalidState("Empty staging upload".to_string()));
        }

        let mut staging = self.create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            "staging",
        )?;

        let result = staging.write_bytes(0, data).and_then(|()| unsafe {
            execute_single_time_commands(
                &self.device,
                self.command_pool(queue),
                self.queue(queue),
                |cmd| record(cmd, staging.buffer),
            )
        });

        self.free_buffer(&mut staging)?;
        result
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.graphics_pool.destroy(&self.device);
            self.compute_pool.destroy(&self.device);

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Orrery".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context for a window.
    ///
    /// The surface is created first so that the graphics queue family can be
    /// chosen among those able to present to it.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let (instance, validation) =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, display)? };

        let debug = if validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance)? })
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display, window_handle, None)
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let candidate = unsafe { select_physical_device(&instance, &surface_loader, surface)? };
        let capabilities = candidate.capabilities;
        let queue_families = candidate.queue_families;
        let physical_device = candidate.physical_device;

        tracing::info!("Selected GPU: {}", capabilities.summary());
        tracing::debug!(
            "Queue families: graphics={} compute={} (dedicated compute: {})",
            queue_families.graphics,
            queue_families.compute,
            queue_families.has_dedicated_compute()
        );

        let anisotropy_enabled = capabilities.sampler_anisotropy;
        let device = unsafe {
            create_device(&instance, physical_device, queue_families, anisotropy_enabled)?
        };
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let compute_queue = unsafe { device.get_device_queue(queue_families.compute, 0) };

        let device = Arc::new(device);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let graphics_pool = unsafe { CommandPool::new(&device, queue_families.graphics)? };
        let compute_pool = unsafe { CommandPool::new(&device, queue_families.compute)? };

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device)? };

        Ok(GpuContext {
            entry,
            instance,
            debug,
            surface,
            surface_loader,
            swapchain_loader,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            anisotropy_enabled,
            queue_families,
            graphics_queue,
            compute_queue,
            graphics_pool,
            compute_pool,
        })
    }
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
    enable_anisotropy: bool,
) -> Result<ash::Device> {
    let mut unique_families = vec![queue_families.graphics];
    if queue_families.has_dedicated_compute() {
        unique_families.push(queue_families.compute);
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(enable_anisotropy);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

    Ok(device)
}
