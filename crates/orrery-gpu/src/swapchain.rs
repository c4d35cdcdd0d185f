//! Swapchain management.
//!
//! [`SwapchainManager`] owns the presentable images together with everything
//! whose size follows them (depth buffers, framebuffers), the frame sync ring
//! and the image-in-flight map. Surface loss during acquire or present is
//! reported as [`GpuError::SurfaceStale`], and recreation against a zero-area
//! surface as [`GpuError::SurfaceMinimized`]. Every other failure is fatal.

use crate::command::{submit_command_buffers, SemaphoreWait};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use crate::render_pass::{create_render_pass, find_depth_format, DEFAULT_DEPTH_FORMATS};
use crate::surface::SurfaceSupport;
use crate::sync::{reset_fence, wait_for_fence, FrameSyncRing, ImagesInFlight};
use ash::vk;
use orrery_core::constants::{FRAMES_IN_FLIGHT, NO_TIMEOUT};

/// Pick the preferred format/colour space pair, else the first available.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| available.first().copied())
}

/// Prefer MAILBOX unless vsync is requested. FIFO is always available.
pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's fixed extent if it reports one, otherwise clamp the
/// requested window extent into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub const fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// A minimized window reports a zero-sized surface.
pub const fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// What the caller wants from the swapchain.
#[derive(Debug, Clone)]
pub struct SwapchainPreferences {
    /// Format and colour space used when the surface offers them.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Force FIFO presentation.
    pub vsync: bool,
    /// Depth formats tried in order.
    pub depth_formats: Vec<vk::Format>,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vsync: false,
            depth_formats: DEFAULT_DEPTH_FORMATS.to_vec(),
        }
    }
}

/// Swapchain wrapper with its per-image attachments.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth_images: Vec<GpuImage>,
    pub depth_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain and one depth buffer and framebuffer per image.
    ///
    /// # Safety
    /// All handles must be valid. `old_swapchain`, if given, must not be
    /// destroyed before this call returns.
    #[allow(clippy::too_many_arguments)]
    unsafe fn new(
        gpu: &GpuContext,
        support: &SurfaceSupport,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
        depth_format: vk::Format,
        render_pass: vk::RenderPass,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(gpu.surface())
            .min_image_count(image_count(&support.capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { gpu.swapchain_loader().create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_images: Vec::new(),
            depth_views: Vec::new(),
            framebuffers: Vec::new(),
            format: surface_format.format,
            extent,
        };

        // Partially built attachments are released on failure
        if let Err(e) = unsafe { this.create_attachments(gpu, depth_format, render_pass) } {
            unsafe { this.destroy(gpu) };
            return Err(e);
        }

        tracing::debug!(
            "Swapchain images={} depth={:?} present_mode={:?}",
            this.images.len(),
            depth_format,
            present_mode
        );
        Ok(this)
    }

    unsafe fn create_attachments(
        &mut self,
        gpu: &GpuContext,
        depth_format: vk::Format,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let device = gpu.device();
        self.images = unsafe { gpu.swapchain_loader().get_swapchain_images(self.swapchain)? };

        for &image in &self.images {
            let view = unsafe {
                create_image_view(device, image, self.format, vk::ImageAspectFlags::COLOR)?
            };
            self.image_views.push(view);

            let depth_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(depth_format)
                .extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let depth = gpu.create_image_with_info(
                &depth_info,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                "swapchain_depth",
            )?;
            let depth_view = unsafe {
                create_image_view(device, depth.image, depth_format, vk::ImageAspectFlags::DEPTH)
            };
            self.depth_images.push(depth);
            self.depth_views.push(depth_view?);

            let attachments = [view, self.depth_views[self.depth_views.len() - 1]];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None)? };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Destroy the swapchain and everything created with it.
    ///
    /// # Safety
    /// No in-flight command buffer may reference the images.
    unsafe fn destroy(&mut self, gpu: &GpuContext) {
        let device = gpu.device();
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.depth_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
        }
        for mut depth in self.depth_images.drain(..) {
            if let Err(e) = gpu.free_image(&mut depth) {
                tracing::error!("Failed to free depth image: {e}");
            }
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { gpu.swapchain_loader().destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}

/// Create a single-mip 2D view of `image`.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );
    let view = unsafe { device.create_image_view(&view_info, None)? };
    Ok(view)
}

/// Presentable images, their attachments and the per-frame sync objects.
pub struct SwapchainManager {
    render_pass: vk::RenderPass,
    surface_format: vk::SurfaceFormatKHR,
    preferences: SwapchainPreferences,
    present_mode: vk::PresentModeKHR,
    depth_format: vk::Format,
    swapchain: Swapchain,
    sync: FrameSyncRing,
    images_in_flight: ImagesInFlight<vk::Fence>,
}

impl SwapchainManager {
    /// Create the render pass, swapchain and sync ring.
    pub fn new(
        gpu: &GpuContext,
        requested: vk::Extent2D,
        preferences: SwapchainPreferences,
    ) -> Result<Self> {
        let support = SurfaceSupport::query(gpu)?;
        let surface_format = choose_surface_format(&support.formats, preferences.surface_format)
            .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&support.present_modes, preferences.vsync);
        let depth_format = find_depth_format(gpu, &preferences.depth_formats)?;

        let extent = choose_extent(&support.capabilities, requested);
        if is_degenerate(extent) {
            return Err(GpuError::SwapchainCreation(format!(
                "Degenerate extent {}x{}",
                extent.width, extent.height
            )));
        }

        let device = gpu.device();
        let render_pass =
            unsafe { create_render_pass(device, surface_format.format, depth_format)? };

        let swapchain = match unsafe {
            Swapchain::new(
                gpu,
                &support,
                surface_format,
                present_mode,
                extent,
                depth_format,
                render_pass,
                vk::SwapchainKHR::null(),
            )
        } {
            Ok(swapchain) => swapchain,
            Err(e) => {
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        let sync = unsafe { FrameSyncRing::new(device, FRAMES_IN_FLIGHT)? };
        let images_in_flight = ImagesInFlight::new(swapchain.images.len());

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            swapchain.images.len(),
            surface_format.format
        );

        Ok(Self {
            render_pass,
            surface_format,
            preferences,
            present_mode,
            depth_format,
            swapchain,
            sync,
            images_in_flight,
        })
    }

    /// Rebuild the swapchain and its extent-dependent attachments.
    ///
    /// Waits for the device to go idle first. The new swapchain is created
    /// with the current one as `old_swapchain`, which is destroyed only
    /// afterwards. The render pass is kept.
    ///
    /// Returns [`GpuError::SurfaceMinimized`] without touching the current
    /// swapchain when the surface reports a zero-area extent.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "debug", skip_all)
    )]
    pub fn recreate(&mut self, gpu: &GpuContext, requested: vk::Extent2D) -> Result<()> {
        gpu.wait_idle()?;

        let support = SurfaceSupport::query(gpu)?;
        let extent = choose_extent(&support.capabilities, requested);
        // The window can report an area while the surface still reports none
        if is_degenerate(extent) {
            tracing::debug!(
                "Surface extent is {}x{}; keeping the current swapchain",
                extent.width,
                extent.height
            );
            return Err(GpuError::SurfaceMinimized);
        }

        // The render pass is derived from the surface format and is not rebuilt
        if let Some(format) =
            choose_surface_format(&support.formats, self.preferences.surface_format)
        {
            if format != self.surface_format {
                tracing::warn!(
                    "Surface format changed from {:?} to {:?}; keeping render pass format",
                    self.surface_format.format,
                    format.format
                );
            }
        }
        self.present_mode = choose_present_mode(&support.present_modes, self.preferences.vsync);

        let new_swapchain = unsafe {
            Swapchain::new(
                gpu,
                &support,
                self.surface_format,
                self.present_mode,
                extent,
                self.depth_format,
                self.render_pass,
                self.swapchain.swapchain,
            )?
        };
        let mut old = std::mem::replace(&mut self.swapchain, new_swapchain);
        unsafe { old.destroy(gpu) };

        self.images_in_flight.reset(self.swapchain.images.len());

        tracing::info!(
            "Swapchain recreated: {}x{}, {} images",
            extent.width,
            extent.height,
            self.swapchain.images.len()
        );
        Ok(())
    }

    /// Wait for `slot`'s fence, then acquire the next presentable image.
    ///
    /// A suboptimal acquire still returns the image. The slot's fence is left
    /// signaled so a stale result can be retried after recreation.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next_image(&self, gpu: &GpuContext, slot: usize) -> Result<u32> {
        let sync = self.sync.slot(slot);
        unsafe { sync.wait(gpu.device())? };

        let result = unsafe {
            gpu.swapchain_loader().acquire_next_image(
                self.swapchain.swapchain,
                NO_TIMEOUT,
                sync.image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    tracing::debug!("Acquired suboptimal image {index}");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SurfaceStale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Submit `cmd` for `slot` and present `image`.
    ///
    /// The submission waits on the slot's image-available semaphore at colour
    /// output plus any `extra_waits`, signals render-finished and the slot's
    /// fence. If another slot's fence still guards `image` it is waited on
    /// first.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit_and_present(
        &mut self,
        gpu: &GpuContext,
        cmd: vk::CommandBuffer,
        slot: usize,
        image: u32,
        extra_waits: &[SemaphoreWait],
    ) -> Result<()> {
        let device = gpu.device();
        let sync = *self.sync.slot(slot);

        if let Some(previous) = self.images_in_flight.claim(image, sync.in_flight) {
            unsafe { wait_for_fence(device, previous, NO_TIMEOUT)? };
        }

        let mut waits = Vec::with_capacity(1 + extra_waits.len());
        waits.push(SemaphoreWait::new(
            sync.image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ));
        waits.extend_from_slice(extra_waits);

        unsafe {
            reset_fence(device, sync.in_flight)?;
            submit_command_buffers(
                device,
                gpu.graphics_queue(),
                &[cmd],
                &waits,
                &[sync.render_finished],
                sync.in_flight,
            )?;
        }

        let wait_semaphores = [sync.render_finished];
        let swapchains = [self.swapchain.swapchain];
        let image_indices = [image];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            gpu.swapchain_loader()
                .queue_present(gpu.graphics_queue(), &present_info)
        } {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SurfaceStale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// The render pass all framebuffers are compatible with.
    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Current swapchain handle.
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.swapchain
    }

    /// Current extent.
    pub const fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Width over height.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        }
    }

    /// Framebuffer for a swapchain image.
    pub fn framebuffer(&self, image: u32) -> Option<vk::Framebuffer> {
        self.swapchain.framebuffers.get(image as usize).copied()
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    /// Colour attachment format.
    pub const fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Depth attachment format.
    pub const fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Present mode in use.
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    /// Destroy the swapchain, render pass and sync objects.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        let device = gpu.device();
        unsafe {
            self.swapchain.destroy(gpu);
            device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
            self.sync.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn preferred_surface_format() {
        let preferred = SwapchainPreferences::default().surface_format;
        let available = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            choose_surface_format(&available, preferred),
            Some(format(vk::Format::B8G8R8A8_SRGB))
        );
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let preferred = SwapchainPreferences::default().surface_format;
        let available = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&available, preferred),
            Some(format(vk::Format::R8G8B8A8_UNORM))
        );
        assert_eq!(choose_surface_format(&[], preferred), None);
    }

    #[test]
    fn colour_space_must_match() {
        let preferred = SwapchainPreferences::default().surface_format;
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            },
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(choose_surface_format(&available, preferred), Some(available[1]));
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_extent_wins() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let requested = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert_eq!(choose_extent(&c, requested), c.current_extent);
    }

    #[test]
    fn requested_extent_is_clamped() {
        let c = caps(2, 3);
        let extent = choose_extent(
            &c,
            vk::Extent2D {
                width: 8000,
                height: 10,
            },
        );
        assert_eq!(extent.width, 4096);
        assert_eq!(extent.height, 64);
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(image_count(&caps(2, 0)), 3);
        assert_eq!(image_count(&caps(2, 8)), 3);
        assert_eq!(image_count(&caps(3, 3)), 3);
        assert_eq!(image_count(&caps(1, 2)), 2);
    }

    #[test]
    fn recreation_choices_are_stable() {
        // Same surface state must give the same image count and format
        let c = caps(2, 0);
        let formats = [format(vk::Format::B8G8R8A8_SRGB)];
        let preferred = SwapchainPreferences::default().surface_format;
        let requested = vk::Extent2D {
            width: 1280,
            height: 720,
        };

        let first = (
            image_count(&c),
            choose_surface_format(&formats, preferred),
            choose_extent(&c, requested),
        );
        for _ in 0..3 {
            let again = (
                image_count(&c),
                choose_surface_format(&formats, preferred),
                choose_extent(&c, requested),
            );
            assert_eq!(again, first);
        }
    }

    #[test]
    fn degenerate_extents() {
        assert!(is_degenerate(vk::Extent2D {
            width: 0,
            height: 600
        }));
        assert!(is_degenerate(vk::Extent2D {
            width: 800,
            height: 0
        }));
        assert!(!is_degenerate(vk::Extent2D {
            width: 1,
            height: 1
        }));
    }
}
