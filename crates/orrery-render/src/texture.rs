//! Sampled 2D textures.

use ash::vk;
use orrery_gpu::{create_image_view, GpuContext, GpuError, GpuImage, QueueKind, Result};

/// Format every texture is stored in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Check that `pixels` holds exactly `width * height` RGBA8 texels.
pub fn check_rgba8(width: u32, height: u32, pixels: &[u8]) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(GpuError::InvalidState(format!(
            "Texture extent {width}x{height} is empty"
        )));
    }
    let expected = u64::from(width) * u64::from(height) * 4;
    if pixels.len() as u64 != expected {
        return Err(GpuError::InvalidState(format!(
            "Texture {width}x{height} needs {expected} bytes, got {}",
            pixels.len()
        )));
    }
    Ok(())
}

/// Image, view and sampler for one texture.
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
}

impl Texture {
    /// Upload tightly packed RGBA8 pixels and leave the image in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    pub fn from_rgba8(gpu: &GpuContext, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        check_rgba8(width, height, pixels)?;

        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let mut image = gpu.create_image_with_info(
            &image_info,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "texture",
        )?;

        let upload = Self::upload(gpu, image.image, extent, pixels);
        let view = upload.and_then(|()| unsafe {
            create_image_view(
                gpu.device(),
                image.image,
                TEXTURE_FORMAT,
                vk::ImageAspectFlags::COLOR,
            )
        });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                free_after_error(gpu, &mut image);
                return Err(e);
            }
        };

        let sampler = match create_sampler(gpu) {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { gpu.device().destroy_image_view(view, None) };
                free_after_error(gpu, &mut image);
                return Err(e);
            }
        };

        tracing::debug!("Texture {width}x{height} uploaded");
        Ok(Self {
            image,
            view,
            sampler,
            extent: vk::Extent2D { width, height },
        })
    }

    /// 1x1 opaque white, bound when a scene supplies no texture.
    pub fn white(gpu: &GpuContext) -> Result<Self> {
        Self::from_rgba8(gpu, 1, 1, &[255; 4])
    }

    fn upload(gpu: &GpuContext, image: vk::Image, extent: vk::Extent3D, pixels: &[u8]) -> Result<()> {
        let device = gpu.device();
        gpu.copy_with_staging(QueueKind::Graphics, pixels, |cmd, staging| unsafe {
            transition(
                device,
                cmd,
                image,
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
                (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .image_extent(extent);
            device.cmd_copy_buffer_to_image(
                cmd,
                staging,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            transition(
                device,
                cmd,
                image,
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
                (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
                (
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                ),
            );
        })
    }

    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// # Safety
    /// No descriptor set in use may reference the texture.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        unsafe {
            gpu.device().destroy_sampler(self.sampler, None);
            gpu.device().destroy_image_view(self.view, None);
        }
        gpu.free_image(&mut self.image)
    }
}

fn free_after_error(gpu: &GpuContext, image: &mut GpuImage) {
    if let Err(e) = gpu.free_image(image) {
        tracing::error!("Failed to free texture image after creation error: {e}");
    }
}

fn create_sampler(gpu: &GpuContext) -> Result<vk::Sampler> {
    let anisotropy = gpu.sampler_anisotropy();
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .max_lod(0.0);
    Ok(unsafe { gpu.device().create_sampler(&info, None)? })
}

unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    (src_stage, dst_stage): (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        )
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_buffer_must_match_extent() {
        assert!(check_rgba8(2, 2, &[0; 16]).is_ok());
        assert!(check_rgba8(2, 2, &[0; 15]).is_err());
        assert!(check_rgba8(2, 2, &[0; 12]).is_err());
    }

    #[test]
    fn empty_extent_rejected() {
        assert!(check_rgba8(0, 4, &[]).is_err());
        assert!(check_rgba8(4, 0, &[]).is_err());
    }
}
