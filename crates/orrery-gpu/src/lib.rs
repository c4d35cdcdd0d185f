//! Vulkan abstraction layer for the Orrery engine.
//!
//! This crate provides:
//! - Vulkan instance, surface and device/queue management
//! - GPU capability detection
//! - Memory allocation via gpu-allocator, typed buffers and staging uploads
//! - Command buffer management
//! - Swapchain handling with per-frame synchronization
//! - Descriptor and pipeline helpers

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use ash::vk;
pub use buffer::{Buffer, BufferMemory};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{
    begin_command_buffer, end_command_buffer, submit_command_buffers, CommandPool, SemaphoreWait,
};
pub use context::{GpuContext, GpuContextBuilder, QueueKind};
pub use descriptors::{
    DescriptorPool, DescriptorResource, DescriptorSetLayoutBuilder, DescriptorSets, SetSpec,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::DEFAULT_DEPTH_FORMATS;
pub use surface::SurfaceSupport;
pub use swapchain::{create_image_view, SwapchainManager, SwapchainPreferences};
pub use sync::{create_fence, create_semaphore, FrameSync, FrameSyncRing, ImagesInFlight};
