//! Descriptor set management.
//!
//! [`DescriptorSets::allocate`] takes a list of [`SetSpec`]s describing the
//! resources each set binds, creates a single pool sized for all of them, one
//! layout per distinct set shape, and fills every set with one batched
//! `vkUpdateDescriptorSets` call.

use crate::error::{GpuError, Result};
use ash::vk;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a storage buffer binding.
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding.
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a combined image sampler binding.
    #[must_use]
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| GpuError::DescriptorAllocation(format!("Set layout: {e}")))?;
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| GpuError::DescriptorAllocation(format!("Pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate descriptor sets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| GpuError::DescriptorAllocation(format!("Sets: {e}")))?;
        Ok(sets)
    }

    /// Destroy the pool, freeing every set allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// A resource bound at one binding slot.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    UniformBuffer(vk::Buffer),
    StorageBuffer(vk::Buffer),
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

impl DescriptorResource {
    /// Vulkan descriptor type for this resource.
    pub const fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One binding of a [`SetSpec`].
#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub stages: vk::ShaderStageFlags,
    pub resource: DescriptorResource,
}

/// Layout-relevant part of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingShape {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// Resources one descriptor set binds.
#[derive(Debug, Clone, Default)]
pub struct SetSpec {
    bindings: Vec<DescriptorBinding>,
}

impl SetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bind(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        resource: DescriptorResource,
    ) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            stages,
            resource,
        });
        self
    }

    /// Bind the whole of `buffer` as a uniform buffer.
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags, buffer: vk::Buffer) -> Self {
        self.bind(binding, stages, DescriptorResource::UniformBuffer(buffer))
    }

    /// Bind the whole of `buffer` as a storage buffer.
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stages: vk::ShaderStageFlags, buffer: vk::Buffer) -> Self {
        self.bind(binding, stages, DescriptorResource::StorageBuffer(buffer))
    }

    /// Bind a sampled image in shader-read-only layout.
    #[must_use]
    pub fn sampled_image(
        self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        self.bind(
            binding,
            stages,
            DescriptorResource::CombinedImageSampler { view, sampler },
        )
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Layout shape, ordered by binding index.
    pub fn shape(&self) -> Vec<BindingShape> {
        let mut shape: Vec<BindingShape> = self
            .bindings
            .iter()
            .map(|b| BindingShape {
                binding: b.binding,
                descriptor_type: b.resource.descriptor_type(),
                stages: b.stages,
            })
            .collect();
        shape.sort_by_key(|s| s.binding);
        shape
    }
}

/// Pool sizes covering every descriptor of every set, one entry per type in
/// order of first appearance.
pub fn pool_sizes(specs: &[SetSpec]) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in specs.iter().flat_map(SetSpec::bindings) {
        let ty = binding.resource.descriptor_type();
        match sizes.iter_mut().find(|s| s.ty == ty) {
            Some(size) => size.descriptor_count += 1,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: 1,
            }),
        }
    }
    sizes
}

/// Distinct set shapes and, for each spec, the index of its shape.
pub fn distinct_shapes(specs: &[SetSpec]) -> (Vec<Vec<BindingShape>>, Vec<usize>) {
    let mut shapes: Vec<Vec<BindingShape>> = Vec::new();
    let mut indices = Vec::with_capacity(specs.len());
    for spec in specs {
        let shape = spec.shape();
        let index = if let Some(i) = shapes.iter().position(|s| *s == shape) {
            i
        } else {
            shapes.push(shape);
            shapes.len() - 1
        };
        indices.push(index);
    }
    (shapes, indices)
}

fn check_unique_bindings(spec: &SetSpec) -> Result<()> {
    let shape = spec.shape();
    if shape.windows(2).any(|w| w[0].binding == w[1].binding) {
        return Err(GpuError::DescriptorAllocation(
            "Duplicate binding index in descriptor set".to_string(),
        ));
    }
    Ok(())
}

/// Descriptor sets allocated together from one pool.
pub struct DescriptorSets {
    pool: DescriptorPool,
    layouts: Vec<vk::DescriptorSetLayout>,
    layout_of_set: Vec<usize>,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSets {
    /// Create the pool, layouts and sets for `specs` and write every binding.
    ///
    /// # Safety
    /// The device and every referenced resource must be valid.
    pub unsafe fn allocate(device: &ash::Device, specs: &[SetSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(GpuError::DescriptorAllocation("No descriptor sets requested".to_string()));
        }
        for spec in specs {
            check_unique_bindings(spec)?;
        }

        let (shapes, layout_of_set) = distinct_shapes(specs);

        let mut layouts = Vec::with_capacity(shapes.len());
        for shape in &shapes {
            let builder = shape.iter().fold(DescriptorSetLayoutBuilder::new(), |b, s| {
                b.binding(s.binding, s.descriptor_type, 1, s.stages)
            });
            match unsafe { builder.build(device) } {
                Ok(layout) => layouts.push(layout),
                Err(e) => {
                    unsafe { destroy_layouts(device, &layouts) };
                    return Err(e);
                }
            }
        }

        let sizes = pool_sizes(specs);
        let pool = match unsafe { DescriptorPool::new(device, specs.len() as u32, &sizes) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { destroy_layouts(device, &layouts) };
                return Err(e);
            }
        };

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            layout_of_set.iter().map(|&i| layouts[i]).collect();
        let sets = match unsafe { pool.allocate(device, &set_layouts) } {
            Ok(sets) => sets,
            Err(e) => {
                unsafe {
                    pool.destroy(device);
                    destroy_layouts(device, &layouts);
                }
                return Err(e);
            }
        };

        unsafe { write_all(device, specs, &sets) };

        tracing::debug!(
            "Allocated {} descriptor sets with {} layouts",
            sets.len(),
            layouts.len()
        );

        Ok(Self {
            pool,
            layouts,
            layout_of_set,
            sets,
        })
    }

    /// Set allocated for the `index`th spec.
    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    /// Layout of the `index`th spec's set.
    pub fn layout(&self, index: usize) -> vk::DescriptorSetLayout {
        self.layouts[self.layout_of_set[index]]
    }

    /// Distinct layouts.
    pub fn layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.layouts
    }

    /// Destroy the pool (and its sets) and the layouts.
    ///
    /// # Safety
    /// No pipeline layout or command buffer in flight may use them.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            self.pool.destroy(device);
            destroy_layouts(device, &self.layouts);
        }
        self.layouts.clear();
        self.sets.clear();
    }
}

unsafe fn destroy_layouts(device: &ash::Device, layouts: &[vk::DescriptorSetLayout]) {
    for &layout in layouts {
        unsafe { device.destroy_descriptor_set_layout(layout, None) };
    }
}

/// Write every binding of every set in one update call.
unsafe fn write_all(device: &ash::Device, specs: &[SetSpec], sets: &[vk::DescriptorSet]) {
    // Info arrays are filled before any write references them
    let mut buffer_infos = Vec::new();
    let mut image_infos = Vec::new();
    for binding in specs.iter().flat_map(SetSpec::bindings) {
        match binding.resource {
            DescriptorResource::UniformBuffer(buffer) | DescriptorResource::StorageBuffer(buffer) => {
                buffer_infos.push(
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer)
                        .offset(0)
                        .range(vk::WHOLE_SIZE),
                );
            }
            DescriptorResource::CombinedImageSampler { view, sampler } => {
                image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(view)
                        .sampler(sampler)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                );
            }
        }
    }

    let mut writes = Vec::with_capacity(buffer_infos.len() + image_infos.len());
    let (mut next_buffer, mut next_image) = (0, 0);
    for (spec, &set) in specs.iter().zip(sets) {
        for binding in spec.bindings() {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(binding.binding)
                .descriptor_type(binding.resource.descriptor_type());
            let write = match binding.resource {
                DescriptorResource::CombinedImageSampler { .. } => {
                    next_image += 1;
                    write.image_info(std::slice::from_ref(&image_infos[next_image - 1]))
                }
                _ => {
                    next_buffer += 1;
                    write.buffer_info(std::slice::from_ref(&buffer_infos[next_buffer - 1]))
                }
            };
            writes.push(write);
        }
    }

    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    fn frame_set(ubo: u64, field: u64) -> SetSpec {
        SetSpec::new()
            .uniform_buffer(0, vk::ShaderStageFlags::ALL_GRAPHICS, buffer(ubo))
            .sampled_image(
                1,
                vk::ShaderStageFlags::FRAGMENT,
                vk::ImageView::null(),
                vk::Sampler::null(),
            )
            .storage_buffer(2, vk::ShaderStageFlags::VERTEX, buffer(field))
    }

    #[test]
    fn pool_sizes_sum_all_sets() {
        let compute = SetSpec::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE, buffer(10))
            .storage_buffer(1, vk::ShaderStageFlags::COMPUTE, buffer(11));
        let specs = [frame_set(1, 2), frame_set(3, 4), compute];

        let sizes = pool_sizes(&specs);
        let count = |ty| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map_or(0, |s| s.descriptor_count)
        };
        assert_eq!(sizes.len(), 3);
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), 2);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 2);
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), 4);
    }

    #[test]
    fn identical_shapes_share_a_layout() {
        let compute = SetSpec::new().storage_buffer(0, vk::ShaderStageFlags::COMPUTE, buffer(9));
        let specs = [frame_set(1, 2), compute, frame_set(3, 4)];

        let (shapes, indices) = distinct_shapes(&specs);
        assert_eq!(shapes.len(), 2);
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn shape_ignores_binding_order_and_resources() {
        let a = SetSpec::new()
            .storage_buffer(1, vk::ShaderStageFlags::COMPUTE, buffer(1))
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE, buffer(2));
        let b = SetSpec::new()
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE, buffer(3))
            .storage_buffer(1, vk::ShaderStageFlags::COMPUTE, buffer(4));
        assert_eq!(a.shape(), b.shape());

        let c = SetSpec::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX, buffer(3))
            .storage_buffer(1, vk::ShaderStageFlags::COMPUTE, buffer(4));
        assert_ne!(a.shape(), c.shape());
    }

    #[test]
    fn duplicate_bindings_rejected() {
        let spec = SetSpec::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE, buffer(1))
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE, buffer(2));
        assert!(check_unique_bindings(&spec).is_err());
        assert!(check_unique_bindings(&frame_set(1, 2)).is_ok());
    }
}
