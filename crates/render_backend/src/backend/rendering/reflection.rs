//! Shader resource metadata and descriptor layout derivation
//!
//! Shader tooling reports, per stage, which resources a shader reads:
//! set/binding, resource kind and count, plus push-constant blocks. Merging
//! the reports of every stage yields the pipeline's [`ResourceLayout`].

use ash::vk;
use std::collections::BTreeMap;

use crate::backend::{VulkanError, VulkanResult};

/// Kind of shader-visible resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
    /// Combined image and sampler
    SampledImage,
    /// Storage image
    StorageImage,
    /// Subpass input attachment
    InputAttachment,
    /// Standalone sampler
    Sampler,
}

impl ResourceKind {
    /// Vulkan descriptor type
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }

    /// Whether the descriptor refers to a buffer
    pub fn is_buffer(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }
}

/// One descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBinding {
    /// Descriptor set index
    pub set: u32,
    /// Binding within the set
    pub binding: u32,
    /// Resource kind
    pub kind: ResourceKind,
    /// Array length
    pub count: u32,
    /// Stages reading the binding
    pub stages: vk::ShaderStageFlags,
}

/// A push-constant range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantBlock {
    /// Byte offset
    pub offset: u32,
    /// Byte size
    pub size: u32,
    /// Stages reading the block
    pub stages: vk::ShaderStageFlags,
}

/// Resources used by a single shader stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    bindings: Vec<(u32, u32, ResourceKind, u32)>,
    push_constant: Option<(u32, u32)>,
}

impl ShaderReflection {
    /// Empty reflection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding of `count` descriptors
    pub fn with_binding(mut self, set: u32, binding: u32, kind: ResourceKind, count: u32) -> Self {
        self.bindings.push((set, binding, kind, count));
        self
    }

    /// Declare the stage's push-constant block
    pub fn with_push_constant(mut self, offset: u32, size: u32) -> Self {
        self.push_constant = Some((offset, size));
        self
    }

    /// Whether the stage uses no resources
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.push_constant.is_none()
    }
}

/// Descriptor-set layouts and push-constant ranges of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLayout {
    sets: BTreeMap<u32, Vec<ResourceBinding>>,
    push_constants: Vec<PushConstantBlock>,
}

impl ResourceLayout {
    /// Merge per-stage reflections
    ///
    /// A binding reported by several stages has its stage masks OR-ed; the
    /// stages must agree on kind and count.
    pub fn from_reflections<'a>(
        stages: impl IntoIterator<Item = (vk::ShaderStageFlags, &'a ShaderReflection)>,
    ) -> VulkanResult<Self> {
        let mut layout = Self::default();
        for (stage, reflection) in stages {
            for &(set, binding, kind, count) in &reflection.bindings {
                layout.add_binding(ResourceBinding {
                    set,
                    binding,
                    kind,
                    count,
                    stages: stage,
                })?;
            }
            if let Some((offset, size)) = reflection.push_constant {
                layout.add_push_constant(PushConstantBlock { offset, size, stages: stage })?;
            }
        }
        Ok(layout)
    }

    /// Layout from an explicit binding list
    pub fn from_explicit(bindings: &[ResourceBinding], push_constants: &[PushConstantBlock]) -> VulkanResult<Self> {
        let mut layout = Self::default();
        for binding in bindings {
            layout.add_binding(*binding)?;
        }
        for block in push_constants {
            layout.add_push_constant(*block)?;
        }
        Ok(layout)
    }

    fn add_binding(&mut self, incoming: ResourceBinding) -> VulkanResult<()> {
        if incoming.count == 0 {
            return Err(VulkanError::invalid(format!(
                "binding {}.{} has zero descriptors",
                incoming.set, incoming.binding
            )));
        }
        let set = self.sets.entry(incoming.set).or_default();
        match set.iter_mut().find(|b| b.binding == incoming.binding) {
            Some(existing) if existing.kind == incoming.kind && existing.count == incoming.count => {
                existing.stages |= incoming.stages;
            }
            Some(existing) => {
                return Err(VulkanError::invalid(format!(
                    "binding {}.{} declared as {:?}[{}] and {:?}[{}]",
                    incoming.set, incoming.binding, existing.kind, existing.count, incoming.kind, incoming.count
                )))
            }
            None => {
                set.push(incoming);
                set.sort_by_key(|b| b.binding);
            }
        }
        Ok(())
    }

    fn add_push_constant(&mut self, incoming: PushConstantBlock) -> VulkanResult<()> {
        if incoming.size == 0 || incoming.size % 4 != 0 || incoming.offset % 4 != 0 {
            return Err(VulkanError::invalid(format!(
                "push constant block {}+{} is not 4-byte aligned",
                incoming.offset, incoming.size
            )));
        }
        if let Some(existing) = self
            .push_constants
            .iter_mut()
            .find(|b| b.offset == incoming.offset && b.size == incoming.size)
        {
            existing.stages |= incoming.stages;
            return Ok(());
        }
        if self.push_constants.iter().any(|b| b.stages.intersects(incoming.stages)) {
            return Err(VulkanError::invalid(format!(
                "stage {:?} declares more than one push constant block",
                incoming.stages
            )));
        }
        self.push_constants.push(incoming);
        Ok(())
    }

    /// Bindings of each set index, sorted by binding
    pub fn sets(&self) -> impl Iterator<Item = (u32, &[ResourceBinding])> {
        self.sets.iter().map(|(index, bindings)| (*index, bindings.as_slice()))
    }

    /// Bindings of one set, sorted by binding
    pub fn set(&self, index: u32) -> &[ResourceBinding] {
        self.sets.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of descriptor-set layouts, counting gaps in set indices
    pub fn set_count(&self) -> u32 {
        self.sets.keys().next_back().map(|last| last + 1).unwrap_or(0)
    }

    /// Push-constant blocks in declaration order
    pub fn push_constants(&self) -> &[PushConstantBlock] {
        &self.push_constants
    }

    /// Vulkan push-constant ranges
    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.push_constants
            .iter()
            .map(|block| vk::PushConstantRange {
                stage_flags: block.stages,
                offset: block.offset,
                size: block.size,
            })
            .collect()
    }

    /// Vulkan bindings of one set
    pub fn layout_bindings(&self, set: u32) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.set(set)
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.kind.to_vk())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect()
    }

    /// Pool sizes for `max_sets` allocations of every set
    pub fn pool_sizes(&self, max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut totals: BTreeMap<i32, u32> = BTreeMap::new();
        for bindings in self.sets.values() {
            for binding in bindings {
                *totals.entry(binding.kind.to_vk().as_raw()).or_default() += binding.count * max_sets;
            }
        }
        totals
            .into_iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from_raw(ty),
                descriptor_count,
            })
            .collect()
    }

    /// Whether the pipeline binds no descriptors
    pub fn has_descriptors(&self) -> bool {
        self.sets.values().any(|bindings| !bindings.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_binding_merges_stage_masks() {
        let vertex = ShaderReflection::new()
            .with_binding(0, 0, ResourceKind::UniformBuffer, 1)
            .with_push_constant(0, 64);
        let fragment = ShaderReflection::new()
            .with_binding(0, 0, ResourceKind::UniformBuffer, 1)
            .with_binding(0, 1, ResourceKind::SampledImage, 1)
            .with_push_constant(0, 64);

        let layout = ResourceLayout::from_reflections([
            (vk::ShaderStageFlags::VERTEX, &vertex),
            (vk::ShaderStageFlags::FRAGMENT, &fragment),
        ])
        .unwrap();

        let set = layout.set(0);
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(set[1].stages, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(layout.push_constants().len(), 1);
        assert_eq!(
            layout.push_constants()[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_conflicting_kinds_are_rejected() {
        let vertex = ShaderReflection::new().with_binding(0, 0, ResourceKind::UniformBuffer, 1);
        let fragment = ShaderReflection::new().with_binding(0, 0, ResourceKind::StorageBuffer, 1);
        let result = ResourceLayout::from_reflections([
            (vk::ShaderStageFlags::VERTEX, &vertex),
            (vk::ShaderStageFlags::FRAGMENT, &fragment),
        ]);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_bindings_sorted_and_sets_counted() {
        let layout = ResourceLayout::from_explicit(
            &[
                ResourceBinding {
                    set: 2,
                    binding: 3,
                    kind: ResourceKind::StorageImage,
                    count: 1,
                    stages: vk::ShaderStageFlags::COMPUTE,
                },
                ResourceBinding {
                    set: 2,
                    binding: 1,
                    kind: ResourceKind::StorageBuffer,
                    count: 2,
                    stages: vk::ShaderStageFlags::COMPUTE,
                },
            ],
            &[],
        )
        .unwrap();
        assert_eq!(layout.set_count(), 3);
        assert!(layout.set(0).is_empty());
        let bindings: Vec<u32> = layout.set(2).iter().map(|b| b.binding).collect();
        assert_eq!(bindings, vec![1, 3]);

        let sizes = layout.pool_sizes(4);
        let storage_buffers = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::STORAGE_BUFFER)
            .map(|s| s.descriptor_count);
        assert_eq!(storage_buffers, Some(8));
    }

    #[test]
    fn test_push_constant_rules() {
        let misaligned = ResourceLayout::from_explicit(
            &[],
            &[PushConstantBlock {
                offset: 0,
                size: 6,
                stages: vk::ShaderStageFlags::VERTEX,
            }],
        );
        assert!(misaligned.is_err());

        let twice = ShaderReflection::new().with_push_constant(0, 16);
        let other = ShaderReflection::new().with_push_constant(16, 16);
        let result = ResourceLayout::from_reflections([
            (vk::ShaderStageFlags::VERTEX, &twice),
            (vk::ShaderStageFlags::VERTEX, &other),
        ]);
        assert!(result.is_err());
    }
}
