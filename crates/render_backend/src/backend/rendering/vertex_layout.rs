//! Vertex layout descriptions
//!
//! The asset importer hands over raw vertex bytes together with a
//! [`VertexLayout`]; this module turns the layout into Vulkan vertex input
//! state. Attributes are tightly packed in declaration order on binding 0.

use ash::vk;

use crate::backend::{VulkanError, VulkanResult};

/// Meaning of a vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSemantic {
    /// Object-space position
    Position,
    /// Surface normal
    Normal,
    /// Tangent vector
    Tangent,
    /// Texture coordinates
    TexCoord,
    /// Vertex color
    Color,
    /// Skinning joint indices
    Joints,
    /// Skinning weights
    Weights,
    /// Application-defined data
    Custom(u32),
}

/// Numeric type of each attribute component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    /// 32-bit float
    F32,
    /// 32-bit signed integer
    I32,
    /// 32-bit unsigned integer
    U32,
    /// 16-bit unsigned integer
    U16,
    /// 8-bit unsigned normalized
    U8Norm,
}

impl AttributeFormat {
    /// Bytes per component
    pub fn size(self) -> u32 {
        match self {
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::U16 => 2,
            Self::U8Norm => 1,
        }
    }

    /// Vulkan format for `components` components (1..=4)
    pub fn to_vk(self, components: u32) -> Option<vk::Format> {
        use vk::Format as F;
        let formats = match self {
            Self::F32 => [F::R32_SFLOAT, F::R32G32_SFLOAT, F::R32G32B32_SFLOAT, F::R32G32B32A32_SFLOAT],
            Self::I32 => [F::R32_SINT, F::R32G32_SINT, F::R32G32B32_SINT, F::R32G32B32A32_SINT],
            Self::U32 => [F::R32_UINT, F::R32G32_UINT, F::R32G32B32_UINT, F::R32G32B32A32_UINT],
            Self::U16 => [F::R16_UINT, F::R16G16_UINT, F::R16G16B16_UINT, F::R16G16B16A16_UINT],
            Self::U8Norm => [F::R8_UNORM, F::R8G8_UNORM, F::R8G8B8_UNORM, F::R8G8B8A8_UNORM],
        };
        match components {
            1..=4 => Some(formats[components as usize - 1]),
            _ => None,
        }
    }
}

/// One attribute: `count` components of `format`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// What the attribute means
    pub semantic: AttributeSemantic,
    /// Component type
    pub format: AttributeFormat,
    /// Component count; above 4 spans several shader locations
    pub count: u32,
}

impl VertexAttribute {
    /// Bytes the attribute occupies in a vertex
    pub fn size(&self) -> u32 {
        self.format.size() * self.count
    }

    /// Shader locations used
    pub fn locations(&self) -> u32 {
        self.count.div_ceil(4)
    }
}

/// Ordered attribute list of one interleaved vertex buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Layout from attributes in declaration order
    pub fn new(attributes: Vec<VertexAttribute>) -> Self {
        Self { attributes }
    }

    /// Append an attribute
    pub fn with(mut self, semantic: AttributeSemantic, format: AttributeFormat, count: u32) -> Self {
        self.attributes.push(VertexAttribute { semantic, format, count });
        self
    }

    /// Position (vec3), normal (vec3), texture coordinates (vec2)
    pub fn position_normal_uv() -> Self {
        Self::default()
            .with(AttributeSemantic::Position, AttributeFormat::F32, 3)
            .with(AttributeSemantic::Normal, AttributeFormat::F32, 3)
            .with(AttributeSemantic::TexCoord, AttributeFormat::F32, 2)
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Whether the layout has no attributes
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Bytes per vertex
    pub fn vertex_size(&self) -> u32 {
        self.attributes.iter().map(VertexAttribute::size).sum()
    }

    /// Byte offset of each attribute
    pub fn offsets(&self) -> Vec<u32> {
        self.attributes
            .iter()
            .scan(0, |offset, attribute| {
                let current = *offset;
                *offset += attribute.size();
                Some(current)
            })
            .collect()
    }

    /// Per-vertex binding 0, empty when the layout is
    pub fn binding_descriptions(&self) -> Vec<vk::VertexInputBindingDescription> {
        if self.is_empty() {
            return Vec::new();
        }
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.vertex_size(),
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Attribute descriptions with consecutive locations
    pub fn attribute_descriptions(&self) -> VulkanResult<Vec<vk::VertexInputAttributeDescription>> {
        let mut descriptions = Vec::new();
        let mut location = 0;
        for (attribute, base_offset) in self.attributes.iter().zip(self.offsets()) {
            if attribute.count == 0 {
                return Err(VulkanError::invalid(format!("{:?} attribute has no components", attribute.semantic)));
            }
            let mut remaining = attribute.count;
            let mut offset = base_offset;
            while remaining > 0 {
                let components = remaining.min(4);
                let format = attribute.format.to_vk(components).ok_or_else(|| {
                    VulkanError::invalid(format!("no vertex format for {components} {:?}", attribute.format))
                })?;
                descriptions.push(vk::VertexInputAttributeDescription {
                    binding: 0,
                    location,
                    format,
                    offset,
                });
                location += 1;
                offset += components * attribute.format.size();
                remaining -= components;
            }
        }
        Ok(descriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_layout() -> VertexLayout {
        VertexLayout::position_normal_uv()
            .with(AttributeSemantic::Color, AttributeFormat::U8Norm, 4)
            .with(AttributeSemantic::Joints, AttributeFormat::U16, 4)
    }

    #[test]
    fn test_vertex_size_is_sum_of_attributes() {
        let layout = mixed_layout();
        let expected: u32 = layout.attributes().iter().map(|a| a.format.size() * a.count).sum();
        assert_eq!(layout.vertex_size(), expected);
        assert_eq!(layout.vertex_size(), 12 + 12 + 8 + 4 + 8);
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let layout = mixed_layout();
        let offsets = layout.offsets();
        assert_eq!(offsets, vec![0, 12, 24, 32, 36]);
        for (index, window) in offsets.windows(2).enumerate() {
            assert_eq!(window[1] - window[0], layout.attributes()[index].size());
        }
        let last = layout.attributes().len() - 1;
        assert_eq!(offsets[last] + layout.attributes()[last].size(), layout.vertex_size());
    }

    #[test]
    fn test_descriptions_use_binding_zero() {
        let layout = VertexLayout::position_normal_uv();
        let bindings = layout.binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 32);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);

        let attributes = layout.attribute_descriptions().unwrap();
        let formats: Vec<_> = attributes.iter().map(|a| a.format).collect();
        assert_eq!(
            formats,
            vec![vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32_SFLOAT]
        );
        assert_eq!(attributes.iter().map(|a| a.location).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_matrix_attribute_spans_four_locations() {
        let layout = VertexLayout::default()
            .with(AttributeSemantic::Position, AttributeFormat::F32, 3)
            .with(AttributeSemantic::Custom(0), AttributeFormat::F32, 16)
            .with(AttributeSemantic::Custom(1), AttributeFormat::U32, 1);

        let attributes = layout.attribute_descriptions().unwrap();
        assert_eq!(attributes.len(), 6);
        let matrix: Vec<_> = attributes[1..5].iter().map(|a| (a.location, a.offset)).collect();
        assert_eq!(matrix, vec![(1, 12), (2, 28), (3, 44), (4, 60)]);
        assert_eq!(attributes[5].location, 5);
        assert_eq!(attributes[5].offset, 76);
        assert_eq!(layout.vertex_size(), 80);
    }

    #[test]
    fn test_empty_layout_and_zero_components() {
        assert!(VertexLayout::default().binding_descriptions().is_empty());
        let broken = VertexLayout::default().with(AttributeSemantic::Normal, AttributeFormat::F32, 0);
        assert!(broken.attribute_descriptions().is_err());
    }
}
