//! Generation-checked storage for GPU resources
//!
//! Components refer to resources by handle. A handle whose resource was
//! destroyed fails lookup with [`VulkanError::StaleHandle`] instead of
//! reaching a dangling Vulkan object.

use slotmap::{new_key_type, SlotMap};

use super::buffer::Buffer;
use super::image::{Image, ImageView, Sampler};
use super::texture::Texture;
use crate::backend::{VulkanError, VulkanResult};

new_key_type! {
    /// Handle to a [`Buffer`]
    pub struct BufferHandle;
    /// Handle to an [`Image`]
    pub struct ImageHandle;
    /// Handle to an [`ImageView`]
    pub struct ImageViewHandle;
    /// Handle to a [`Sampler`]
    pub struct SamplerHandle;
    /// Handle to a [`Texture`]
    pub struct TextureHandle;
}

/// Any resource handle, for operations that accept every kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    /// A buffer
    Buffer(BufferHandle),
    /// An image
    Image(ImageHandle),
    /// An image view
    ImageView(ImageViewHandle),
    /// A sampler
    Sampler(SamplerHandle),
    /// A texture and the image, view and sampler it owns
    Texture(TextureHandle),
}

impl ResourceHandle {
    /// Kind name used in errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::ImageView(_) => "image view",
            Self::Sampler(_) => "sampler",
            Self::Texture(_) => "texture",
        }
    }
}

impl From<BufferHandle> for ResourceHandle {
    fn from(handle: BufferHandle) -> Self {
        Self::Buffer(handle)
    }
}

impl From<TextureHandle> for ResourceHandle {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}

fn stale(kind: &'static str) -> VulkanError {
    VulkanError::StaleHandle { kind }
}

/// Owner of every resource created through the renderer
///
/// Fields drop in declaration order: textures and views go before the
/// images they reference.
#[derive(Default)]
pub struct ResourceArena {
    textures: SlotMap<TextureHandle, Texture>,
    views: SlotMap<ImageViewHandle, ImageView>,
    samplers: SlotMap<SamplerHandle, Sampler>,
    buffers: SlotMap<BufferHandle, Buffer>,
    images: SlotMap<ImageHandle, Image>,
}

impl ResourceArena {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a buffer
    pub fn insert_buffer(&mut self, buffer: Buffer) -> BufferHandle {
        self.buffers.insert(buffer)
    }

    /// Take ownership of an image
    pub fn insert_image(&mut self, image: Image) -> ImageHandle {
        self.images.insert(image)
    }

    /// Take ownership of an image view
    pub fn insert_view(&mut self, view: ImageView) -> ImageViewHandle {
        self.views.insert(view)
    }

    /// Take ownership of a sampler
    pub fn insert_sampler(&mut self, sampler: Sampler) -> SamplerHandle {
        self.samplers.insert(sampler)
    }

    /// Register a texture whose parts are already in the arena
    pub fn insert_texture(&mut self, texture: Texture) -> TextureHandle {
        self.textures.insert(texture)
    }

    /// Look up a buffer
    pub fn buffer(&self, handle: BufferHandle) -> VulkanResult<&Buffer> {
        self.buffers.get(handle).ok_or_else(|| stale("buffer"))
    }

    /// Look up an image
    pub fn image(&self, handle: ImageHandle) -> VulkanResult<&Image> {
        self.images.get(handle).ok_or_else(|| stale("image"))
    }

    /// Look up an image mutably
    pub fn image_mut(&mut self, handle: ImageHandle) -> VulkanResult<&mut Image> {
        self.images.get_mut(handle).ok_or_else(|| stale("image"))
    }

    /// Look up an image view
    pub fn view(&self, handle: ImageViewHandle) -> VulkanResult<&ImageView> {
        self.views.get(handle).ok_or_else(|| stale("image view"))
    }

    /// Look up a sampler
    pub fn sampler(&self, handle: SamplerHandle) -> VulkanResult<&Sampler> {
        self.samplers.get(handle).ok_or_else(|| stale("sampler"))
    }

    /// Look up a texture
    pub fn texture(&self, handle: TextureHandle) -> VulkanResult<&Texture> {
        self.textures.get(handle).ok_or_else(|| stale("texture"))
    }

    /// Whether `handle` still names a live resource
    pub fn contains(&self, handle: ResourceHandle) -> bool {
        match handle {
            ResourceHandle::Buffer(h) => self.buffers.contains_key(h),
            ResourceHandle::Image(h) => self.images.contains_key(h),
            ResourceHandle::ImageView(h) => self.views.contains_key(h),
            ResourceHandle::Sampler(h) => self.samplers.contains_key(h),
            ResourceHandle::Texture(h) => self.textures.contains_key(h),
        }
    }

    /// Destroy a resource; a texture takes its view, sampler and image with it
    ///
    /// The caller must ensure no in-flight frame still uses the resource.
    pub fn destroy(&mut self, handle: ResourceHandle) -> VulkanResult<()> {
        let removed = match handle {
            ResourceHandle::Buffer(h) => self.buffers.remove(h).is_some(),
            ResourceHandle::Image(h) => self.images.remove(h).is_some(),
            ResourceHandle::ImageView(h) => self.views.remove(h).is_some(),
            ResourceHandle::Sampler(h) => self.samplers.remove(h).is_some(),
            ResourceHandle::Texture(h) => match self.textures.remove(h) {
                Some(texture) => {
                    self.views.remove(texture.view());
                    self.samplers.remove(texture.sampler());
                    self.images.remove(texture.image());
                    true
                }
                None => false,
            },
        };
        if removed {
            Ok(())
        } else {
            Err(stale(handle.kind()))
        }
    }

    /// Number of live resources of every kind
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len() + self.views.len() + self.samplers.len() + self.textures.len()
    }

    /// Whether the arena holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy everything, views and textures first
    pub fn clear(&mut self) {
        self.textures.clear();
        self.views.clear();
        self.samplers.clear();
        self.buffers.clear();
        self.images.clear();
    }
}
