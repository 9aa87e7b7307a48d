//! Buffers, textures and the operations they share.

mod buffer;
mod copy;
mod sparse;
pub mod staging;
mod texture;

pub use buffer::{Buffer, BufferDesc};
pub use copy::CopyDesc;
pub use sparse::{TileGeometry, SPARSE_TILE_SIZE};
pub use texture::{MipLayout, Texture, TextureDesc, TextureDimension, TextureLayout};

pub(crate) use copy::{resolve_copy, ResourceShape};
pub(crate) use sparse::SparseState;

use crate::hal::ResourceId;
use crate::heap::{Heap, HeapKind};
use crate::{Device, Result, RhiError};

/// Where a resource's memory lives.
#[derive(Debug, Clone)]
pub enum Backing {
    /// A private allocation released together with the resource.
    Owned,
    /// A range of an explicit heap, possibly shared with other resources.
    Placed { heap: Heap, offset: u64 },
    /// Pages supplied tile by tile through [`Resource::bind_tile`].
    Sparse,
}

/// Borrowed view of any resource.
#[derive(Debug, Clone, Copy)]
pub enum ResourceRef<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
}

impl<'a> ResourceRef<'a> {
    pub(crate) fn id(self) -> ResourceId {
        match self {
            ResourceRef::Buffer(buffer) => ResourceId::Buffer(buffer.id()),
            ResourceRef::Texture(texture) => ResourceId::Texture(texture.id()),
        }
    }

    pub(crate) fn to_any(self) -> AnyResource {
        match self {
            ResourceRef::Buffer(buffer) => AnyResource::Buffer(buffer.clone()),
            ResourceRef::Texture(texture) => AnyResource::Texture(texture.clone()),
        }
    }

    fn heap_kind(self) -> HeapKind {
        match self {
            ResourceRef::Buffer(buffer) => buffer.kind(),
            ResourceRef::Texture(_) => HeapKind::Default,
        }
    }

    fn sparse_state(self) -> Option<&'a SparseState> {
        match self {
            ResourceRef::Buffer(buffer) => buffer.sparse_state(),
            ResourceRef::Texture(texture) => texture.sparse_state(),
        }
    }

    fn slices(self) -> u32 {
        match self {
            ResourceRef::Buffer(_) => 1,
            ResourceRef::Texture(texture) => texture.slices(),
        }
    }

    /// Construction-class error attributed to this resource's kind.
    fn error(self, reason: String) -> RhiError {
        match self {
            ResourceRef::Buffer(_) => RhiError::Buffer(reason),
            ResourceRef::Texture(texture) => RhiError::texture(texture.dimension(), reason),
        }
    }
}

/// Owning counterpart of [`ResourceRef`], used to keep bound resources alive.
#[derive(Debug, Clone)]
pub(crate) enum AnyResource {
    Buffer(Buffer),
    Texture(Texture),
}

impl AnyResource {
    pub(crate) fn as_ref(&self) -> ResourceRef<'_> {
        match self {
            AnyResource::Buffer(buffer) => ResourceRef::Buffer(buffer),
            AnyResource::Texture(texture) => ResourceRef::Texture(texture),
        }
    }
}

/// Operations shared by buffers and textures.
pub trait Resource {
    fn device(&self) -> &Device;

    fn as_resource(&self) -> ResourceRef<'_>;

    fn backing(&self) -> &Backing;

    /// Addressable bytes. For textures, one slice of the top mip in its linear layout.
    fn size(&self) -> u64;

    /// Bytes the resource occupies in its heap.
    fn heap_size(&self) -> u64;

    /// The explicit heap the resource was placed in, if any.
    fn heap(&self) -> Option<&Heap> {
        match self.backing() {
            Backing::Placed { heap, .. } => Some(heap),
            Backing::Owned | Backing::Sparse => None,
        }
    }

    fn heap_offset(&self) -> u64 {
        match self.backing() {
            Backing::Placed { offset, .. } => *offset,
            Backing::Owned | Backing::Sparse => 0,
        }
    }

    fn tiles(&self) -> Option<TileGeometry> {
        self.as_resource().sparse_state().map(|state| state.geometry())
    }

    /// Number of (tile, slice) pages currently backed by heap memory. Zero for non-sparse
    /// resources.
    fn bound_tiles(&self) -> usize {
        self.as_resource()
            .sparse_state()
            .map_or(0, |state| state.bound_tiles())
    }

    /// Copies from this resource into `dst`. See [`CopyDesc`] for addressing and the size rules.
    fn copy_to(&self, dst: &dyn Resource, desc: &CopyDesc) -> Result<()> {
        copy::execute(self.as_resource(), dst.as_resource(), desc)
    }

    /// Backs tile `(x, y, z)` of array slice `slice` with `heap` memory at `offset`, or unbinds
    /// it when `binding` is `None`.
    ///
    /// Takes effect for work submitted after the call. Work already submitted that touches the
    /// tile is not waited for.
    fn bind_tile(
        &self,
        x: u32,
        y: u32,
        z: u32,
        slice: u32,
        binding: Option<(&Heap, u64)>,
    ) -> Result<()> {
        sparse::bind_tile(self.as_resource(), [x, y, z], slice, binding)
    }
}

impl Resource for Buffer {
    fn device(&self) -> &Device {
        Buffer::device(self)
    }

    fn as_resource(&self) -> ResourceRef<'_> {
        ResourceRef::Buffer(self)
    }

    fn backing(&self) -> &Backing {
        Buffer::backing(self)
    }

    fn size(&self) -> u64 {
        Buffer::size(self)
    }

    fn heap_size(&self) -> u64 {
        Buffer::heap_size(self)
    }
}

impl Resource for Texture {
    fn device(&self) -> &Device {
        Texture::device(self)
    }

    fn as_resource(&self) -> ResourceRef<'_> {
        ResourceRef::Texture(self)
    }

    fn backing(&self) -> &Backing {
        Texture::backing(self)
    }

    fn size(&self) -> u64 {
        Texture::size(self)
    }

    fn heap_size(&self) -> u64 {
        Texture::heap_size(self)
    }
}

impl<'a> From<&'a Buffer> for ResourceRef<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        ResourceRef::Buffer(buffer)
    }
}

impl<'a> From<&'a Texture> for ResourceRef<'a> {
    fn from(texture: &'a Texture) -> Self {
        ResourceRef::Texture(texture)
    }
}

impl<'a> ResourceRef<'a> {
    pub fn device(self) -> &'a Device {
        match self {
            ResourceRef::Buffer(buffer) => buffer.device(),
            ResourceRef::Texture(texture) => texture.device(),
        }
    }
}

/// Validates an explicit placement shared by buffers and textures.
pub(crate) fn check_placement(
    device: &Device,
    heap: &Heap,
    offset: u64,
    heap_size: u64,
    error: impl Fn(String) -> RhiError,
) -> Result<()> {
    if !device.same_device(heap.device()) {
        return Err(error(format!(
            "heap belongs to device {} but the resource is created on device {}",
            heap.device().label(),
            device.label()
        )));
    }
    let end = offset.checked_add(heap_size);
    if end.map_or(true, |end| end > heap.size()) {
        return Err(error(format!(
            "heap too small: {heap_size} bytes at offset {offset} do not fit in {} bytes",
            heap.size()
        )));
    }
    Ok(())
}
