use std::fmt;
use std::sync::Arc;

use super::{check_placement, Backing, SparseState, TileGeometry};
use crate::format::PixelFormat;
use crate::hal::{
    BackendFeatures, BackendLimits, NativeTexture, Placement, TextureCreateInfo, TextureId,
};
use crate::heap::{Heap, HeapKind};
use crate::{Device, Result, RhiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D1,
    D2,
    D3,
}

impl fmt::Display for TextureDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TextureDimension::D1 => "Texture1D",
            TextureDimension::D2 => "Texture2D",
            TextureDimension::D3 => "Texture3D",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: PixelFormat,
    /// Array layers. Always 1 for 3D textures.
    pub slices: u32,
    pub mip_levels: u32,
    pub sparse: bool,
}

impl TextureDesc {
    pub fn d1(width: u32, format: PixelFormat) -> Self {
        Self::new(TextureDimension::D1, width, 1, 1, format)
    }

    pub fn d2(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::new(TextureDimension::D2, width, height, 1, format)
    }

    pub fn d3(width: u32, height: u32, depth: u32, format: PixelFormat) -> Self {
        Self::new(TextureDimension::D3, width, height, depth, format)
    }

    fn new(dimension: TextureDimension, width: u32, height: u32, depth: u32, format: PixelFormat) -> Self {
        Self {
            dimension,
            width,
            height,
            depth,
            format,
            slices: 1,
            mip_levels: 1,
            sparse: false,
        }
    }

    pub fn with_slices(mut self, slices: u32) -> Self {
        self.slices = slices;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    fn validate(&self, limits: &BackendLimits) -> Result<()> {
        let dims = [("width", self.width), ("height", self.height), ("depth", self.depth)];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(RhiError::Value(format!("{} {name} must be greater than 0", self.dimension)));
        }
        let max = match self.dimension {
            TextureDimension::D1 => limits.max_texture_dimension_1d,
            TextureDimension::D2 => limits.max_texture_dimension_2d,
            TextureDimension::D3 => limits.max_texture_dimension_3d,
        };
        if let Some((name, value)) = dims.iter().find(|(_, v)| *v > max) {
            return Err(RhiError::texture(
                self.dimension,
                format!("{name} {value} exceeds the backend limit of {max}"),
            ));
        }
        match self.dimension {
            TextureDimension::D1 if self.height != 1 || self.depth != 1 => {
                return Err(RhiError::Value("Texture1D height and depth must be 1".into()));
            }
            TextureDimension::D2 if self.depth != 1 => {
                return Err(RhiError::Value("Texture2D depth must be 1".into()));
            }
            TextureDimension::D3 if self.slices != 1 => {
                return Err(RhiError::texture(self.dimension, "3D textures cannot have array slices"));
            }
            _ => {}
        }
        if self.slices == 0 {
            return Err(RhiError::Value(format!("{} slices must be greater than 0", self.dimension)));
        }
        let max_mips = max_mip_levels(self.width, self.height, self.depth);
        if self.mip_levels == 0 || self.mip_levels > max_mips {
            return Err(RhiError::Value(format!(
                "{} mip_levels must be in 1..={max_mips}",
                self.dimension
            )));
        }
        if self.sparse && self.mip_levels != 1 {
            return Err(RhiError::texture(self.dimension, "sparse textures cannot have mips"));
        }
        Ok(())
    }
}

fn max_mip_levels(width: u32, height: u32, depth: u32) -> u32 {
    32 - width.max(height).max(depth).leading_zeros()
}

/// One mip level of a texture in its linear representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLayout {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
    /// Byte offset from the start of a slice.
    pub offset: u64,
    pub size: u64,
}

/// Linear layout of every subresource: slices laid end to end, each holding its mips in order,
/// each mip made of `row_pitch`-strided rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureLayout {
    pub bytes_per_pixel: u32,
    pub slices: u32,
    pub mips: Vec<MipLayout>,
    pub slice_size: u64,
}

impl TextureLayout {
    pub fn new(desc: &TextureDesc, row_pitch_alignment: u32) -> Result<Self> {
        let overflow = || RhiError::texture(desc.dimension, "texture size overflows");
        let bytes_per_pixel = desc.format.bytes_per_pixel();
        let mut mips = Vec::with_capacity(desc.mip_levels as usize);
        let mut offset = 0u64;
        for level in 0..desc.mip_levels {
            let width = (desc.width >> level).max(1);
            let height = (desc.height >> level).max(1);
            let depth = (desc.depth >> level).max(1);
            let row_pitch = width
                .checked_mul(bytes_per_pixel)
                .and_then(|row| row.checked_next_multiple_of(row_pitch_alignment.max(1)))
                .ok_or_else(overflow)?;
            let size = u64::from(row_pitch)
                .checked_mul(u64::from(height))
                .and_then(|v| v.checked_mul(u64::from(depth)))
                .ok_or_else(overflow)?;
            mips.push(MipLayout {
                width,
                height,
                depth,
                row_pitch,
                offset,
                size,
            });
            offset = offset.checked_add(size).ok_or_else(overflow)?;
        }
        if offset.checked_mul(u64::from(desc.slices)).is_none() {
            return Err(overflow());
        }
        Ok(Self {
            bytes_per_pixel,
            slices: desc.slices,
            mips,
            slice_size: offset,
        })
    }

    pub fn mip(&self, level: u32) -> Option<&MipLayout> {
        self.mips.get(level as usize)
    }

    /// Never overflows: [`TextureLayout::new`] rejects layouts whose total does not fit.
    pub fn total_size(&self) -> u64 {
        self.slice_size * u64::from(self.slices)
    }

    /// Offset of subresource `(slice, mip)` from the start of the texture.
    pub fn subresource_offset(&self, slice: u32, mip: u32) -> u64 {
        let mip_offset = self.mip(mip).map_or(0, |m| m.offset);
        u64::from(slice) * self.slice_size + mip_offset
    }
}

struct TextureInner {
    device: Device,
    id: TextureId,
    desc: TextureDesc,
    layout: TextureLayout,
    backing: Backing,
    sparse: Option<SparseState>,
}

impl Drop for TextureInner {
    fn drop(&mut self) {
        let id = self.id;
        self.device.release("texture", |backend| backend.destroy_texture(id));
    }
}

/// A formatted 1D, 2D or 3D image, optionally arrayed and mipmapped.
#[derive(Clone)]
pub struct Texture {
    inner: Arc<TextureInner>,
}

impl Texture {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn dimension(&self) -> TextureDimension {
        self.inner.desc.dimension
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.inner.desc
    }

    pub fn layout(&self) -> &TextureLayout {
        &self.inner.layout
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn depth(&self) -> u32 {
        self.inner.desc.depth
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.desc.format
    }

    pub fn slices(&self) -> u32 {
        self.inner.desc.slices
    }

    pub fn mip_levels(&self) -> u32 {
        self.inner.desc.mip_levels
    }

    /// Row pitch of the top mip.
    pub fn row_pitch(&self) -> u32 {
        self.inner.layout.mips[0].row_pitch
    }

    /// Bytes of one slice of the top mip (`row_pitch * height * depth`).
    pub fn size(&self) -> u64 {
        self.inner.layout.mips[0].size
    }

    /// Bytes covering every slice and mip.
    pub fn heap_size(&self) -> u64 {
        self.inner.layout.total_size()
    }

    pub fn backing(&self) -> &Backing {
        &self.inner.backing
    }

    pub fn is_sparse(&self) -> bool {
        self.inner.sparse.is_some()
    }

    pub(crate) fn id(&self) -> TextureId {
        self.inner.id
    }

    pub(crate) fn sparse_state(&self) -> Option<&SparseState> {
        self.inner.sparse.as_ref()
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("dimension", &self.inner.desc.dimension)
            .field("width", &self.inner.desc.width)
            .field("height", &self.inner.desc.height)
            .field("depth", &self.inner.desc.depth)
            .field("format", &self.inner.desc.format)
            .field("slices", &self.inner.desc.slices)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Device {
    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Texture> {
        self.build_texture(desc, None)
    }

    pub fn create_texture1d(&self, width: u32, format: PixelFormat) -> Result<Texture> {
        self.create_texture(&TextureDesc::d1(width, format))
    }

    pub fn create_texture2d(&self, width: u32, height: u32, format: PixelFormat) -> Result<Texture> {
        self.create_texture(&TextureDesc::d2(width, height, format))
    }

    pub fn create_texture3d(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        format: PixelFormat,
    ) -> Result<Texture> {
        self.create_texture(&TextureDesc::d3(width, height, depth, format))
    }

    /// Creates a texture inside `heap` at `offset`.
    ///
    /// The texture occupies `heap_size()` bytes from `offset` and may overlap other resources
    /// placed in the same heap; the overlapping bytes are then shared. Only DEFAULT heaps can
    /// hold textures, and only backends reporting [`BackendFeatures::TEXTURE_ALIASING`] support
    /// placement.
    pub fn create_texture_in(&self, desc: &TextureDesc, heap: &Heap, offset: u64) -> Result<Texture> {
        self.build_texture(desc, Some((heap, offset)))
    }

    /// Wraps a texture created directly on the native API.
    ///
    /// `desc` must describe `native` exactly (extent, format, slices and mips). The texture must
    /// come from this device's [`Device::native_device`] and must allow copies in both
    /// directions. Sparse descriptions are rejected.
    pub fn texture_from_native(&self, desc: &TextureDesc, native: NativeTexture) -> Result<Texture> {
        let limits = self.limits()?;
        desc.validate(&limits)?;
        if desc.sparse {
            return Err(RhiError::texture(desc.dimension, "native textures cannot be sparse"));
        }
        let layout = TextureLayout::new(desc, limits.row_pitch_alignment)?;
        let info = TextureCreateInfo {
            dimension: desc.dimension,
            format: desc.format,
            layout: layout.clone(),
            sparse: None,
            placement: None,
        };
        let id = self.with_backend(|backend| backend.import_texture(&info, native))?;
        tracing::debug!(
            device = %self.label(),
            dimension = %desc.dimension,
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            ?id,
            "wrapped native texture"
        );
        Ok(Texture {
            inner: Arc::new(TextureInner {
                device: self.clone(),
                id,
                desc: *desc,
                layout,
                backing: Backing::Owned,
                sparse: None,
            }),
        })
    }

    fn build_texture(&self, desc: &TextureDesc, placed: Option<(&Heap, u64)>) -> Result<Texture> {
        let limits = self.limits()?;
        desc.validate(&limits)?;
        let layout = TextureLayout::new(desc, limits.row_pitch_alignment)?;
        let texture_error = |reason: String| RhiError::texture(desc.dimension, reason);

        let sparse = if desc.sparse {
            if placed.is_some() {
                return Err(texture_error("sparse textures cannot be placed in a heap".into()));
            }
            self.require(BackendFeatures::SPARSE, "sparse textures")?;
            let geometry = TileGeometry::for_texture(
                desc.dimension,
                layout.bytes_per_pixel,
                desc.width,
                desc.height,
                desc.depth,
            )
            .ok_or_else(|| {
                texture_error(format!("format {:?} has no sparse tile shape", desc.format))
            })?;
            Some(SparseState::new(geometry))
        } else {
            None
        };

        let (backing, placement) = match placed {
            None if desc.sparse => (Backing::Sparse, None),
            None => (Backing::Owned, None),
            Some((heap, offset)) => {
                if heap.kind() != HeapKind::Default {
                    return Err(texture_error(format!(
                        "textures can only be placed in DEFAULT heaps, not {}",
                        heap.kind()
                    )));
                }
                check_placement(self, heap, offset, layout.total_size(), texture_error)?;
                self.require(BackendFeatures::TEXTURE_ALIASING, "texture heap placement")?;
                let placement = Placement {
                    heap: heap.id(),
                    offset,
                };
                (
                    Backing::Placed {
                        heap: heap.clone(),
                        offset,
                    },
                    Some(placement),
                )
            }
        };

        let info = TextureCreateInfo {
            dimension: desc.dimension,
            format: desc.format,
            layout: layout.clone(),
            sparse: sparse.as_ref().map(SparseState::geometry),
            placement,
        };
        let id = self.with_backend(|backend| backend.create_texture(&info))?;
        tracing::debug!(
            device = %self.label(),
            dimension = %desc.dimension,
            width = desc.width,
            height = desc.height,
            depth = desc.depth,
            format = ?desc.format,
            slices = desc.slices,
            ?id,
            "created texture"
        );
        Ok(Texture {
            inner: Arc::new(TextureInner {
                device: self.clone(),
                id,
                desc: *desc,
                layout,
                backing,
                sparse,
            }),
        })
    }
}
