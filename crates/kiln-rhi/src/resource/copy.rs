use super::buffer::check_range;
use super::{ResourceRef, TextureLayout};
use crate::format::PixelFormat;
use crate::hal::{BufferId, CopyOp, TextureId};
use crate::{Result, RhiError};

/// Addressing for [`super::Resource::copy_to`]. Every field defaults to 0.
///
/// - Buffer to buffer: `size` bytes from `src_offset` to `dst_offset`. A `size` of 0 copies
///   everything from `src_offset` to the end of the source.
/// - Buffer to texture and back: one whole subresource (`*_slice`, `*_mip`) in the texture's
///   linear layout, `row_pitch * height * depth` bytes at the buffer offset. `size` must be 0
///   or exactly that footprint.
/// - Texture to texture: the `width * height * depth` box at the source origin is copied to the
///   destination origin. A zero extent axis extends to the end of the source mip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyDesc {
    pub size: u64,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub src_z: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub dst_z: u32,
    pub src_slice: u32,
    pub dst_slice: u32,
    pub src_mip: u32,
    pub dst_mip: u32,
}

impl CopyDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_offsets(mut self, src_offset: u64, dst_offset: u64) -> Self {
        self.src_offset = src_offset;
        self.dst_offset = dst_offset;
        self
    }

    pub fn with_extent(mut self, width: u32, height: u32, depth: u32) -> Self {
        self.width = width;
        self.height = height;
        self.depth = depth;
        self
    }

    pub fn with_src_origin(mut self, x: u32, y: u32, z: u32) -> Self {
        (self.src_x, self.src_y, self.src_z) = (x, y, z);
        self
    }

    pub fn with_dst_origin(mut self, x: u32, y: u32, z: u32) -> Self {
        (self.dst_x, self.dst_y, self.dst_z) = (x, y, z);
        self
    }

    pub fn with_slices(mut self, src_slice: u32, dst_slice: u32) -> Self {
        self.src_slice = src_slice;
        self.dst_slice = dst_slice;
        self
    }

    pub fn with_mips(mut self, src_mip: u32, dst_mip: u32) -> Self {
        self.src_mip = src_mip;
        self.dst_mip = dst_mip;
        self
    }

    fn has_region(&self) -> bool {
        [
            self.width, self.height, self.depth, self.src_x, self.src_y, self.src_z, self.dst_x,
            self.dst_y, self.dst_z,
        ]
        .iter()
        .any(|v| *v != 0)
    }
}

/// What copy validation needs to know about one side of a copy.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResourceShape<'a> {
    Buffer {
        id: BufferId,
        size: u64,
    },
    Texture {
        id: TextureId,
        format: PixelFormat,
        layout: &'a TextureLayout,
    },
}

impl<'a> ResourceShape<'a> {
    fn of(resource: ResourceRef<'a>) -> Self {
        match resource {
            ResourceRef::Buffer(buffer) => ResourceShape::Buffer {
                id: buffer.id(),
                size: buffer.size(),
            },
            ResourceRef::Texture(texture) => ResourceShape::Texture {
                id: texture.id(),
                format: texture.format(),
                layout: texture.layout(),
            },
        }
    }
}

fn check_subresource(side: &str, layout: &TextureLayout, slice: u32, mip: u32) -> Result<()> {
    if slice >= layout.slices {
        return Err(RhiError::Value(format!(
            "{side} slice {slice} is out of bounds ({} slices)",
            layout.slices
        )));
    }
    if layout.mip(mip).is_none() {
        return Err(RhiError::Value(format!(
            "{side} mip {mip} is out of bounds ({} mips)",
            layout.mips.len()
        )));
    }
    Ok(())
}

fn check_footprint(desc: &CopyDesc, footprint: u64) -> Result<()> {
    if desc.size != 0 && desc.size != footprint {
        return Err(RhiError::Value(format!(
            "buffer/texture copies move whole subresources: size {} does not match footprint {footprint}",
            desc.size
        )));
    }
    if desc.has_region() {
        return Err(RhiError::Value(
            "origins and extents only apply to texture to texture copies".into(),
        ));
    }
    Ok(())
}

/// Checks `desc` against both sides and produces the transfer to submit.
pub(crate) fn resolve_copy(
    src: ResourceShape<'_>,
    dst: ResourceShape<'_>,
    desc: &CopyDesc,
) -> Result<CopyOp> {
    match (src, dst) {
        (ResourceShape::Buffer { id: src, size: src_size }, ResourceShape::Buffer { id: dst, size: dst_size }) => {
            let size = if desc.size == 0 {
                src_size.saturating_sub(desc.src_offset)
            } else {
                desc.size
            };
            check_range("copy source", src_size, desc.src_offset, size)?;
            check_range("copy destination", dst_size, desc.dst_offset, size)?;
            Ok(CopyOp::BufferToBuffer {
                src,
                dst,
                src_offset: desc.src_offset,
                dst_offset: desc.dst_offset,
                size,
            })
        }
        (ResourceShape::Buffer { id: src, size: src_size }, ResourceShape::Texture { id: dst, layout, .. }) => {
            check_subresource("destination", layout, desc.dst_slice, desc.dst_mip)?;
            let footprint = layout.mips[desc.dst_mip as usize].size;
            check_footprint(desc, footprint)?;
            if desc.dst_offset != 0 {
                return Err(RhiError::Value("dst_offset does not apply to textures".into()));
            }
            check_range("copy source", src_size, desc.src_offset, footprint)?;
            Ok(CopyOp::BufferToTexture {
                src,
                src_offset: desc.src_offset,
                dst,
                dst_slice: desc.dst_slice,
                dst_mip: desc.dst_mip,
            })
        }
        (ResourceShape::Texture { id: src, layout, .. }, ResourceShape::Buffer { id: dst, size: dst_size }) => {
            check_subresource("source", layout, desc.src_slice, desc.src_mip)?;
            let footprint = layout.mips[desc.src_mip as usize].size;
            check_footprint(desc, footprint)?;
            if desc.src_offset != 0 {
                return Err(RhiError::Value("src_offset does not apply to textures".into()));
            }
            check_range("copy destination", dst_size, desc.dst_offset, footprint)?;
            Ok(CopyOp::TextureToBuffer {
                src,
                src_slice: desc.src_slice,
                src_mip: desc.src_mip,
                dst,
                dst_offset: desc.dst_offset,
            })
        }
        (
            ResourceShape::Texture { id: src, format: src_format, layout: src_layout },
            ResourceShape::Texture { id: dst, format: dst_format, layout: dst_layout },
        ) => {
            if desc.size != 0 || desc.src_offset != 0 || desc.dst_offset != 0 {
                return Err(RhiError::Value(
                    "size and byte offsets do not apply to texture to texture copies".into(),
                ));
            }
            if src_format.bytes_per_pixel() != dst_format.bytes_per_pixel() {
                return Err(RhiError::Value(format!(
                    "incompatible formats {src_format:?} and {dst_format:?}"
                )));
            }
            check_subresource("source", src_layout, desc.src_slice, desc.src_mip)?;
            check_subresource("destination", dst_layout, desc.dst_slice, desc.dst_mip)?;
            let src_mip = src_layout.mips[desc.src_mip as usize];
            let dst_mip = dst_layout.mips[desc.dst_mip as usize];

            let src_origin = [desc.src_x, desc.src_y, desc.src_z];
            let dst_origin = [desc.dst_x, desc.dst_y, desc.dst_z];
            let src_dims = [src_mip.width, src_mip.height, src_mip.depth];
            let dst_dims = [dst_mip.width, dst_mip.height, dst_mip.depth];
            let requested = [desc.width, desc.height, desc.depth];

            let mut extent = [0u32; 3];
            for axis in 0..3 {
                let available = src_dims[axis].saturating_sub(src_origin[axis]);
                extent[axis] = if requested[axis] == 0 { available } else { requested[axis] };
                let src_end = u64::from(src_origin[axis]) + u64::from(extent[axis]);
                let dst_end = u64::from(dst_origin[axis]) + u64::from(extent[axis]);
                if extent[axis] == 0 || src_end > u64::from(src_dims[axis]) {
                    return Err(RhiError::Value(format!(
                        "source region {:?}+{:?} is out of bounds ({:?})",
                        src_origin, requested, src_dims
                    )));
                }
                if dst_end > u64::from(dst_dims[axis]) {
                    return Err(RhiError::Value(format!(
                        "destination region {:?}+{:?} is out of bounds ({:?})",
                        dst_origin, extent, dst_dims
                    )));
                }
            }
            Ok(CopyOp::TextureToTexture {
                src,
                dst,
                src_slice: desc.src_slice,
                dst_slice: desc.dst_slice,
                src_mip: desc.src_mip,
                dst_mip: desc.dst_mip,
                src_origin,
                dst_origin,
                extent,
            })
        }
    }
}

pub(crate) fn execute(src: ResourceRef<'_>, dst: ResourceRef<'_>, desc: &CopyDesc) -> Result<()> {
    let device = src.device();
    device.ensure_same("copy destination", dst.device())?;
    let op = resolve_copy(ResourceShape::of(src), ResourceShape::of(dst), desc)?;
    device.with_backend(|backend| backend.copy(&op))?;
    device.stats_counters().inc_copies();
    tracing::trace!(device = %device.label(), ?op, "copy");
    Ok(())
}
