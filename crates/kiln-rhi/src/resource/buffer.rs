use std::fmt;
use std::sync::Arc;

use super::{check_placement, staging, Backing, SparseState, TileGeometry};
use crate::format::PixelFormat;
use crate::hal::{BackendFeatures, BufferCreateInfo, BufferId, Placement};
use crate::heap::{Heap, HeapKind};
use crate::{Device, Result, RhiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub kind: HeapKind,
    pub size: u64,
    /// Element size of a structured view; 0 for raw or typed buffers.
    pub stride: u32,
    /// Element format of a typed view.
    pub format: Option<PixelFormat>,
    pub sparse: bool,
}

impl BufferDesc {
    pub fn new(kind: HeapKind, size: u64) -> Self {
        Self {
            kind,
            size,
            stride: 0,
            format: None,
            sparse: false,
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

struct BufferInner {
    device: Device,
    id: BufferId,
    desc: BufferDesc,
    heap_size: u64,
    backing: Backing,
    sparse: Option<SparseState>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let id = self.id;
        self.device.release("buffer", |backend| backend.destroy_buffer(id));
    }
}

/// Linear GPU memory.
///
/// UPLOAD buffers accept CPU writes, READBACK buffers accept CPU reads, DEFAULT buffers are only
/// reachable through copies and shader views.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn size(&self) -> u64 {
        self.inner.desc.size
    }

    pub fn heap_size(&self) -> u64 {
        self.inner.heap_size
    }

    pub fn kind(&self) -> HeapKind {
        self.inner.desc.kind
    }

    pub fn stride(&self) -> u32 {
        self.inner.desc.stride
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.inner.desc.format
    }

    pub fn is_sparse(&self) -> bool {
        self.inner.sparse.is_some()
    }

    pub fn backing(&self) -> &Backing {
        &self.inner.backing
    }

    pub(crate) fn id(&self) -> BufferId {
        self.inner.id
    }

    pub(crate) fn sparse_state(&self) -> Option<&SparseState> {
        self.inner.sparse.as_ref()
    }

    /// Writes `data` at byte `offset`. UPLOAD buffers only.
    pub fn upload(&self, data: &[u8], offset: u64) -> Result<()> {
        self.check_cpu_access(HeapKind::Upload, "upload")?;
        check_range("upload", self.size(), offset, data.len() as u64)?;
        let id = self.inner.id;
        self.device()
            .with_backend(|backend| backend.write_buffer(id, offset, data))?;
        self.device()
            .stats_counters()
            .add_bytes_uploaded(data.len() as u64);
        Ok(())
    }

    /// Writes each `stride`-byte element of `data` followed by `filler`, from offset 0.
    /// `data` must hold a whole number of elements.
    pub fn upload_chunked(&self, data: &[u8], stride: u32, filler: &[u8]) -> Result<()> {
        self.check_cpu_access(HeapKind::Upload, "upload")?;
        let packed = staging::chunked(data, stride, filler)?;
        if packed.len() as u64 > self.size() {
            return Err(RhiError::Value(format!(
                "supplied buffer is bigger than resource size: {} (expected no more than {})",
                packed.len(),
                self.size()
            )));
        }
        self.upload(&packed, 0)
    }

    /// Writes tightly packed rows of `width * bytes_per_pixel` bytes at `pitch`-byte intervals.
    /// Bytes between rows are left untouched. `data` longer than `height` rows is rejected.
    pub fn upload2d(
        &self,
        data: &[u8],
        pitch: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<()> {
        self.check_cpu_access(HeapKind::Upload, "upload")?;
        let rows = staging::pitched_rows(data, pitch, width, height, bytes_per_pixel, self.size())?;
        let id = self.inner.id;
        self.device().with_backend(|backend| {
            rows.iter()
                .try_for_each(|(offset, row)| backend.write_buffer(id, *offset, row))
        })?;
        let written: usize = rows.iter().map(|(_, row)| row.len()).sum();
        self.device()
            .stats_counters()
            .add_bytes_uploaded(written as u64);
        Ok(())
    }

    /// Reads `size` bytes from `offset`; a `size` of 0 reads to the end. READBACK buffers only.
    ///
    /// Waits for every previously submitted operation on the device.
    pub fn readback(&self, size: u64, offset: u64) -> Result<Vec<u8>> {
        let size = if size == 0 {
            self.size().checked_sub(offset).ok_or_else(|| {
                RhiError::Value(format!(
                    "offset {offset} is beyond the buffer size {}",
                    self.size()
                ))
            })?
        } else {
            size
        };
        let mut out = vec![0u8; size as usize];
        self.read_exact(&mut out, offset)?;
        Ok(out)
    }

    /// Reads `min(out.len(), size - offset)` bytes into `out` and returns the count.
    pub fn readback_into(&self, out: &mut [u8], offset: u64) -> Result<usize> {
        let available = self.size().checked_sub(offset).ok_or_else(|| {
            RhiError::Value(format!(
                "offset {offset} is beyond the buffer size {}",
                self.size()
            ))
        })?;
        let amount = (out.len() as u64).min(available) as usize;
        self.read_exact(&mut out[..amount], offset)?;
        Ok(amount)
    }

    /// Reads `height` rows of `width * bytes_per_pixel` bytes spaced `pitch` bytes apart.
    pub fn readback2d(
        &self,
        pitch: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Vec<u8>> {
        let span = staging::pitched_size(pitch, width, height, bytes_per_pixel);
        if span > self.size() {
            return Err(RhiError::Value(format!(
                "requested buffer out of bounds: {span} (expected no more than {})",
                self.size()
            )));
        }
        if span == 0 {
            return Ok(Vec::new());
        }
        let pitched = self.readback(span, 0)?;
        staging::unpitch(&pitched, pitch, width, height, bytes_per_pixel)
    }

    fn read_exact(&self, out: &mut [u8], offset: u64) -> Result<()> {
        self.check_cpu_access(HeapKind::Readback, "readback")?;
        check_range("readback", self.size(), offset, out.len() as u64)?;
        let id = self.inner.id;
        self.device()
            .with_backend(|backend| backend.read_buffer(id, offset, out))?;
        self.device()
            .stats_counters()
            .add_bytes_read_back(out.len() as u64);
        Ok(())
    }

    fn check_cpu_access(&self, required: HeapKind, what: &str) -> Result<()> {
        if self.kind() == required {
            return Ok(());
        }
        Err(RhiError::Buffer(format!(
            "{what} requires a {required} buffer, this one lives in a {} heap",
            self.kind()
        )))
    }
}

pub(crate) fn check_range(what: &str, capacity: u64, offset: u64, size: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(RhiError::Value(format!(
            "{what} out of bounds: {size} bytes at offset {offset} (resource size {capacity})"
        ))),
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("kind", &self.inner.desc.kind)
            .field("size", &self.inner.desc.size)
            .field("stride", &self.inner.desc.stride)
            .field("format", &self.inner.desc.format)
            .field("sparse", &self.inner.sparse.is_some())
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Device {
    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer> {
        self.build_buffer(desc, None)
    }

    /// Creates a buffer inside `heap` at `offset`.
    ///
    /// The heap must have the buffer's kind and hold `heap_size()` bytes from `offset`.
    /// Placements may overlap other resources in the same heap: the overlapping bytes are then
    /// shared, and concurrent writes through different resources race.
    pub fn create_buffer_in(&self, desc: &BufferDesc, heap: &Heap, offset: u64) -> Result<Buffer> {
        self.build_buffer(desc, Some((heap, offset)))
    }

    fn build_buffer(&self, desc: &BufferDesc, placed: Option<(&Heap, u64)>) -> Result<Buffer> {
        if desc.size == 0 {
            return Err(RhiError::Buffer("zero size buffer".into()));
        }
        if let Some(format) = desc.format {
            if desc.size % u64::from(format.bytes_per_pixel()) != 0 {
                return Err(RhiError::Buffer(format!(
                    "size {} is not a multiple of the {format:?} element size",
                    desc.size
                )));
            }
        }
        let limits = self.limits()?;

        let (heap_size, sparse) = if desc.sparse {
            if placed.is_some() {
                return Err(RhiError::Buffer("sparse buffers cannot be placed in a heap".into()));
            }
            self.require(BackendFeatures::SPARSE, "sparse buffers")?;
            let geometry = TileGeometry::for_buffer(desc.size);
            (
                u64::from(geometry.tile_width) * u64::from(geometry.tiles_x),
                Some(SparseState::new(geometry)),
            )
        } else {
            let alignment = limits.buffer_heap_alignment.max(1);
            (desc.size.div_ceil(alignment) * alignment, None)
        };

        let (backing, placement) = match placed {
            None if desc.sparse => (Backing::Sparse, None),
            None => (Backing::Owned, None),
            Some((heap, offset)) => {
                if heap.kind() != desc.kind {
                    return Err(RhiError::Buffer(format!(
                        "unsupported heap type: buffer kind {} placed in a {} heap",
                        desc.kind,
                        heap.kind()
                    )));
                }
                if offset % limits.buffer_placement_alignment.max(1) != 0 {
                    return Err(RhiError::Buffer(format!(
                        "heap offset {offset} is not a multiple of {}",
                        limits.buffer_placement_alignment
                    )));
                }
                check_placement(self, heap, offset, heap_size, RhiError::Buffer)?;
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

        let info = BufferCreateInfo {
            size: desc.size,
            heap_size,
            heap_kind: desc.kind,
            stride: desc.stride,
            format: desc.format,
            sparse: sparse.as_ref().map(SparseState::geometry),
            placement,
        };
        let id = self.with_backend(|backend| backend.create_buffer(&info))?;
        tracing::debug!(
            device = %self.label(),
            kind = %desc.kind,
            size = desc.size,
            heap_size,
            sparse = desc.sparse,
            placed = placement.is_some(),
            ?id,
            "created buffer"
        );
        Ok(Buffer {
            inner: Arc::new(BufferInner {
                device: self.clone(),
                id,
                desc: *desc,
                heap_size,
                backing,
                sparse,
            }),
        })
    }
}
