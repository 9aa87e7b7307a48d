use std::fmt;
use std::sync::Arc;

use crate::hal::HeapId;
use crate::{Device, Result, RhiError};

/// Memory class of a heap.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// GPU-local memory; not CPU accessible.
    Default = 0,
    /// CPU-writable staging memory.
    Upload = 1,
    /// CPU-readable staging memory.
    Readback = 2,
}

impl HeapKind {
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Default),
            1 => Ok(Self::Upload),
            2 => Ok(Self::Readback),
            other => Err(RhiError::Heap(format!("invalid heap kind {other}"))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Upload => "UPLOAD",
            Self::Readback => "READBACK",
        }
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct HeapInner {
    device: Device,
    id: HeapId,
    kind: HeapKind,
    size: u64,
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        let id = self.id;
        self.device.release("heap", |backend| backend.destroy_heap(id));
    }
}

/// A fixed-size memory arena resources can be placed into.
///
/// Several resources may share one heap, including at overlapping offsets; writes through one
/// of them are then visible through the others. Nothing serializes those writes.
#[derive(Clone)]
pub struct Heap {
    inner: Arc<HeapInner>,
}

impl Heap {
    pub fn kind(&self) -> HeapKind {
        self.inner.kind
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub(crate) fn id(&self) -> HeapId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &Heap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("kind", &self.inner.kind)
            .field("size", &self.inner.size)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Device {
    pub fn create_heap(&self, kind: HeapKind, size: u64) -> Result<Heap> {
        if size == 0 {
            return Err(RhiError::Heap("heap size cannot be 0".into()));
        }
        let id = self.with_backend(|backend| backend.create_heap(kind, size))?;
        tracing::debug!(device = %self.label(), %kind, size, ?id, "created heap");
        Ok(Heap {
            inner: Arc::new(HeapInner {
                device: self.clone(),
                id,
                kind,
                size,
            }),
        })
    }
}
