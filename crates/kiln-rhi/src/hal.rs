//! Backend capability set.
//!
//! Every native API is reached through two traits: a [`BackendLoader`] that enumerates adapters
//! and opens devices, and a per-device [`GpuBackend`] that owns native objects behind [`Id`]
//! handles. The public resource types validate arguments before calling into these traits, so a
//! backend may assume every descriptor it receives is in range.

use std::fmt;
#[cfg(feature = "wgpu")]
use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::BackendKind;
use crate::compute::Kernel;
use crate::format::PixelFormat;
use crate::heap::HeapKind;
use crate::registry::Id;
use crate::resource::{TextureDimension, TextureLayout, TileGeometry};
use crate::sampler::SamplerDesc;
use crate::swapchain::SurfaceHandle;
use crate::Result;

pub enum HeapTag {}
pub enum BufferTag {}
pub enum TextureTag {}
pub enum SamplerTag {}
pub enum ComputeTag {}
pub enum SwapchainTag {}

pub type HeapId = Id<HeapTag>;
pub type BufferId = Id<BufferTag>;
pub type TextureId = Id<TextureTag>;
pub type SamplerId = Id<SamplerTag>;
pub type ComputeId = Id<ComputeTag>;
pub type SwapchainId = Id<SwapchainTag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Buffer(BufferId),
    Texture(TextureId),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BackendFeatures: u32 {
        /// Tiled resources whose pages are bound with `bind_tile`.
        const SPARSE = 1 << 0;
        /// Descriptor tables indexable at runtime.
        const BINDLESS = 1 << 1;
        const PUSH_CONSTANTS = 1 << 2;
        const INDIRECT_DISPATCH = 1 << 3;
        /// Textures placed in an explicit heap share that heap's memory.
        const TEXTURE_ALIASING = 1 << 4;
        /// Swapchains on window-system surfaces.
        const PRESENT_NATIVE = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendLimits {
    pub max_push_constant_size: u32,
    pub max_bindless_capacity: u32,
    pub max_dispatch_dimension: u32,
    pub max_texture_dimension_1d: u32,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    /// Row pitch of texture rows in their linear (buffer) representation.
    pub row_pitch_alignment: u32,
    /// Granularity of heap space consumed by a buffer.
    pub buffer_heap_alignment: u64,
    /// Required alignment of a buffer's offset inside an explicit heap.
    pub buffer_placement_alignment: u64,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            max_push_constant_size: 128,
            max_bindless_capacity: 1024,
            max_dispatch_dimension: 65535,
            max_texture_dimension_1d: 16384,
            max_texture_dimension_2d: 16384,
            max_texture_dimension_3d: 2048,
            row_pitch_alignment: 256,
            buffer_heap_alignment: 256,
            buffer_placement_alignment: 1,
        }
    }
}

/// Physical adapter description as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub is_hardware: bool,
    pub is_discrete: bool,
    pub dedicated_video_memory: u64,
    pub dedicated_system_memory: u64,
    pub shared_system_memory: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub heap: HeapId,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub size: u64,
    pub heap_size: u64,
    pub heap_kind: HeapKind,
    pub stride: u32,
    pub format: Option<PixelFormat>,
    pub sparse: Option<TileGeometry>,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureCreateInfo {
    pub dimension: TextureDimension,
    pub format: PixelFormat,
    pub layout: TextureLayout,
    pub sparse: Option<TileGeometry>,
    pub placement: Option<Placement>,
}

/// A texture object created directly on the native API, handed over by
/// [`crate::Device::texture_from_native`].
#[non_exhaustive]
pub enum NativeTexture {
    #[cfg(feature = "wgpu")]
    Wgpu(wgpu::Texture),
}

impl fmt::Debug for NativeTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            #[cfg(feature = "wgpu")]
            NativeTexture::Wgpu(ref texture) => f.debug_tuple("Wgpu").field(texture).finish(),
        }
    }
}

/// The native device behind a [`crate::Device`], for creating objects to import.
#[derive(Clone)]
#[non_exhaustive]
pub enum NativeDevice {
    #[cfg(feature = "wgpu")]
    Wgpu {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    },
}

/// A fully validated transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOp {
    BufferToBuffer {
        src: BufferId,
        dst: BufferId,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    /// The buffer holds one subresource in the texture's linear layout (row pitch per mip).
    BufferToTexture {
        src: BufferId,
        src_offset: u64,
        dst: TextureId,
        dst_slice: u32,
        dst_mip: u32,
    },
    TextureToBuffer {
        src: TextureId,
        src_slice: u32,
        src_mip: u32,
        dst: BufferId,
        dst_offset: u64,
    },
    TextureToTexture {
        src: TextureId,
        dst: TextureId,
        src_slice: u32,
        dst_slice: u32,
        src_mip: u32,
        dst_mip: u32,
        src_origin: [u32; 3],
        dst_origin: [u32; 3],
        extent: [u32; 3],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Cbv,
    Srv,
    Uav,
}

impl BindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BindingKind::Cbv => "cbv",
            BindingKind::Srv => "srv",
            BindingKind::Uav => "uav",
        }
    }
}

pub struct ComputeCreateInfo<'a> {
    pub kernel: &'a Kernel,
    pub cbv: Vec<ResourceId>,
    pub srv: Vec<ResourceId>,
    pub uav: Vec<ResourceId>,
    pub samplers: Vec<SamplerId>,
    pub push_size: u32,
    pub bindless_capacity: u32,
}

pub struct SwapchainCreateInfo<'a> {
    pub surface: &'a SurfaceHandle,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainAllocation {
    pub id: SwapchainId,
    pub width: u32,
    pub height: u32,
}

/// Adapter enumeration and device creation for one native API.
pub trait BackendLoader: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Turn on native validation. Only honoured before the first `enumerate_adapters` call.
    fn enable_debug(&mut self);

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>>;

    fn open_device(&self, adapter_index: usize) -> Result<Box<dyn GpuBackend>>;
}

/// Operations on one opened device.
///
/// Calls arrive from a single submission thread at a time (the owning [`crate::Device`]
/// serializes them), in program order.
pub trait GpuBackend: Send {
    fn kind(&self) -> BackendKind;
    fn features(&self) -> BackendFeatures;
    fn limits(&self) -> BackendLimits;

    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<HeapId>;
    fn destroy_heap(&mut self, id: HeapId) -> Result<()>;

    fn create_buffer(&mut self, info: &BufferCreateInfo) -> Result<BufferId>;
    fn destroy_buffer(&mut self, id: BufferId) -> Result<()>;

    fn create_texture(&mut self, info: &TextureCreateInfo) -> Result<TextureId>;
    /// Adopt `native` as a texture laid out as `info` describes. Fails when the two disagree.
    fn import_texture(&mut self, info: &TextureCreateInfo, native: NativeTexture)
        -> Result<TextureId>;
    fn destroy_texture(&mut self, id: TextureId) -> Result<()>;

    fn native_device(&self) -> Option<NativeDevice>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId>;
    fn destroy_sampler(&mut self, id: SamplerId) -> Result<()>;

    /// CPU write into an UPLOAD-heap buffer.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;
    /// CPU read from a READBACK-heap buffer. Waits for all prior submissions.
    fn read_buffer(&mut self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()>;

    fn copy(&mut self, op: &CopyOp) -> Result<()>;

    /// Rebind (or unbind, with `None`) one page of a sparse resource.
    fn bind_tile(
        &mut self,
        resource: ResourceId,
        tile: [u32; 3],
        slice: u32,
        binding: Option<Placement>,
    ) -> Result<()>;

    fn create_compute(&mut self, info: &ComputeCreateInfo<'_>) -> Result<ComputeId>;
    fn destroy_compute(&mut self, id: ComputeId) -> Result<()>;
    fn bind(
        &mut self,
        compute: ComputeId,
        kind: BindingKind,
        index: u32,
        resource: ResourceId,
    ) -> Result<()>;
    fn dispatch(&mut self, compute: ComputeId, groups: [u32; 3], push: &[u8]) -> Result<()>;
    fn dispatch_indirect(
        &mut self,
        compute: ComputeId,
        args: BufferId,
        offset: u64,
        push: &[u8],
    ) -> Result<()>;

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo<'_>) -> Result<SwapchainAllocation>;
    fn destroy_swapchain(&mut self, id: SwapchainId) -> Result<()>;
    fn present(&mut self, swapchain: SwapchainId, texture: TextureId, x: u32, y: u32)
        -> Result<()>;

    /// Drain messages produced by the native validation layer since the last call.
    fn drain_debug_messages(&mut self) -> Vec<String>;
}
