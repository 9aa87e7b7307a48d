//! Vulkan, D3D12, Metal and GL through `wgpu`.
//!
//! `wgpu` has no placed resources, so a heap is one `wgpu::Buffer` and every buffer is a
//! sub-range of its heap's buffer. Buffers placed in the same heap therefore alias. Textures
//! always get their own allocation, and sparse residency is not available.
//!
//! Descriptor tables map to four bind groups: 0 for CBVs, 1 for SRVs, 2 for UAVs and 3 for
//! samplers, with the binding number equal to the slot. A bindless pipeline instead exposes one
//! binding array of storage buffers at binding 0 of each of the first three groups.

use std::borrow::Cow;
use std::num::{NonZeroIsize, NonZeroU32, NonZeroU64, NonZeroUsize};
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures_intrusive::channel::shared::oneshot_channel;
use lru::LruCache;

use crate::backend::BackendKind;
use crate::compute::{Kernel, ShaderKind};
use crate::format::{PixelFormat, SampleKind};
use crate::hal::{
    AdapterInfo, BackendFeatures, BackendLimits, BackendLoader, BindingKind, BufferCreateInfo,
    BufferId, BufferTag, ComputeCreateInfo, ComputeId, ComputeTag, CopyOp, GpuBackend, HeapId,
    HeapTag, NativeDevice, NativeTexture, Placement, ResourceId, SamplerId, SamplerTag,
    SwapchainAllocation, SwapchainCreateInfo, SwapchainId, SwapchainTag, TextureCreateInfo,
    TextureId, TextureTag,
};
use crate::heap::HeapKind;
use crate::registry::ResourceRegistry;
use crate::resource::{TextureDimension, TextureLayout};
use crate::sampler::{AddressMode, FilterMode, SamplerDesc};
use crate::swapchain::SurfaceKind;
use crate::{Result, RhiError};

const LAYOUT_CACHE_CAPACITY: usize = 64;
/// Backs bindless slots that have nothing bound.
const PLACEHOLDER_BUFFER_SIZE: u64 = 256;
const MAX_BINDLESS_CAPACITY: u32 = 1024;
const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

pub struct WgpuLoader {
    kind: BackendKind,
    debug: bool,
    instance: OnceLock<Arc<wgpu::Instance>>,
}

impl WgpuLoader {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            debug: false,
            instance: OnceLock::new(),
        }
    }

    fn instance(&self) -> Result<Arc<wgpu::Instance>> {
        let backends = backends_for(self.kind)?;
        let debug = self.debug;
        Ok(self
            .instance
            .get_or_init(|| {
                let flags = if debug {
                    wgpu::InstanceFlags::debugging()
                } else {
                    wgpu::InstanceFlags::from_build_config()
                };
                Arc::new(wgpu::Instance::new(wgpu::InstanceDescriptor {
                    backends,
                    flags,
                    ..Default::default()
                }))
            })
            .clone())
    }

    fn adapters(&self) -> Result<Vec<wgpu::Adapter>> {
        let backends = backends_for(self.kind)?;
        Ok(self.instance()?.enumerate_adapters(backends))
    }
}

fn backends_for(kind: BackendKind) -> Result<wgpu::Backends> {
    match kind {
        BackendKind::Vulkan => Ok(wgpu::Backends::VULKAN),
        BackendKind::D3D12 => Ok(wgpu::Backends::DX12),
        BackendKind::Metal => Ok(wgpu::Backends::METAL),
        BackendKind::Gl => Ok(wgpu::Backends::GL),
        other => Err(RhiError::Unsupported(format!("wgpu cannot drive the {other} backend"))),
    }
}

fn adapter_info(adapter: &wgpu::Adapter) -> AdapterInfo {
    let info = adapter.get_info();
    AdapterInfo {
        name: info.name,
        vendor_id: info.vendor,
        device_id: info.device,
        is_hardware: info.device_type != wgpu::DeviceType::Cpu,
        is_discrete: info.device_type == wgpu::DeviceType::DiscreteGpu,
        // wgpu does not report memory pools.
        dedicated_video_memory: 0,
        dedicated_system_memory: 0,
        shared_system_memory: 0,
    }
}

impl BackendLoader for WgpuLoader {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn enable_debug(&mut self) {
        self.debug = true;
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        Ok(self.adapters()?.iter().map(adapter_info).collect())
    }

    fn open_device(&self, adapter_index: usize) -> Result<Box<dyn GpuBackend>> {
        let adapters = self.adapters()?;
        let count = adapters.len();
        let adapter = adapters
            .into_iter()
            .nth(adapter_index)
            .ok_or(RhiError::DeviceIndex {
                index: adapter_index,
                count,
            })?;
        Ok(Box::new(WgpuDevice::open(self.kind, self.instance()?, adapter)?))
    }
}

/// Optional `wgpu` features to request: everything the adapter offers that maps to a
/// [`BackendFeatures`] bit, plus 16-bit normalized texture formats.
fn negotiated_features(available: wgpu::Features) -> wgpu::Features {
    let bindless =
        wgpu::Features::BUFFER_BINDING_ARRAY | wgpu::Features::STORAGE_RESOURCE_BINDING_ARRAY;
    let mut requested = wgpu::Features::empty();
    if available.contains(bindless) {
        requested |= bindless;
    }
    for feature in [
        wgpu::Features::PUSH_CONSTANTS,
        wgpu::Features::TEXTURE_FORMAT_16BIT_NORM,
        wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
    ] {
        if available.contains(feature) {
            requested |= feature;
        }
    }
    requested
}

fn backend_features(enabled: wgpu::Features, downlevel: wgpu::DownlevelFlags) -> BackendFeatures {
    let mut features = BackendFeatures::PRESENT_NATIVE;
    if enabled.contains(wgpu::Features::BUFFER_BINDING_ARRAY | wgpu::Features::STORAGE_RESOURCE_BINDING_ARRAY) {
        features |= BackendFeatures::BINDLESS;
    }
    if enabled.contains(wgpu::Features::PUSH_CONSTANTS) {
        features |= BackendFeatures::PUSH_CONSTANTS;
    }
    if downlevel.contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION) {
        features |= BackendFeatures::INDIRECT_DISPATCH;
    }
    features
}

fn backend_limits(limits: &wgpu::Limits) -> BackendLimits {
    BackendLimits {
        max_push_constant_size: limits.max_push_constant_size.min(MAX_PUSH_CONSTANT_SIZE),
        // CBV, SRV and UAV arrays all count against the storage buffer limit.
        max_bindless_capacity: (limits.max_storage_buffers_per_shader_stage / 3)
            .min(MAX_BINDLESS_CAPACITY),
        max_dispatch_dimension: limits.max_compute_workgroups_per_dimension,
        max_texture_dimension_1d: limits.max_texture_dimension_1d,
        max_texture_dimension_2d: limits.max_texture_dimension_2d,
        max_texture_dimension_3d: limits.max_texture_dimension_3d,
        row_pitch_alignment: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
        buffer_heap_alignment: 256,
        buffer_placement_alignment: u64::from(
            limits
                .min_storage_buffer_offset_alignment
                .max(limits.min_uniform_buffer_offset_alignment),
        ),
    }
}

fn map_format(format: PixelFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as T;
    use PixelFormat as P;
    Some(match format {
        P::R32G32B32A32Float => T::Rgba32Float,
        P::R32G32B32A32Uint => T::Rgba32Uint,
        P::R32G32B32A32Sint => T::Rgba32Sint,
        P::R32G32B32Float | P::R32G32B32Uint | P::R32G32B32Sint => return None,
        P::R16G16B16A16Float => T::Rgba16Float,
        P::R16G16B16A16Unorm => T::Rgba16Unorm,
        P::R16G16B16A16Uint => T::Rgba16Uint,
        P::R16G16B16A16Snorm => T::Rgba16Snorm,
        P::R16G16B16A16Sint => T::Rgba16Sint,
        P::R32G32Float => T::Rg32Float,
        P::R32G32Uint => T::Rg32Uint,
        P::R32G32Sint => T::Rg32Sint,
        P::R8G8B8A8Unorm => T::Rgba8Unorm,
        P::R8G8B8A8UnormSrgb => T::Rgba8UnormSrgb,
        P::R8G8B8A8Uint => T::Rgba8Uint,
        P::R8G8B8A8Snorm => T::Rgba8Snorm,
        P::R8G8B8A8Sint => T::Rgba8Sint,
        P::R16G16Float => T::Rg16Float,
        P::R16G16Unorm => T::Rg16Unorm,
        P::R16G16Uint => T::Rg16Uint,
        P::R16G16Snorm => T::Rg16Snorm,
        P::R16G16Sint => T::Rg16Sint,
        P::R32Float => T::R32Float,
        P::R32Uint => T::R32Uint,
        P::R32Sint => T::R32Sint,
        P::R8G8Unorm => T::Rg8Unorm,
        P::R8G8Uint => T::Rg8Uint,
        P::R8G8Snorm => T::Rg8Snorm,
        P::R8G8Sint => T::Rg8Sint,
        P::R16Float => T::R16Float,
        P::R16Unorm => T::R16Unorm,
        P::R16Uint => T::R16Uint,
        P::R16Snorm => T::R16Snorm,
        P::R16Sint => T::R16Sint,
        P::R8Unorm => T::R8Unorm,
        P::R8Uint => T::R8Uint,
        P::R8Snorm => T::R8Snorm,
        P::R8Sint => T::R8Sint,
        P::B8G8R8A8Unorm => T::Bgra8Unorm,
        P::B8G8R8A8UnormSrgb => T::Bgra8UnormSrgb,
    })
}

fn map_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Point => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn map_address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    }
}

fn heap_usages(kind: HeapKind) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match kind {
        HeapKind::Default | HeapKind::Upload => {
            U::STORAGE | U::UNIFORM | U::INDIRECT | U::COPY_SRC | U::COPY_DST
        }
        HeapKind::Readback => U::MAP_READ | U::COPY_DST,
    }
}

fn view_dimension(dimension: TextureDimension, slices: u32) -> wgpu::TextureViewDimension {
    match (dimension, slices) {
        (TextureDimension::D1, _) => wgpu::TextureViewDimension::D1,
        (TextureDimension::D2, 1) => wgpu::TextureViewDimension::D2,
        (TextureDimension::D2, _) => wgpu::TextureViewDimension::D2Array,
        (TextureDimension::D3, _) => wgpu::TextureViewDimension::D3,
    }
}

fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    const MAGIC: u32 = 0x0723_0203;
    if code.len() % 4 != 0 {
        return Err(RhiError::Shader(format!(
            "SPIR-V length {} is not a multiple of 4",
            code.len()
        )));
    }
    let words: Vec<u32> = code
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect();
    if words.first() != Some(&MAGIC) {
        return Err(RhiError::Shader("missing SPIR-V magic number".into()));
    }
    Ok(words)
}

/// What one bind group layout entry expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntryShape {
    Uniform,
    Storage {
        read_only: bool,
    },
    Sampled {
        dimension: wgpu::TextureViewDimension,
        sample_type: wgpu::TextureSampleType,
    },
    StorageTexture {
        dimension: wgpu::TextureViewDimension,
        format: wgpu::TextureFormat,
        access: wgpu::StorageTextureAccess,
    },
    Sampler {
        filtering: bool,
    },
}

impl EntryShape {
    fn layout_entry(self, binding: u32, count: Option<NonZeroU32>) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            EntryShape::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            EntryShape::Storage { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            EntryShape::Sampled {
                dimension,
                sample_type,
            } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension: dimension,
                multisampled: false,
            },
            EntryShape::StorageTexture {
                dimension,
                format,
                access,
            } => wgpu::BindingType::StorageTexture {
                access,
                format,
                view_dimension: dimension,
            },
            EntryShape::Sampler { filtering } => wgpu::BindingType::Sampler(if filtering {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count,
        }
    }
}

/// Pipeline layout identity: the entries of the four groups and the push constant size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LayoutKey {
    groups: [Vec<(EntryShape, Option<NonZeroU32>)>; 4],
    push_size: u32,
}

struct CachedLayout {
    groups: Vec<wgpu::BindGroupLayout>,
    pipeline: wgpu::PipelineLayout,
}

struct HeapBuf {
    kind: HeapKind,
    buffer: wgpu::Buffer,
    /// CPU copy of UPLOAD heaps so writes that are not 4-byte aligned can be widened.
    shadow: Option<Vec<u8>>,
}

struct BufferObj {
    heap: HeapId,
    offset: u64,
    size: u64,
    implicit: bool,
}

struct TextureObj {
    texture: wgpu::Texture,
    dimension: TextureDimension,
    format: PixelFormat,
    layout: TextureLayout,
    storage_access: Option<wgpu::StorageTextureAccess>,
}

/// The `wgpu` shape of a texture layout.
struct TextureShape {
    format: wgpu::TextureFormat,
    dimension: wgpu::TextureDimension,
    size: wgpu::Extent3d,
    mip_level_count: u32,
}

impl TextureShape {
    fn of(info: &TextureCreateInfo) -> Result<Self> {
        let format = map_format(info.format)
            .ok_or_else(|| RhiError::Unsupported(format!("{:?} textures", info.format)))?;
        let top = info
            .layout
            .mip(0)
            .ok_or_else(|| RhiError::Backend("texture layout without mips".into()))?;
        let slices = info.layout.slices;
        let mip_level_count = info.layout.mips.len() as u32;
        let (dimension, depth_or_array_layers) = match info.dimension {
            TextureDimension::D1 if slices == 1 && mip_level_count == 1 => {
                (wgpu::TextureDimension::D1, 1)
            }
            TextureDimension::D2 => (wgpu::TextureDimension::D2, slices),
            TextureDimension::D3 if slices == 1 => (wgpu::TextureDimension::D3, top.depth),
            other => {
                return Err(RhiError::texture(
                    other,
                    "wgpu does not support arrays or mip chains of this dimension",
                ))
            }
        };
        Ok(Self {
            format,
            dimension,
            size: wgpu::Extent3d {
                width: top.width,
                height: top.height,
                depth_or_array_layers,
            },
            mip_level_count,
        })
    }
}

struct SamplerObj {
    sampler: wgpu::Sampler,
    desc: SamplerDesc,
}

#[derive(Default)]
struct Tables {
    cbv: Vec<Option<ResourceId>>,
    srv: Vec<Option<ResourceId>>,
    uav: Vec<Option<ResourceId>>,
    samplers: Vec<SamplerId>,
}

impl Tables {
    fn table(&self, kind: BindingKind) -> &[Option<ResourceId>] {
        match kind {
            BindingKind::Cbv => &self.cbv,
            BindingKind::Srv => &self.srv,
            BindingKind::Uav => &self.uav,
        }
    }

    fn table_mut(&mut self, kind: BindingKind) -> &mut Vec<Option<ResourceId>> {
        match kind {
            BindingKind::Cbv => &mut self.cbv,
            BindingKind::Srv => &mut self.srv,
            BindingKind::Uav => &mut self.uav,
        }
    }
}

struct ComputeObj {
    pipeline: wgpu::ComputePipeline,
    layout: Arc<CachedLayout>,
    key: LayoutKey,
    tables: Tables,
    bindless: bool,
    /// Rebuilt lazily after `bind` changes a table.
    bind_groups: Option<Vec<wgpu::BindGroup>>,
}

struct SwapchainObj {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

/// A bound resource resolved to the `wgpu` object a bind group entry points at.
enum Prepared<'a> {
    Buffer(wgpu::BufferBinding<'a>),
    Texture(wgpu::TextureView),
    Sampler(&'a wgpu::Sampler),
}

pub struct WgpuDevice {
    kind: BackendKind,
    instance: Arc<wgpu::Instance>,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    features: BackendFeatures,
    limits: BackendLimits,

    heaps: ResourceRegistry<HeapTag, HeapBuf>,
    buffers: ResourceRegistry<BufferTag, BufferObj>,
    textures: ResourceRegistry<TextureTag, TextureObj>,
    samplers: ResourceRegistry<SamplerTag, SamplerObj>,
    computes: ResourceRegistry<ComputeTag, ComputeObj>,
    swapchains: ResourceRegistry<SwapchainTag, SwapchainObj>,

    placeholder: wgpu::Buffer,
    layout_cache: LruCache<LayoutKey, Arc<CachedLayout>>,
    messages: Arc<Mutex<Vec<String>>>,
    lost: Arc<AtomicBool>,
}

impl WgpuDevice {
    fn open(kind: BackendKind, instance: Arc<wgpu::Instance>, adapter: wgpu::Adapter) -> Result<Self> {
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(RhiError::Unsupported(format!(
                "adapter {} has no compute shader support",
                adapter.get_info().name
            )));
        }
        let required_features = negotiated_features(adapter.features());
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("kiln wgpu device"),
                required_features,
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|err| RhiError::Backend(err.to_string()))?;

        let messages = Arc::new(Mutex::new(Vec::new()));
        let lost = Arc::new(AtomicBool::new(false));
        {
            let messages = messages.clone();
            let lost = lost.clone();
            device.on_uncaptured_error(Box::new(move |error| {
                if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                    lost.store(true, Ordering::Release);
                }
                messages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(error.to_string());
            }));
        }

        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln bindless placeholder"),
            size: PLACEHOLDER_BUFFER_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let features = backend_features(device.features(), downlevel.flags);
        let limits = backend_limits(&device.limits());
        tracing::debug!(
            backend = %kind,
            adapter = %adapter.get_info().name,
            ?features,
            "opened wgpu device"
        );

        Ok(Self {
            kind,
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            features,
            limits,
            heaps: ResourceRegistry::new("heap"),
            buffers: ResourceRegistry::new("buffer"),
            textures: ResourceRegistry::new("texture"),
            samplers: ResourceRegistry::new("sampler"),
            computes: ResourceRegistry::new("compute"),
            swapchains: ResourceRegistry::new("swapchain"),
            placeholder,
            layout_cache: LruCache::new(
                NonZeroUsize::new(LAYOUT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            messages,
            lost,
        })
    }

    /// Storage access a texture of `format` gets, or `None` when it cannot be a UAV.
    fn storage_access(&self, format: wgpu::TextureFormat) -> Option<wgpu::StorageTextureAccess> {
        let format_features = self.adapter.get_texture_format_features(format);
        if !format_features
            .allowed_usages
            .contains(wgpu::TextureUsages::STORAGE_BINDING)
        {
            None
        } else if format_features
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
        {
            Some(wgpu::StorageTextureAccess::ReadWrite)
        } else {
            Some(wgpu::StorageTextureAccess::WriteOnly)
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            Err(RhiError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Runs `f` inside a validation error scope and converts a captured error with `map`.
    fn scoped<T>(&self, map: fn(String) -> RhiError, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(map(error.to_string())),
            None => Ok(value),
        }
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) -> Result<()> {
        self.scoped(RhiError::Backend, || {
            self.queue.submit(Some(encoder.finish()));
        })
    }

    fn alloc_heap(&mut self, kind: HeapKind, size: u64) -> HeapId {
        let size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(kind.as_str()),
            size,
            usage: heap_usages(kind),
            mapped_at_creation: false,
        });
        let shadow = (kind == HeapKind::Upload).then(|| vec![0; size as usize]);
        self.heaps.insert(HeapBuf {
            kind,
            buffer,
            shadow,
        })
    }

    fn buffer_location(&self, id: BufferId) -> Result<(&HeapBuf, u64, u64)> {
        let buffer = self.buffers.get(id)?;
        Ok((self.heaps.get(buffer.heap)?, buffer.offset, buffer.size))
    }

    fn gpu_readable(heap: &HeapBuf) -> Result<()> {
        if heap.kind == HeapKind::Readback {
            return Err(RhiError::Unsupported(
                "wgpu cannot read READBACK buffers on the GPU".into(),
            ));
        }
        Ok(())
    }

    fn read_mapped(&self, buffer: &wgpu::Buffer, range: Range<u64>) -> Result<Vec<u8>> {
        let slice = buffer.slice(range);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.receive())
            .ok_or_else(|| RhiError::Backend("map_async callback dropped".into()))?
            .map_err(|err| RhiError::Backend(format!("map_async failed: {err}")))?;
        let bytes = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(bytes)
    }

    /// Origin of `slice` and extent of mip `mip` of a texture, in `wgpu` copy terms.
    fn texture_copy(
        texture: &TextureObj,
        slice: u32,
        mip: u32,
        origin: [u32; 3],
    ) -> Result<(wgpu::ImageCopyTexture<'_>, wgpu::Extent3d)> {
        let m = texture
            .layout
            .mip(mip)
            .ok_or_else(|| RhiError::Backend(format!("mip {mip} out of range")))?;
        let (z, depth) = match texture.dimension {
            TextureDimension::D3 => (origin[2], m.depth),
            TextureDimension::D2 => (slice, 1),
            TextureDimension::D1 => (0, 1),
        };
        Ok((
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: mip,
                origin: wgpu::Origin3d {
                    x: origin[0],
                    y: origin[1],
                    z,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: m.width,
                height: m.height,
                depth_or_array_layers: depth,
            },
        ))
    }

    fn linear_layout(texture: &TextureObj, mip: u32, offset: u64) -> Result<wgpu::ImageDataLayout> {
        let m = texture
            .layout
            .mip(mip)
            .ok_or_else(|| RhiError::Backend(format!("mip {mip} out of range")))?;
        if offset % u64::from(texture.layout.bytes_per_pixel) != 0 {
            return Err(RhiError::Unsupported(format!(
                "wgpu needs buffer offset {offset} to be a multiple of the texel size"
            )));
        }
        Ok(wgpu::ImageDataLayout {
            offset,
            bytes_per_row: Some(m.row_pitch),
            rows_per_image: Some(m.height),
        })
    }

    fn shape(&self, kind: BindingKind, resource: ResourceId) -> Result<EntryShape> {
        match resource {
            ResourceId::Buffer(id) => {
                let (heap, _, _) = self.buffer_location(id)?;
                if heap.kind == HeapKind::Readback {
                    return Err(RhiError::Unsupported(
                        "wgpu cannot bind READBACK buffers to shaders".into(),
                    ));
                }
                Ok(match kind {
                    BindingKind::Cbv => EntryShape::Uniform,
                    BindingKind::Srv => EntryShape::Storage { read_only: true },
                    BindingKind::Uav => EntryShape::Storage { read_only: false },
                })
            }
            ResourceId::Texture(id) => {
                let texture = self.textures.get(id)?;
                let dimension = view_dimension(texture.dimension, texture.layout.slices);
                match kind {
                    BindingKind::Cbv => Err(RhiError::Value(
                        "textures cannot be bound as constant buffers".into(),
                    )),
                    BindingKind::Srv => Ok(EntryShape::Sampled {
                        dimension,
                        sample_type: match texture.format.sample_kind() {
                            SampleKind::Float => wgpu::TextureSampleType::Float {
                                filterable: texture.format.is_filterable(),
                            },
                            SampleKind::Uint => wgpu::TextureSampleType::Uint,
                            SampleKind::Sint => wgpu::TextureSampleType::Sint,
                        },
                    }),
                    BindingKind::Uav => {
                        let access = texture.storage_access.ok_or_else(|| {
                            RhiError::Unsupported(format!(
                                "{:?} textures cannot be written from shaders on this adapter",
                                texture.format
                            ))
                        })?;
                        let format = map_format(texture.format).ok_or_else(|| {
                            RhiError::Unsupported(format!("{:?}", texture.format))
                        })?;
                        Ok(EntryShape::StorageTexture {
                            dimension,
                            format,
                            access,
                        })
                    }
                }
            }
        }
    }

    fn layout_key(&self, info: &ComputeCreateInfo<'_>) -> Result<LayoutKey> {
        let bindless = NonZeroU32::new(info.bindless_capacity);
        let table = |kind: BindingKind, list: &[ResourceId]| -> Result<Vec<(EntryShape, Option<NonZeroU32>)>> {
            match bindless {
                Some(count) => {
                    for resource in list {
                        if !matches!(self.shape(kind, *resource)?, EntryShape::Storage { .. } | EntryShape::Uniform) {
                            return Err(RhiError::Unsupported(
                                "wgpu bindless tables only hold buffers".into(),
                            ));
                        }
                    }
                    let read_only = kind != BindingKind::Uav;
                    Ok(vec![(EntryShape::Storage { read_only }, Some(count))])
                }
                None => list
                    .iter()
                    .map(|resource| -> Result<_> { Ok((self.shape(kind, *resource)?, None)) })
                    .collect(),
            }
        };
        let samplers = info
            .samplers
            .iter()
            .map(|id| -> Result<_> {
                let desc = self.samplers.get(*id)?.desc;
                let filtering =
                    desc.filter_min == FilterMode::Linear || desc.filter_mag == FilterMode::Linear;
                Ok((EntryShape::Sampler { filtering }, None))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(LayoutKey {
            groups: [
                table(BindingKind::Cbv, &info.cbv)?,
                table(BindingKind::Srv, &info.srv)?,
                table(BindingKind::Uav, &info.uav)?,
                samplers,
            ],
            push_size: info.push_size,
        })
    }

    fn cached_layout(&mut self, key: &LayoutKey) -> Arc<CachedLayout> {
        if let Some(layout) = self.layout_cache.get(key) {
            return layout.clone();
        }
        let groups: Vec<wgpu::BindGroupLayout> = key
            .groups
            .iter()
            .map(|entries| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
                    .iter()
                    .enumerate()
                    .map(|(binding, (shape, count))| shape.layout_entry(binding as u32, *count))
                    .collect();
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: None,
                        entries: &entries,
                    })
            })
            .collect();
        let push_ranges: Vec<wgpu::PushConstantRange> = (key.push_size > 0)
            .then(|| wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..key.push_size,
            })
            .into_iter()
            .collect();
        let group_refs: Vec<&wgpu::BindGroupLayout> = groups.iter().collect();
        let pipeline = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &group_refs,
                push_constant_ranges: &push_ranges,
            });
        let layout = Arc::new(CachedLayout { groups, pipeline });
        self.layout_cache.put(key.clone(), layout.clone());
        layout
    }

    fn buffer_binding(&self, id: BufferId) -> Result<wgpu::BufferBinding<'_>> {
        let (heap, offset, size) = self.buffer_location(id)?;
        let available = heap.buffer.size() - offset;
        let size = size.next_multiple_of(4).min(available);
        Ok(wgpu::BufferBinding {
            buffer: &heap.buffer,
            offset,
            size: NonZeroU64::new(size),
        })
    }

    fn prepare(&self, resource: ResourceId) -> Result<Prepared<'_>> {
        match resource {
            ResourceId::Buffer(id) => Ok(Prepared::Buffer(self.buffer_binding(id)?)),
            ResourceId::Texture(id) => {
                let texture = self.textures.get(id)?;
                let view = texture.texture.create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(view_dimension(texture.dimension, texture.layout.slices)),
                    ..Default::default()
                });
                Ok(Prepared::Texture(view))
            }
        }
    }

    fn build_bind_groups(&self, object: &ComputeObj) -> Result<Vec<wgpu::BindGroup>> {
        let mut groups = Vec::with_capacity(4);
        for (group, kind) in [BindingKind::Cbv, BindingKind::Srv, BindingKind::Uav]
            .into_iter()
            .enumerate()
        {
            let layout = &object.layout.groups[group];
            let table = object.tables.table(kind);
            let bind_group = if object.bindless {
                let bindings = table
                    .iter()
                    .map(|slot| match slot {
                        Some(ResourceId::Buffer(id)) => self.buffer_binding(*id),
                        _ => Ok(self.placeholder.as_entire_buffer_binding()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::BufferArray(&bindings),
                    }],
                })
            } else {
                let prepared = table
                    .iter()
                    .map(|slot| {
                        let resource = slot.ok_or_else(|| {
                            RhiError::Backend(format!("unfilled {} slot", kind.as_str()))
                        })?;
                        self.prepare(resource)
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.create_group(layout, &prepared)
            };
            groups.push(bind_group);
        }

        let samplers = object
            .tables
            .samplers
            .iter()
            .map(|id| -> Result<_> { Ok(Prepared::Sampler(&self.samplers.get(*id)?.sampler)) })
            .collect::<Result<Vec<_>>>()?;
        groups.push(self.create_group(&object.layout.groups[3], &samplers));
        Ok(groups)
    }

    fn create_group(&self, layout: &wgpu::BindGroupLayout, prepared: &[Prepared<'_>]) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = prepared
            .iter()
            .enumerate()
            .map(|(binding, prepared)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: match prepared {
                    Prepared::Buffer(binding) => wgpu::BindingResource::Buffer(binding.clone()),
                    Prepared::Texture(view) => wgpu::BindingResource::TextureView(view),
                    Prepared::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        })
    }

    fn encode_dispatch(
        &mut self,
        compute: ComputeId,
        push: &[u8],
        work: DispatchWork,
    ) -> Result<()> {
        self.check_alive()?;
        if self.computes.get(compute)?.bind_groups.is_none() {
            let groups = self.build_bind_groups(self.computes.get(compute)?)?;
            self.computes.get_mut(compute)?.bind_groups = Some(groups);
        }
        let object = self.computes.get(compute)?;
        let bind_groups = object
            .bind_groups
            .as_ref()
            .ok_or_else(|| RhiError::Backend("bind groups missing".into()))?;
        let indirect = match work {
            DispatchWork::Indirect { args, offset } => {
                let (heap, base, _) = self.buffer_location(args)?;
                Self::gpu_readable(heap)?;
                Some((&heap.buffer, base + offset))
            }
            DispatchWork::Direct(_) => None,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&object.pipeline);
            for (index, group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            if !push.is_empty() {
                pass.set_push_constants(0, push);
            }
            match (indirect, work) {
                (Some((buffer, offset)), _) => pass.dispatch_workgroups_indirect(buffer, offset),
                (None, DispatchWork::Direct([x, y, z])) => pass.dispatch_workgroups(x, y, z),
                (None, DispatchWork::Indirect { .. }) => {}
            }
        }
        self.submit(encoder)
    }

    fn surface_target(kind: &SurfaceKind) -> Result<wgpu::SurfaceTargetUnsafe> {
        use wgpu::rwh;

        let missing = || RhiError::Swapchain("surface handle is null".into());
        let (raw_display_handle, raw_window_handle) = match *kind {
            SurfaceKind::Win32 { hwnd, hinstance } => {
                let mut window =
                    rwh::Win32WindowHandle::new(NonZeroIsize::new(hwnd as isize).ok_or_else(missing)?);
                window.hinstance = NonZeroIsize::new(hinstance as isize);
                (
                    rwh::RawDisplayHandle::Windows(rwh::WindowsDisplayHandle::new()),
                    rwh::RawWindowHandle::Win32(window),
                )
            }
            SurfaceKind::Xlib { display, window } => (
                rwh::RawDisplayHandle::Xlib(rwh::XlibDisplayHandle::new(NonNull::new(display), 0)),
                rwh::RawWindowHandle::Xlib(rwh::XlibWindowHandle::new(window as _)),
            ),
            SurfaceKind::Wayland { display, surface } => (
                rwh::RawDisplayHandle::Wayland(rwh::WaylandDisplayHandle::new(
                    NonNull::new(display).ok_or_else(missing)?,
                )),
                rwh::RawWindowHandle::Wayland(rwh::WaylandWindowHandle::new(
                    NonNull::new(surface).ok_or_else(missing)?,
                )),
            ),
            SurfaceKind::AppKit { ns_view } => (
                rwh::RawDisplayHandle::AppKit(rwh::AppKitDisplayHandle::new()),
                rwh::RawWindowHandle::AppKit(rwh::AppKitWindowHandle::new(
                    NonNull::new(ns_view).ok_or_else(missing)?,
                )),
            ),
            SurfaceKind::Headless(_) => {
                return Err(RhiError::Swapchain(
                    "headless surfaces are presented without the backend".into(),
                ))
            }
        };
        Ok(wgpu::SurfaceTargetUnsafe::RawHandle {
            raw_display_handle,
            raw_window_handle,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum DispatchWork {
    Direct([u32; 3]),
    Indirect { args: BufferId, offset: u64 },
}

impl GpuBackend for WgpuDevice {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn features(&self) -> BackendFeatures {
        self.features
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<HeapId> {
        self.check_alive()?;
        Ok(self.alloc_heap(kind, size))
    }

    fn destroy_heap(&mut self, id: HeapId) -> Result<()> {
        let heap = self.heaps.remove(id)?;
        heap.buffer.destroy();
        Ok(())
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo) -> Result<BufferId> {
        self.check_alive()?;
        if info.sparse.is_some() {
            return Err(RhiError::Unsupported("wgpu has no sparse buffers".into()));
        }
        let (heap, offset, implicit) = match info.placement {
            Some(Placement { heap, offset }) => (heap, offset, false),
            None => (self.alloc_heap(info.heap_kind, info.heap_size), 0, true),
        };
        Ok(self.buffers.insert(BufferObj {
            heap,
            offset,
            size: info.size,
            implicit,
        }))
    }

    fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.buffers.remove(id)?;
        if buffer.implicit {
            self.destroy_heap(buffer.heap)?;
        }
        Ok(())
    }

    fn create_texture(&mut self, info: &TextureCreateInfo) -> Result<TextureId> {
        self.check_alive()?;
        if info.sparse.is_some() || info.placement.is_some() {
            return Err(RhiError::Unsupported(
                "wgpu textures cannot be sparse or placed in heaps".into(),
            ));
        }
        let shape = TextureShape::of(info)?;
        let storage_access = self.storage_access(shape.format);
        let mut usage = wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::TEXTURE_BINDING;
        if storage_access.is_some() {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let texture = self.scoped(RhiError::Backend, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: None,
                size: shape.size,
                mip_level_count: shape.mip_level_count,
                sample_count: 1,
                dimension: shape.dimension,
                format: shape.format,
                usage,
                view_formats: &[],
            })
        })?;
        Ok(self.textures.insert(TextureObj {
            texture,
            dimension: info.dimension,
            format: info.format,
            layout: info.layout.clone(),
            storage_access,
        }))
    }

    fn import_texture(
        &mut self,
        info: &TextureCreateInfo,
        native: NativeTexture,
    ) -> Result<TextureId> {
        self.check_alive()?;
        let NativeTexture::Wgpu(texture) = native;
        let shape = TextureShape::of(info)?;
        let mismatch = |what: &str, found: String| {
            RhiError::texture(info.dimension, format!("native texture {what} is {found}"))
        };
        if texture.size() != shape.size {
            return Err(mismatch("size", format!("{:?}", texture.size())));
        }
        if texture.dimension() != shape.dimension {
            return Err(mismatch("dimension", format!("{:?}", texture.dimension())));
        }
        if texture.format() != shape.format {
            return Err(mismatch("format", format!("{:?}", texture.format())));
        }
        if texture.mip_level_count() != shape.mip_level_count {
            return Err(mismatch("mip count", texture.mip_level_count().to_string()));
        }
        if texture.sample_count() != 1 {
            return Err(mismatch("sample count", texture.sample_count().to_string()));
        }
        let required = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        if !texture.usage().contains(required) {
            let found = format!("{:?} without COPY_SRC | COPY_DST", texture.usage());
            return Err(mismatch("usage", found));
        }
        let storage_access = if texture.usage().contains(wgpu::TextureUsages::STORAGE_BINDING) {
            self.storage_access(shape.format)
        } else {
            None
        };
        tracing::debug!(backend = %self.kind, format = ?shape.format, "imported native texture");
        Ok(self.textures.insert(TextureObj {
            texture,
            dimension: info.dimension,
            format: info.format,
            layout: info.layout.clone(),
            storage_access,
        }))
    }

    fn native_device(&self) -> Option<NativeDevice> {
        Some(NativeDevice::Wgpu {
            device: self.device.clone(),
            queue: self.queue.clone(),
        })
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let texture = self.textures.remove(id)?;
        texture.texture.destroy();
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        self.check_alive()?;
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: map_address_mode(desc.address_u),
            address_mode_v: map_address_mode(desc.address_v),
            address_mode_w: map_address_mode(desc.address_w),
            mag_filter: map_filter_mode(desc.filter_mag),
            min_filter: map_filter_mode(desc.filter_min),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Ok(self.samplers.insert(SamplerObj {
            sampler,
            desc: *desc,
        }))
    }

    fn destroy_sampler(&mut self, id: SamplerId) -> Result<()> {
        self.samplers.remove(id).map(drop)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.check_alive()?;
        let object = self.buffers.get(buffer)?;
        let start = object.offset + offset;
        let heap = self.heaps.get_mut(object.heap)?;
        let shadow = heap
            .shadow
            .as_mut()
            .ok_or_else(|| RhiError::Buffer("only UPLOAD buffers accept CPU writes".into()))?;
        let start = start as usize;
        shadow[start..start + data.len()].copy_from_slice(data);

        // Queue writes must be 4-byte aligned; widen to the enclosing words.
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let from = start - start % align;
        let to = (start + data.len()).next_multiple_of(align).min(shadow.len());
        self.queue.write_buffer(&heap.buffer, from as u64, &shadow[from..to]);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_alive()?;
        if out.is_empty() {
            return Ok(());
        }
        let (heap, base, _) = self.buffer_location(buffer)?;
        let start = base + offset;
        let from = start - start % wgpu::MAP_ALIGNMENT;
        let to = (start + out.len() as u64)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            .min(heap.buffer.size());
        let bytes = self.read_mapped(&heap.buffer, from..to)?;
        let skip = (start - from) as usize;
        out.copy_from_slice(&bytes[skip..skip + out.len()]);
        Ok(())
    }

    fn copy(&mut self, op: &CopyOp) -> Result<()> {
        self.check_alive()?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln copy"),
            });
        match *op {
            CopyOp::BufferToBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let (src_heap, src_base, _) = self.buffer_location(src)?;
                let (dst_heap, dst_base, _) = self.buffer_location(dst)?;
                Self::gpu_readable(src_heap)?;
                let (from, to) = (src_base + src_offset, dst_base + dst_offset);
                let align = wgpu::COPY_BUFFER_ALIGNMENT;
                if from % align != 0 || to % align != 0 || size % align != 0 {
                    return Err(RhiError::Unsupported(format!(
                        "wgpu buffer copies need {align}-byte aligned offsets and sizes"
                    )));
                }
                encoder.copy_buffer_to_buffer(&src_heap.buffer, from, &dst_heap.buffer, to, size);
            }
            CopyOp::BufferToTexture {
                src,
                src_offset,
                dst,
                dst_slice,
                dst_mip,
            } => {
                let (heap, base, _) = self.buffer_location(src)?;
                Self::gpu_readable(heap)?;
                let texture = self.textures.get(dst)?;
                let layout = Self::linear_layout(texture, dst_mip, base + src_offset)?;
                let (copy, extent) = Self::texture_copy(texture, dst_slice, dst_mip, [0; 3])?;
                encoder.copy_buffer_to_texture(
                    wgpu::ImageCopyBuffer {
                        buffer: &heap.buffer,
                        layout,
                    },
                    copy,
                    extent,
                );
            }
            CopyOp::TextureToBuffer {
                src,
                src_slice,
                src_mip,
                dst,
                dst_offset,
            } => {
                let (heap, base, _) = self.buffer_location(dst)?;
                let texture = self.textures.get(src)?;
                let layout = Self::linear_layout(texture, src_mip, base + dst_offset)?;
                let (copy, extent) = Self::texture_copy(texture, src_slice, src_mip, [0; 3])?;
                encoder.copy_texture_to_buffer(
                    copy,
                    wgpu::ImageCopyBuffer {
                        buffer: &heap.buffer,
                        layout,
                    },
                    extent,
                );
            }
            CopyOp::TextureToTexture {
                src,
                dst,
                src_slice,
                dst_slice,
                src_mip,
                dst_mip,
                src_origin,
                dst_origin,
                extent,
            } => {
                let (from, _) = Self::texture_copy(self.textures.get(src)?, src_slice, src_mip, src_origin)?;
                let (to, _) = Self::texture_copy(self.textures.get(dst)?, dst_slice, dst_mip, dst_origin)?;
                encoder.copy_texture_to_texture(
                    from,
                    to,
                    wgpu::Extent3d {
                        width: extent[0],
                        height: extent[1],
                        depth_or_array_layers: extent[2],
                    },
                );
            }
        }
        self.submit(encoder)
    }

    fn bind_tile(
        &mut self,
        _resource: ResourceId,
        _tile: [u32; 3],
        _slice: u32,
        _binding: Option<Placement>,
    ) -> Result<()> {
        Err(RhiError::Unsupported("wgpu has no sparse residency".into()))
    }

    fn create_compute(&mut self, info: &ComputeCreateInfo<'_>) -> Result<ComputeId> {
        self.check_alive()?;
        let binary = match info.kernel {
            Kernel::Binary(binary) => binary,
            Kernel::Cpu(_) => {
                return Err(RhiError::Unsupported(
                    "CPU kernels only run on the software backend".into(),
                ))
            }
        };
        let source = match binary.kind {
            ShaderKind::Wgsl => wgpu::ShaderSource::Wgsl(Cow::Owned(
                String::from_utf8(binary.code.to_vec())
                    .map_err(|err| RhiError::Shader(format!("WGSL is not UTF-8: {err}")))?,
            )),
            ShaderKind::SpirV => wgpu::ShaderSource::SpirV(Cow::Owned(spirv_words(&binary.code)?)),
            other => {
                return Err(RhiError::Unsupported(format!(
                    "wgpu cannot load {other:?} shaders"
                )))
            }
        };

        let key = self.layout_key(info)?;
        let layout = self.cached_layout(&key);
        let pipeline = self.scoped(RhiError::Shader, || {
            let module = self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: None,
                    source,
                });
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: None,
                    layout: Some(&layout.pipeline),
                    module: &module,
                    entry_point: &binary.entry_point,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                })
        })?;

        let capacity = info.bindless_capacity as usize;
        let table = |list: &[ResourceId]| {
            let mut slots: Vec<Option<ResourceId>> = list.iter().copied().map(Some).collect();
            slots.resize(capacity.max(list.len()), None);
            slots
        };
        Ok(self.computes.insert(ComputeObj {
            pipeline,
            layout,
            key,
            tables: Tables {
                cbv: table(&info.cbv),
                srv: table(&info.srv),
                uav: table(&info.uav),
                samplers: info.samplers.clone(),
            },
            bindless: capacity > 0,
            bind_groups: None,
        }))
    }

    fn destroy_compute(&mut self, id: ComputeId) -> Result<()> {
        self.computes.remove(id).map(drop)
    }

    fn bind(
        &mut self,
        compute: ComputeId,
        kind: BindingKind,
        index: u32,
        resource: ResourceId,
    ) -> Result<()> {
        self.check_alive()?;
        let shape = self.shape(kind, resource)?;
        let object = self.computes.get_mut(compute)?;
        let group = match kind {
            BindingKind::Cbv => 0,
            BindingKind::Srv => 1,
            BindingKind::Uav => 2,
        };
        let expected = object.key.groups[group].first().map(|(shape, _)| *shape);
        let buffer_table = matches!(expected, Some(EntryShape::Storage { .. }));
        if !(buffer_table && matches!(shape, EntryShape::Storage { .. } | EntryShape::Uniform)) {
            return Err(RhiError::Unsupported(
                "wgpu bindless tables only hold buffers".into(),
            ));
        }
        let slot = object
            .tables
            .table_mut(kind)
            .get_mut(index as usize)
            .ok_or_else(|| RhiError::Value(format!("{} slot {index} out of range", kind.as_str())))?;
        *slot = Some(resource);
        object.bind_groups = None;
        Ok(())
    }

    fn dispatch(&mut self, compute: ComputeId, groups: [u32; 3], push: &[u8]) -> Result<()> {
        self.encode_dispatch(compute, push, DispatchWork::Direct(groups))
    }

    fn dispatch_indirect(
        &mut self,
        compute: ComputeId,
        args: BufferId,
        offset: u64,
        push: &[u8],
    ) -> Result<()> {
        self.encode_dispatch(compute, push, DispatchWork::Indirect { args, offset })
    }

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo<'_>) -> Result<SwapchainAllocation> {
        self.check_alive()?;
        if info.width == 0 || info.height == 0 {
            return Err(RhiError::Swapchain(
                "native surfaces need an explicit size on this backend".into(),
            ));
        }
        let format = map_format(info.format)
            .ok_or_else(|| RhiError::Unsupported(format!("{:?} swapchains", info.format)))?;
        let target = Self::surface_target(&info.surface.kind)?;
        // SAFETY: the caller of the `SurfaceHandle` constructor guaranteed the native handles
        // outlive every swapchain created on them.
        let surface = unsafe { self.instance.create_surface_unsafe(target) }
            .map_err(|err| RhiError::Swapchain(err.to_string()))?;

        let caps = surface.get_capabilities(&self.adapter);
        if !caps.formats.contains(&format) {
            return Err(RhiError::Swapchain(format!(
                "surface does not support {:?}",
                info.format
            )));
        }
        if !caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
            return Err(RhiError::Unsupported("surface images cannot be copied into".into()));
        }
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::COPY_DST,
            format,
            width: info.width,
            height: info.height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: info.buffer_count.saturating_sub(1).max(1),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: Vec::new(),
        };
        self.scoped(RhiError::Swapchain, || surface.configure(&self.device, &config))?;
        let (width, height) = (config.width, config.height);
        let id = self.swapchains.insert(SwapchainObj { surface, config });
        Ok(SwapchainAllocation { id, width, height })
    }

    fn destroy_swapchain(&mut self, id: SwapchainId) -> Result<()> {
        self.swapchains.remove(id).map(drop)
    }

    fn present(&mut self, swapchain: SwapchainId, texture: TextureId, x: u32, y: u32) -> Result<()> {
        self.check_alive()?;
        let chain = self.swapchains.get(swapchain)?;
        let source = self.textures.get(texture)?;
        let frame = chain
            .surface
            .get_current_texture()
            .map_err(|err| RhiError::Swapchain(err.to_string()))?;

        let top = source
            .layout
            .mip(0)
            .ok_or_else(|| RhiError::Backend("texture layout without mips".into()))?;
        let width = top.width.min(chain.config.width.saturating_sub(x));
        let height = top.height.min(chain.config.height.saturating_sub(y));
        if width > 0 && height > 0 {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("kiln present"),
                });
            encoder.copy_texture_to_texture(
                source.texture.as_image_copy(),
                wgpu::ImageCopyTexture {
                    texture: &frame.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x, y, z: 0 },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
            self.submit(encoder)?;
        }
        frame.present();
        Ok(())
    }

    fn drain_debug_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
