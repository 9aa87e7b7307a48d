//! CPU reference backend.
//!
//! Every heap is a `Vec<u8>`; buffers and textures are views into heaps, so explicit aliasing
//! behaves exactly as on hardware that honours placed resources. Sparse resources map each
//! 64 KiB tile to a heap range; unbound tiles read as zero and drop writes. Kernels must be
//! [`Kernel::Cpu`] closures, run sequentially one invocation at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::BackendKind;
use crate::compute::{
    CpuKernel, DispatchIndirectArgs, Kernel, KernelContext, KernelMemory, Slot, ViewDimensions,
};
use crate::format::PixelFormat;
use crate::hal::{
    AdapterInfo, BackendFeatures, BackendLimits, BackendLoader, BindingKind, BufferCreateInfo,
    BufferId, BufferTag, ComputeCreateInfo, ComputeId, ComputeTag, CopyOp, GpuBackend, HeapId,
    HeapTag, NativeDevice, NativeTexture, Placement, ResourceId, SamplerId, SamplerTag,
    SwapchainAllocation, SwapchainCreateInfo, SwapchainId, TextureCreateInfo, TextureId,
    TextureTag,
};
use crate::heap::HeapKind;
use crate::registry::ResourceRegistry;
use crate::resource::{TextureDimension, TextureLayout, TileGeometry, SPARSE_TILE_SIZE};
use crate::sampler::{FilterMode, SamplerDesc};
use crate::{Result, RhiError};

/// Shared flag that makes every device of a [`SoftwareLoader`] report device loss.
#[derive(Debug, Clone, Default)]
pub struct DeviceLossSwitch(Arc<AtomicBool>);

impl DeviceLossSwitch {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct SoftwareLoader {
    adapters: Vec<AdapterInfo>,
    debug: bool,
    loss: DeviceLossSwitch,
}

impl Default for SoftwareLoader {
    fn default() -> Self {
        Self::with_adapters(default_adapters())
    }
}

impl SoftwareLoader {
    /// A loader exposing `adapters`, each opened as an independent software device.
    pub fn with_adapters(adapters: Vec<AdapterInfo>) -> Self {
        Self {
            adapters,
            debug: false,
            loss: DeviceLossSwitch::default(),
        }
    }

    pub fn loss_switch(&self) -> DeviceLossSwitch {
        self.loss.clone()
    }
}

/// Two identical adapters, so multi-device behaviour can be exercised without hardware.
fn default_adapters() -> Vec<AdapterInfo> {
    ["Kiln Software Adapter", "Kiln Software Adapter (secondary)"]
        .into_iter()
        .map(|name| AdapterInfo {
            name: name.to_owned(),
            vendor_id: 0,
            device_id: 0,
            is_hardware: false,
            is_discrete: false,
            dedicated_video_memory: 0,
            dedicated_system_memory: 0,
            shared_system_memory: 1 << 30,
        })
        .collect()
}

impl BackendLoader for SoftwareLoader {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn enable_debug(&mut self) {
        self.debug = true;
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        Ok(self.adapters.clone())
    }

    fn open_device(&self, adapter_index: usize) -> Result<Box<dyn GpuBackend>> {
        if adapter_index >= self.adapters.len() {
            return Err(RhiError::DeviceIndex {
                index: adapter_index,
                count: self.adapters.len(),
            });
        }
        Ok(Box::new(SoftwareDevice::new(self.debug, self.loss.clone())))
    }
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| RhiError::Backend(format!("{value} exceeds the address space")))
}

struct HeapMem {
    kind: HeapKind,
    bytes: Vec<u8>,
    /// Explicit placements, for overlap diagnostics.
    placements: HashMap<ResourceId, (u64, u64)>,
}

#[derive(Default)]
struct SparseTable {
    pages: HashMap<([u32; 3], u32), Placement>,
}

enum Memory {
    Linear { heap: HeapId, offset: u64, implicit: bool },
    Sparse { geometry: TileGeometry, table: SparseTable },
}

struct BufferObj {
    size: u64,
    format: Option<PixelFormat>,
    stride: u32,
    memory: Memory,
}

struct TextureObj {
    dimension: TextureDimension,
    format: PixelFormat,
    layout: TextureLayout,
    memory: Memory,
}

#[derive(Clone, Default)]
struct Bindings {
    cbv: Vec<Option<ResourceId>>,
    srv: Vec<Option<ResourceId>>,
    uav: Vec<Option<ResourceId>>,
    samplers: Vec<SamplerDesc>,
}

impl Bindings {
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
    kernel: CpuKernel,
    bindings: Bindings,
}

/// A contiguous run of resource bytes: somewhere in a heap, or in an unbound sparse tile.
#[derive(Debug, Clone, Copy)]
struct Segment {
    target: Option<(HeapId, u64)>,
    len: usize,
}

pub struct SoftwareDevice {
    heaps: ResourceRegistry<HeapTag, HeapMem>,
    buffers: ResourceRegistry<BufferTag, BufferObj>,
    textures: ResourceRegistry<TextureTag, TextureObj>,
    samplers: ResourceRegistry<SamplerTag, SamplerDesc>,
    computes: ResourceRegistry<ComputeTag, ComputeObj>,
    debug: bool,
    messages: Vec<String>,
    loss: DeviceLossSwitch,
}

impl SoftwareDevice {
    fn new(debug: bool, loss: DeviceLossSwitch) -> Self {
        Self {
            heaps: ResourceRegistry::new("heap"),
            buffers: ResourceRegistry::new("buffer"),
            textures: ResourceRegistry::new("texture"),
            samplers: ResourceRegistry::new("sampler"),
            computes: ResourceRegistry::new("compute"),
            debug,
            messages: Vec::new(),
            loss,
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.loss.is_triggered() {
            Err(RhiError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn note(&mut self, message: String) {
        if self.debug {
            self.messages.push(message);
        }
    }

    fn alloc_heap(&mut self, kind: HeapKind, size: u64) -> Result<HeapId> {
        let size = to_usize(size)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| RhiError::Heap(format!("unable to allocate {size} bytes")))?;
        bytes.resize(size, 0);
        Ok(self.heaps.insert(HeapMem {
            kind,
            bytes,
            placements: HashMap::new(),
        }))
    }

    /// Records an explicit placement and reports overlaps with earlier ones.
    fn track_placement(&mut self, resource: ResourceId, placement: Placement, len: u64) -> Result<()> {
        let range = (placement.offset, placement.offset + len);
        let heap = self.heaps.get_mut(placement.heap)?;
        let overlaps: Vec<ResourceId> = heap
            .placements
            .iter()
            .filter(|(_, (start, end))| *start < range.1 && range.0 < *end)
            .map(|(id, _)| *id)
            .collect();
        heap.placements.insert(resource, range);
        for other in overlaps {
            self.note(format!(
                "{resource:?} placed at {}..{} of heap {:?} aliases {other:?}",
                range.0, range.1, placement.heap
            ));
        }
        Ok(())
    }

    fn release_memory(&mut self, resource: ResourceId, memory: &Memory) -> Result<()> {
        match *memory {
            Memory::Linear {
                heap,
                implicit: true,
                ..
            } => self.heaps.remove(heap).map(drop),
            Memory::Linear {
                heap,
                implicit: false,
                ..
            } => {
                if let Ok(heap) = self.heaps.get_mut(heap) {
                    heap.placements.remove(&resource);
                }
                Ok(())
            }
            Memory::Sparse { .. } => Ok(()),
        }
    }

    fn buffer_segments(&self, id: BufferId, offset: u64, len: usize) -> Result<Vec<Segment>> {
        let buffer = self.buffers.get(id)?;
        match &buffer.memory {
            Memory::Linear { heap, offset: base, .. } => Ok(vec![Segment {
                target: Some((*heap, base + offset)),
                len,
            }]),
            Memory::Sparse { table, .. } => {
                let mut segments = Vec::new();
                let mut done = 0usize;
                while done < len {
                    let position = offset + done as u64;
                    let page = (position / SPARSE_TILE_SIZE) as u32;
                    let within = position % SPARSE_TILE_SIZE;
                    let run = ((SPARSE_TILE_SIZE - within) as usize).min(len - done);
                    let target = table
                        .pages
                        .get(&([page, 0, 0], 0))
                        .map(|placement| (placement.heap, placement.offset + within));
                    segments.push(Segment { target, len: run });
                    done += run;
                }
                Ok(segments)
            }
        }
    }

    /// Segments covering `count` texels of one row starting at `origin`.
    fn texel_segments(
        &self,
        id: TextureId,
        slice: u32,
        mip: u32,
        origin: [u32; 3],
        count: u32,
    ) -> Result<Vec<Segment>> {
        let texture = self.textures.get(id)?;
        let layout = &texture.layout;
        let bpp = u64::from(layout.bytes_per_pixel);
        let mip_layout = layout
            .mip(mip)
            .ok_or_else(|| RhiError::Backend(format!("mip {mip} out of range")))?;
        let [x, y, z] = origin;
        match &texture.memory {
            Memory::Linear { heap, offset, .. } => {
                let address = offset
                    + layout.subresource_offset(slice, mip)
                    + (u64::from(z) * u64::from(mip_layout.height) + u64::from(y))
                        * u64::from(mip_layout.row_pitch)
                    + u64::from(x) * bpp;
                Ok(vec![Segment {
                    target: Some((*heap, address)),
                    len: to_usize(u64::from(count) * bpp)?,
                }])
            }
            Memory::Sparse { geometry, table } => Ok((x..x + count)
                .map(|tx| {
                    let (tile, inner) = geometry.locate(tx, y, z);
                    let target = table
                        .pages
                        .get(&(tile, slice))
                        .map(|placement| (placement.heap, placement.offset + inner * bpp));
                    Segment {
                        target,
                        len: bpp as usize,
                    }
                })
                .collect()),
        }
    }

    /// Fills `out` from `segments`; returns how many bytes came from unbound tiles.
    fn read_segments(&self, segments: &[Segment], out: &mut [u8]) -> Result<usize> {
        let mut unbound = 0;
        let mut cursor = 0;
        for segment in segments {
            let dst = &mut out[cursor..cursor + segment.len];
            match segment.target {
                Some((heap, offset)) => {
                    let start = to_usize(offset)?;
                    let bytes = &self.heaps.get(heap)?.bytes;
                    let src = bytes.get(start..start + segment.len).ok_or_else(|| {
                        RhiError::Backend(format!("read past the end of heap {heap:?}"))
                    })?;
                    dst.copy_from_slice(src);
                }
                None => {
                    dst.fill(0);
                    unbound += segment.len;
                }
            }
            cursor += segment.len;
        }
        Ok(unbound)
    }

    fn write_segments(&mut self, segments: &[Segment], data: &[u8]) -> Result<()> {
        let mut cursor = 0;
        for segment in segments {
            if let Some((heap, offset)) = segment.target {
                let start = to_usize(offset)?;
                let bytes = &mut self.heaps.get_mut(heap)?.bytes;
                let dst = bytes.get_mut(start..start + segment.len).ok_or_else(|| {
                    RhiError::Backend(format!("write past the end of heap {heap:?}"))
                })?;
                dst.copy_from_slice(&data[cursor..cursor + segment.len]);
            }
            cursor += segment.len;
        }
        Ok(())
    }

    fn read_buffer_bytes(&mut self, id: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        let segments = self.buffer_segments(id, offset, out.len())?;
        let unbound = self.read_segments(&segments, out)?;
        if unbound > 0 {
            self.note(format!("read {unbound} bytes of unbound sparse tiles in buffer {id:?}"));
        }
        Ok(())
    }

    fn write_buffer_bytes(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let segments = self.buffer_segments(id, offset, data.len())?;
        self.write_segments(&segments, data)
    }

    fn read_texels(
        &mut self,
        id: TextureId,
        slice: u32,
        mip: u32,
        origin: [u32; 3],
        out: &mut [u8],
    ) -> Result<()> {
        let bpp = self.textures.get(id)?.layout.bytes_per_pixel as usize;
        let segments = self.texel_segments(id, slice, mip, origin, (out.len() / bpp) as u32)?;
        let unbound = self.read_segments(&segments, out)?;
        if unbound > 0 {
            self.note(format!("read {unbound} bytes of unbound sparse tiles in texture {id:?}"));
        }
        Ok(())
    }

    fn write_texels(
        &mut self,
        id: TextureId,
        slice: u32,
        mip: u32,
        origin: [u32; 3],
        data: &[u8],
    ) -> Result<()> {
        let bpp = self.textures.get(id)?.layout.bytes_per_pixel as usize;
        let segments = self.texel_segments(id, slice, mip, origin, (data.len() / bpp) as u32)?;
        self.write_segments(&segments, data)
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: TextureId,
        slice: u32,
        mip: u32,
    ) -> Result<()> {
        let layout = self.textures.get(dst)?.layout.clone();
        let m = *layout
            .mip(mip)
            .ok_or_else(|| RhiError::Backend(format!("mip {mip} out of range")))?;
        let mut row = vec![0u8; m.width as usize * layout.bytes_per_pixel as usize];
        for z in 0..m.depth {
            for y in 0..m.height {
                let line = u64::from(z) * u64::from(m.height) + u64::from(y);
                self.read_buffer_bytes(src, src_offset + line * u64::from(m.row_pitch), &mut row)?;
                self.write_texels(dst, slice, mip, [0, y, z], &row)?;
            }
        }
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: TextureId,
        slice: u32,
        mip: u32,
        dst: BufferId,
        dst_offset: u64,
    ) -> Result<()> {
        let layout = self.textures.get(src)?.layout.clone();
        let m = *layout
            .mip(mip)
            .ok_or_else(|| RhiError::Backend(format!("mip {mip} out of range")))?;
        let mut row = vec![0u8; m.width as usize * layout.bytes_per_pixel as usize];
        for z in 0..m.depth {
            for y in 0..m.height {
                let line = u64::from(z) * u64::from(m.height) + u64::from(y);
                self.read_texels(src, slice, mip, [0, y, z], &mut row)?;
                self.write_buffer_bytes(dst, dst_offset + line * u64::from(m.row_pitch), &row)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_texture_region(
        &mut self,
        src: TextureId,
        dst: TextureId,
        slices: (u32, u32),
        mips: (u32, u32),
        src_origin: [u32; 3],
        dst_origin: [u32; 3],
        extent: [u32; 3],
    ) -> Result<()> {
        let bpp = self.textures.get(src)?.layout.bytes_per_pixel;
        let mut row = vec![0u8; extent[0] as usize * bpp as usize];
        for z in 0..extent[2] {
            for y in 0..extent[1] {
                let from = [src_origin[0], src_origin[1] + y, src_origin[2] + z];
                let to = [dst_origin[0], dst_origin[1] + y, dst_origin[2] + z];
                self.read_texels(src, slices.0, mips.0, from, &mut row)?;
                self.write_texels(dst, slices.1, mips.1, to, &row)?;
            }
        }
        Ok(())
    }

    fn resource_exists(&self, resource: ResourceId) -> Result<()> {
        match resource {
            ResourceId::Buffer(id) => self.buffers.get(id).map(drop),
            ResourceId::Texture(id) => self.textures.get(id).map(drop),
        }
    }

    fn run_kernel(&mut self, compute: ComputeId, groups: [u32; 3], push: &[u8]) -> Result<()> {
        let object = self.computes.get(compute)?;
        let kernel = object.kernel.clone();
        let bindings = object.bindings.clone();
        let [wx, wy, wz] = kernel.workgroup_size;
        // Global ids are u32 per axis, so the whole grid must be addressable.
        for (axis, (count, size)) in groups.iter().zip(kernel.workgroup_size).enumerate() {
            if count.checked_mul(size).is_none() {
                return Err(RhiError::Value(format!(
                    "{count} groups of {size} invocations overflow the u32 global id on axis {axis}"
                )));
            }
        }
        let mut view = KernelView {
            device: self,
            bindings: &bindings,
        };
        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    for lz in 0..wz {
                        for ly in 0..wy {
                            for lx in 0..wx {
                                let mut ctx = KernelContext {
                                    global_id: [gx * wx + lx, gy * wy + ly, gz * wz + lz],
                                    group_id: [gx, gy, gz],
                                    local_id: [lx, ly, lz],
                                    push,
                                    memory: &mut view,
                                };
                                (kernel.func)(&mut ctx);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Kernel-visible memory: the device heaps seen through one pipeline's bindings.
struct KernelView<'a> {
    device: &'a mut SoftwareDevice,
    bindings: &'a Bindings,
}

impl KernelView<'_> {
    fn resolve(&self, slot: Slot) -> Option<ResourceId> {
        self.bindings
            .table(slot.kind())
            .get(slot.index() as usize)
            .copied()
            .flatten()
    }

    fn buffer(&self, slot: Slot, offset: u64, len: usize) -> Option<BufferId> {
        let Some(ResourceId::Buffer(id)) = self.resolve(slot) else {
            return None;
        };
        let size = self.device.buffers.get(id).ok()?.size;
        let end = offset.checked_add(len as u64)?;
        (end <= size).then_some(id)
    }

    /// Texture behind `slot` if `coord`/`slice` address a texel of its top mip.
    fn texel(&self, slot: Slot, coord: [u32; 3], slice: u32, len: usize) -> Option<TextureId> {
        let Some(ResourceId::Texture(id)) = self.resolve(slot) else {
            return None;
        };
        let texture = self.device.textures.get(id).ok()?;
        let top = texture.layout.mip(0)?;
        let inside = coord[0] < top.width
            && coord[1] < top.height
            && coord[2] < top.depth
            && slice < texture.layout.slices;
        (inside && len == texture.layout.bytes_per_pixel as usize).then_some(id)
    }

    /// Element size used when a buffer is accessed as a texel array.
    fn element_size(&self, id: BufferId, fallback: usize) -> usize {
        match self.device.buffers.get(id) {
            Ok(buffer) => match (buffer.format, buffer.stride) {
                (Some(format), _) => format.bytes_per_pixel() as usize,
                (None, stride) if stride > 0 => stride as usize,
                _ => fallback,
            },
            Err(_) => fallback,
        }
    }

    fn fetch(&mut self, id: TextureId, format: PixelFormat, coord: [u32; 3], slice: u32) -> Option<[f32; 4]> {
        let mut texel = [0u8; 16];
        let texel = &mut texel[..format.bytes_per_pixel() as usize];
        self.device.read_texels(id, slice, 0, coord, texel).ok()?;
        format.decode_texel(texel)
    }
}

impl KernelMemory for KernelView<'_> {
    fn read(&mut self, slot: Slot, offset: u64, out: &mut [u8]) -> bool {
        match self.buffer(slot, offset, out.len()) {
            Some(id) => self.device.read_buffer_bytes(id, offset, out).is_ok(),
            None => false,
        }
    }

    fn write(&mut self, slot: Slot, offset: u64, data: &[u8]) -> bool {
        match self.buffer(slot, offset, data.len()) {
            Some(id) => self.device.write_buffer_bytes(id, offset, data).is_ok(),
            None => false,
        }
    }

    fn load_texel(&mut self, slot: Slot, coord: [u32; 3], slice: u32, out: &mut [u8]) -> bool {
        if let Some(ResourceId::Buffer(id)) = self.resolve(slot) {
            let offset = u64::from(coord[0]) * self.element_size(id, out.len()) as u64;
            return self.read(slot, offset, out);
        }
        match self.texel(slot, coord, slice, out.len()) {
            Some(id) => self.device.read_texels(id, slice, 0, coord, out).is_ok(),
            None => false,
        }
    }

    fn store_texel(&mut self, slot: Slot, coord: [u32; 3], slice: u32, data: &[u8]) -> bool {
        if let Some(ResourceId::Buffer(id)) = self.resolve(slot) {
            let offset = u64::from(coord[0]) * self.element_size(id, data.len()) as u64;
            return self.write(slot, offset, data);
        }
        match self.texel(slot, coord, slice, data.len()) {
            Some(id) => self.device.write_texels(id, slice, 0, coord, data).is_ok(),
            None => false,
        }
    }

    fn sample(&mut self, sampler: u32, slot: Slot, coord: [f32; 3], slice: u32) -> Option<[f32; 4]> {
        let desc = *self.bindings.samplers.get(sampler as usize)?;
        let Some(ResourceId::Texture(id)) = self.resolve(slot) else {
            return None;
        };
        let texture = self.device.textures.get(id).ok()?;
        let format = texture.format;
        let top = *texture.layout.mip(0)?;
        if slice >= texture.layout.slices {
            return None;
        }
        let axes = match texture.dimension {
            TextureDimension::D1 => 1,
            TextureDimension::D2 => 2,
            TextureDimension::D3 => 3,
        };
        let dims = [top.width, top.height, top.depth];
        let modes = [desc.address_u, desc.address_v, desc.address_w];

        // Without mip selection every lookup counts as magnification.
        if desc.filter_mag == FilterMode::Point {
            let mut texel = [0u32; 3];
            for axis in 0..axes {
                let t = (coord[axis] * dims[axis] as f32).floor() as i64;
                texel[axis] = modes[axis].resolve(t, dims[axis]);
            }
            return self.fetch(id, format, texel, slice);
        }

        let mut base = [0i64; 3];
        let mut frac = [0f32; 3];
        for axis in 0..axes {
            let t = coord[axis] * dims[axis] as f32 - 0.5;
            base[axis] = t.floor() as i64;
            frac[axis] = t - t.floor();
        }
        let mut rgba = [0f32; 4];
        for corner in 0..(1u32 << axes) {
            let mut weight = 1.0;
            let mut texel = [0u32; 3];
            for axis in 0..axes {
                let step = i64::from((corner >> axis) & 1);
                weight *= if step == 1 { frac[axis] } else { 1.0 - frac[axis] };
                texel[axis] = modes[axis].resolve(base[axis] + step, dims[axis]);
            }
            if weight == 0.0 {
                continue;
            }
            let value = self.fetch(id, format, texel, slice)?;
            for (acc, v) in rgba.iter_mut().zip(value) {
                *acc += v * weight;
            }
        }
        Some(rgba)
    }

    fn dimensions(&self, slot: Slot) -> Option<ViewDimensions> {
        match self.resolve(slot)? {
            ResourceId::Buffer(id) => Some(ViewDimensions::Buffer {
                size: self.device.buffers.get(id).ok()?.size,
            }),
            ResourceId::Texture(id) => {
                let texture = self.device.textures.get(id).ok()?;
                let top = texture.layout.mip(0)?;
                Some(ViewDimensions::Texture {
                    width: top.width,
                    height: top.height,
                    depth: top.depth,
                    slices: texture.layout.slices,
                })
            }
        }
    }
}

impl GpuBackend for SoftwareDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::all() - BackendFeatures::PRESENT_NATIVE
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits::default()
    }

    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<HeapId> {
        self.check_alive()?;
        self.alloc_heap(kind, size)
    }

    fn destroy_heap(&mut self, id: HeapId) -> Result<()> {
        self.heaps.remove(id).map(drop)
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo) -> Result<BufferId> {
        self.check_alive()?;
        let memory = match (info.sparse, info.placement) {
            (Some(geometry), _) => Memory::Sparse {
                geometry,
                table: SparseTable::default(),
            },
            (None, Some(placement)) => {
                let heap = self.heaps.get(placement.heap)?;
                if heap.kind != info.heap_kind {
                    return Err(RhiError::Buffer(format!(
                        "heap kind {} does not match buffer kind {}",
                        heap.kind, info.heap_kind
                    )));
                }
                Memory::Linear {
                    heap: placement.heap,
                    offset: placement.offset,
                    implicit: false,
                }
            }
            (None, None) => Memory::Linear {
                heap: self.alloc_heap(info.heap_kind, info.heap_size)?,
                offset: 0,
                implicit: true,
            },
        };
        let id = self.buffers.insert(BufferObj {
            size: info.size,
            format: info.format,
            stride: info.stride,
            memory,
        });
        if let Some(placement) = info.placement {
            self.track_placement(ResourceId::Buffer(id), placement, info.heap_size)?;
        }
        Ok(id)
    }

    fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.buffers.remove(id)?;
        self.release_memory(ResourceId::Buffer(id), &buffer.memory)
    }

    fn create_texture(&mut self, info: &TextureCreateInfo) -> Result<TextureId> {
        self.check_alive()?;
        let total = info.layout.total_size();
        let memory = match (info.sparse, info.placement) {
            (Some(geometry), _) => Memory::Sparse {
                geometry,
                table: SparseTable::default(),
            },
            (None, Some(placement)) => Memory::Linear {
                heap: placement.heap,
                offset: placement.offset,
                implicit: false,
            },
            (None, None) => Memory::Linear {
                heap: self.alloc_heap(HeapKind::Default, total)?,
                offset: 0,
                implicit: true,
            },
        };
        let id = self.textures.insert(TextureObj {
            dimension: info.dimension,
            format: info.format,
            layout: info.layout.clone(),
            memory,
        });
        if let Some(placement) = info.placement {
            self.track_placement(ResourceId::Texture(id), placement, total)?;
        }
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let texture = self.textures.remove(id)?;
        self.release_memory(ResourceId::Texture(id), &texture.memory)
    }

    fn import_texture(
        &mut self,
        _info: &TextureCreateInfo,
        _native: NativeTexture,
    ) -> Result<TextureId> {
        Err(RhiError::Unsupported(
            "the software backend has no native textures to import".into(),
        ))
    }

    fn native_device(&self) -> Option<NativeDevice> {
        None
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        self.check_alive()?;
        Ok(self.samplers.insert(*desc))
    }

    fn destroy_sampler(&mut self, id: SamplerId) -> Result<()> {
        self.samplers.remove(id).map(drop)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.check_alive()?;
        self.write_buffer_bytes(buffer, offset, data)
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_alive()?;
        self.read_buffer_bytes(buffer, offset, out)
    }

    fn copy(&mut self, op: &CopyOp) -> Result<()> {
        self.check_alive()?;
        match *op {
            CopyOp::BufferToBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let mut staging = vec![0u8; to_usize(size)?];
                self.read_buffer_bytes(src, src_offset, &mut staging)?;
                self.write_buffer_bytes(dst, dst_offset, &staging)
            }
            CopyOp::BufferToTexture {
                src,
                src_offset,
                dst,
                dst_slice,
                dst_mip,
            } => self.copy_buffer_to_texture(src, src_offset, dst, dst_slice, dst_mip),
            CopyOp::TextureToBuffer {
                src,
                src_slice,
                src_mip,
                dst,
                dst_offset,
            } => self.copy_texture_to_buffer(src, src_slice, src_mip, dst, dst_offset),
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
            } => self.copy_texture_region(
                src,
                dst,
                (src_slice, dst_slice),
                (src_mip, dst_mip),
                src_origin,
                dst_origin,
                extent,
            ),
        }
    }

    fn bind_tile(
        &mut self,
        resource: ResourceId,
        tile: [u32; 3],
        slice: u32,
        binding: Option<Placement>,
    ) -> Result<()> {
        self.check_alive()?;
        if let Some(placement) = binding {
            let heap_len = self.heaps.get(placement.heap)?.bytes.len() as u64;
            if placement.offset + SPARSE_TILE_SIZE > heap_len {
                return Err(RhiError::Backend(format!(
                    "tile at heap offset {} exceeds heap size {heap_len}",
                    placement.offset
                )));
            }
        }
        let memory = match resource {
            ResourceId::Buffer(id) => &mut self.buffers.get_mut(id)?.memory,
            ResourceId::Texture(id) => &mut self.textures.get_mut(id)?.memory,
        };
        let Memory::Sparse { table, .. } = memory else {
            return Err(RhiError::Value(format!("{resource:?} is not sparse")));
        };
        match binding {
            Some(placement) => table.pages.insert((tile, slice), placement),
            None => table.pages.remove(&(tile, slice)),
        };
        Ok(())
    }

    fn create_compute(&mut self, info: &ComputeCreateInfo<'_>) -> Result<ComputeId> {
        self.check_alive()?;
        let kernel = match info.kernel {
            Kernel::Cpu(kernel) => kernel.clone(),
            Kernel::Binary(binary) => {
                return Err(RhiError::Unsupported(format!(
                    "the software backend only runs CPU kernels, not {:?}",
                    binary.kind
                )))
            }
        };
        if kernel.workgroup_size.contains(&0) {
            return Err(RhiError::Shader(format!(
                "invalid workgroup size {:?}",
                kernel.workgroup_size
            )));
        }
        for resource in info.cbv.iter().chain(&info.srv).chain(&info.uav) {
            self.resource_exists(*resource)?;
        }
        let samplers = info
            .samplers
            .iter()
            .map(|id| self.samplers.get(*id).copied())
            .collect::<Result<Vec<_>>>()?;

        let capacity = info.bindless_capacity as usize;
        let table = |list: &[ResourceId]| {
            let mut slots: Vec<Option<ResourceId>> = list.iter().copied().map(Some).collect();
            slots.resize(capacity.max(list.len()), None);
            slots
        };
        let bindings = Bindings {
            cbv: table(&info.cbv),
            srv: table(&info.srv),
            uav: table(&info.uav),
            samplers,
        };
        Ok(self.computes.insert(ComputeObj { kernel, bindings }))
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
        self.resource_exists(resource)?;
        let object = self.computes.get_mut(compute)?;
        let slot = object
            .bindings
            .table_mut(kind)
            .get_mut(index as usize)
            .ok_or_else(|| RhiError::Value(format!("{} slot {index} out of range", kind.as_str())))?;
        *slot = Some(resource);
        Ok(())
    }

    fn dispatch(&mut self, compute: ComputeId, groups: [u32; 3], push: &[u8]) -> Result<()> {
        self.check_alive()?;
        self.run_kernel(compute, groups, push)
    }

    fn dispatch_indirect(
        &mut self,
        compute: ComputeId,
        args: BufferId,
        offset: u64,
        push: &[u8],
    ) -> Result<()> {
        self.check_alive()?;
        let mut raw = [0u8; DispatchIndirectArgs::SIZE_BYTES as usize];
        self.read_buffer_bytes(args, offset, &mut raw)?;
        let args = DispatchIndirectArgs::from_bytes(&raw)
            .ok_or_else(|| RhiError::Backend("short indirect argument read".into()))?;
        let max = self.limits().max_dispatch_dimension;
        if [args.x, args.y, args.z].iter().any(|v| *v > max) {
            return Err(RhiError::Value(format!(
                "indirect dispatch ({}, {}, {}) exceeds the per-axis limit of {max}",
                args.x, args.y, args.z
            )));
        }
        self.run_kernel(compute, [args.x, args.y, args.z], push)
    }

    fn create_swapchain(&mut self, _info: &SwapchainCreateInfo<'_>) -> Result<SwapchainAllocation> {
        Err(RhiError::Unsupported(
            "the software backend can only present to headless surfaces".into(),
        ))
    }

    fn destroy_swapchain(&mut self, id: SwapchainId) -> Result<()> {
        Err(RhiError::Backend(format!("unknown swapchain {id:?}")))
    }

    fn present(&mut self, swapchain: SwapchainId, _texture: TextureId, _x: u32, _y: u32) -> Result<()> {
        Err(RhiError::Backend(format!("unknown swapchain {swapchain:?}")))
    }

    fn drain_debug_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }
}
