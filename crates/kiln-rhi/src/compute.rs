//! Compute pipelines: a kernel plus its resource bindings.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use bytemuck::{Pod, Zeroable};

use crate::hal::{BackendFeatures, BindingKind, ComputeCreateInfo, ComputeId, ResourceId};
use crate::resource::{AnyResource, Buffer, Resource};
use crate::sampler::Sampler;
use crate::{Device, Result, RhiError};

/// Encoding of a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Wgsl,
    SpirV,
    Dxil,
    Msl,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ShaderBinary {
    pub kind: ShaderKind,
    pub code: Arc<[u8]>,
    pub entry_point: String,
}

impl fmt::Debug for ShaderBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderBinary")
            .field("kind", &self.kind)
            .field("code_len", &self.code.len())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

pub type KernelFn = dyn Fn(&mut KernelContext<'_>) + Send + Sync;

/// A kernel written in Rust, run by the software backend once per invocation.
///
/// The closure runs while the device is busy executing the dispatch, so it must not call back
/// into the device.
#[derive(Clone)]
pub struct CpuKernel {
    pub workgroup_size: [u32; 3],
    pub func: Arc<KernelFn>,
}

impl fmt::Debug for CpuKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuKernel")
            .field("workgroup_size", &self.workgroup_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Kernel {
    Binary(ShaderBinary),
    Cpu(CpuKernel),
}

impl Kernel {
    pub fn wgsl(source: &str, entry_point: &str) -> Self {
        Self::binary(ShaderKind::Wgsl, source.as_bytes(), entry_point)
    }

    pub fn spirv(code: &[u8], entry_point: &str) -> Self {
        Self::binary(ShaderKind::SpirV, code, entry_point)
    }

    pub fn binary(kind: ShaderKind, code: &[u8], entry_point: &str) -> Self {
        Kernel::Binary(ShaderBinary {
            kind,
            code: Arc::from(code),
            entry_point: entry_point.to_owned(),
        })
    }

    pub fn cpu(
        workgroup_size: [u32; 3],
        func: impl Fn(&mut KernelContext<'_>) + Send + Sync + 'static,
    ) -> Self {
        Kernel::Cpu(CpuKernel {
            workgroup_size,
            func: Arc::new(func),
        })
    }

    fn describe(&self) -> String {
        match self {
            Kernel::Binary(binary) => format!("{:?}:{}", binary.kind, binary.entry_point),
            Kernel::Cpu(cpu) => format!("cpu{:?}", cpu.workgroup_size),
        }
    }
}

/// Arguments read by [`Compute::dispatch_indirect`]: three little-endian `u32` group counts.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchIndirectArgs {
    pub const SIZE_BYTES: u64 = mem::size_of::<Self>() as u64;
    pub const ALIGN_BYTES: u64 = mem::align_of::<Self>() as u64;

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads arguments from the first [`Self::SIZE_BYTES`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE_BYTES as usize)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }
}

/// A binding slot as seen from kernel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Cbv(u32),
    Srv(u32),
    Uav(u32),
}

impl Slot {
    pub fn kind(self) -> BindingKind {
        match self {
            Slot::Cbv(_) => BindingKind::Cbv,
            Slot::Srv(_) => BindingKind::Srv,
            Slot::Uav(_) => BindingKind::Uav,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            Slot::Cbv(index) | Slot::Srv(index) | Slot::Uav(index) => index,
        }
    }
}

/// Extent of the resource behind a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDimensions {
    Buffer { size: u64 },
    Texture { width: u32, height: u32, depth: u32, slices: u32 },
}

/// Memory access for CPU kernels, provided by the executing backend.
pub(crate) trait KernelMemory {
    fn read(&mut self, slot: Slot, offset: u64, out: &mut [u8]) -> bool;
    fn write(&mut self, slot: Slot, offset: u64, data: &[u8]) -> bool;
    fn load_texel(&mut self, slot: Slot, coord: [u32; 3], slice: u32, out: &mut [u8]) -> bool;
    fn store_texel(&mut self, slot: Slot, coord: [u32; 3], slice: u32, data: &[u8]) -> bool;
    fn sample(&mut self, sampler: u32, slot: Slot, coord: [f32; 3], slice: u32) -> Option<[f32; 4]>;
    fn dimensions(&self, slot: Slot) -> Option<ViewDimensions>;
}

/// Per-invocation view handed to a [`CpuKernel`].
///
/// Accesses outside a bound resource, or through an empty slot, read zeros and drop writes.
/// Writes only land through UAV slots.
pub struct KernelContext<'a> {
    pub(crate) global_id: [u32; 3],
    pub(crate) group_id: [u32; 3],
    pub(crate) local_id: [u32; 3],
    pub(crate) push: &'a [u8],
    pub(crate) memory: &'a mut dyn KernelMemory,
}

impl KernelContext<'_> {
    pub fn global_id(&self) -> [u32; 3] {
        self.global_id
    }

    pub fn group_id(&self) -> [u32; 3] {
        self.group_id
    }

    pub fn local_id(&self) -> [u32; 3] {
        self.local_id
    }

    pub fn push_constants(&self) -> &[u8] {
        self.push
    }

    /// Push-constant word `index`, or 0 past the end.
    pub fn push_u32(&self, index: usize) -> u32 {
        self.push
            .get(index * 4..index * 4 + 4)
            .map_or(0, bytemuck::pod_read_unaligned)
    }

    pub fn read(&mut self, slot: Slot, offset: u64, out: &mut [u8]) {
        if !self.memory.read(slot, offset, out) {
            out.fill(0);
        }
    }

    pub fn write(&mut self, slot: Slot, offset: u64, data: &[u8]) {
        if matches!(slot, Slot::Uav(_)) {
            self.memory.write(slot, offset, data);
        }
    }

    /// Reads `u32` element `index`.
    pub fn read_u32(&mut self, slot: Slot, index: u64) -> u32 {
        let mut word = [0u8; 4];
        self.read(slot, index * 4, &mut word);
        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, slot: Slot, index: u64, value: u32) {
        self.write(slot, index * 4, &value.to_le_bytes());
    }

    /// Reads `uint4` element `index`.
    pub fn read_u32x4(&mut self, slot: Slot, index: u64) -> [u32; 4] {
        let mut bytes = [0u8; 16];
        self.read(slot, index * 16, &mut bytes);
        bytemuck::cast(bytes)
    }

    pub fn write_u32x4(&mut self, slot: Slot, index: u64, value: [u32; 4]) {
        let bytes: [u8; 16] = bytemuck::cast(value);
        self.write(slot, index * 16, &bytes);
    }

    /// Raw texel bytes at `coord` in array slice `slice`.
    pub fn load_texel(&mut self, slot: Slot, coord: [u32; 3], slice: u32, out: &mut [u8]) {
        if !self.memory.load_texel(slot, coord, slice, out) {
            out.fill(0);
        }
    }

    pub fn store_texel(&mut self, slot: Slot, coord: [u32; 3], slice: u32, data: &[u8]) {
        if matches!(slot, Slot::Uav(_)) {
            self.memory.store_texel(slot, coord, slice, data);
        }
    }

    /// Filtered read through sampler `sampler` at normalized coordinates.
    pub fn sample(&mut self, sampler: u32, slot: Slot, coord: [f32; 3], slice: u32) -> [f32; 4] {
        self.memory
            .sample(sampler, slot, coord, slice)
            .unwrap_or([0.0; 4])
    }

    pub fn dimensions(&self, slot: Slot) -> Option<ViewDimensions> {
        self.memory.dimensions(slot)
    }
}

/// Resources and options a pipeline is created with.
///
/// With a non-zero `bindless_capacity`, the `cbv`/`srv`/`uav` lists pre-fill slots `0..n` of the
/// matching bindless tables and the rest of each table can be filled with `bind_*`.
#[derive(Default)]
pub struct ComputeDesc<'a> {
    pub cbv: Vec<&'a dyn Resource>,
    pub srv: Vec<&'a dyn Resource>,
    pub uav: Vec<&'a dyn Resource>,
    pub samplers: Vec<&'a Sampler>,
    pub push_size: u32,
    pub bindless_capacity: u32,
}

impl<'a> ComputeDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cbv(mut self, resources: &[&'a dyn Resource]) -> Self {
        self.cbv = resources.to_vec();
        self
    }

    pub fn with_srv(mut self, resources: &[&'a dyn Resource]) -> Self {
        self.srv = resources.to_vec();
        self
    }

    pub fn with_uav(mut self, resources: &[&'a dyn Resource]) -> Self {
        self.uav = resources.to_vec();
        self
    }

    pub fn with_samplers(mut self, samplers: &[&'a Sampler]) -> Self {
        self.samplers = samplers.to_vec();
        self
    }

    pub fn with_push_size(mut self, push_size: u32) -> Self {
        self.push_size = push_size;
        self
    }

    pub fn with_bindless(mut self, capacity: u32) -> Self {
        self.bindless_capacity = capacity;
        self
    }
}

#[derive(Default)]
struct BindingTable {
    cbv: Vec<Option<AnyResource>>,
    srv: Vec<Option<AnyResource>>,
    uav: Vec<Option<AnyResource>>,
    samplers: Vec<Sampler>,
}

impl BindingTable {
    fn slots(&self, kind: BindingKind) -> &[Option<AnyResource>] {
        match kind {
            BindingKind::Cbv => &self.cbv,
            BindingKind::Srv => &self.srv,
            BindingKind::Uav => &self.uav,
        }
    }

    fn slots_mut(&mut self, kind: BindingKind) -> &mut Vec<Option<AnyResource>> {
        match kind {
            BindingKind::Cbv => &mut self.cbv,
            BindingKind::Srv => &mut self.srv,
            BindingKind::Uav => &mut self.uav,
        }
    }
}

struct ComputeInner {
    device: Device,
    id: ComputeId,
    kernel: Kernel,
    push_size: u32,
    bindless_capacity: u32,
    bindings: Mutex<BindingTable>,
}

impl Drop for ComputeInner {
    fn drop(&mut self) {
        let id = self.id;
        self.device.release("compute", |backend| backend.destroy_compute(id));
    }
}

/// A kernel bound to its resources.
///
/// The pipeline holds a reference to every bound resource and sampler; dropping it releases
/// those references, not the resources.
#[derive(Clone)]
pub struct Compute {
    inner: Arc<ComputeInner>,
}

impl Compute {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn kernel(&self) -> &Kernel {
        &self.inner.kernel
    }

    pub fn push_size(&self) -> u32 {
        self.inner.push_size
    }

    pub fn bindless_capacity(&self) -> u32 {
        self.inner.bindless_capacity
    }

    /// Whether a resource currently occupies `slot`.
    pub fn is_bound(&self, slot: Slot) -> bool {
        let table = self.inner.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .slots(slot.kind())
            .get(slot.index() as usize)
            .is_some_and(Option::is_some)
    }

    pub fn samplers(&self) -> Vec<Sampler> {
        let table = self.inner.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        table.samplers.clone()
    }

    /// Dispatches `x * y * z` workgroups with zeroed push constants.
    pub fn dispatch(&self, x: u32, y: u32, z: u32) -> Result<()> {
        self.dispatch_with(x, y, z, &[])
    }

    /// Dispatches `x * y * z` workgroups. `push` must be exactly `push_size` bytes, or empty
    /// for zeroed push constants.
    pub fn dispatch_with(&self, x: u32, y: u32, z: u32, push: &[u8]) -> Result<()> {
        let device = self.device();
        let max = device.limits()?.max_dispatch_dimension;
        if [x, y, z].iter().any(|v| *v > max) {
            return Err(RhiError::Value(format!(
                "dispatch ({x}, {y}, {z}) exceeds the per-axis limit of {max}"
            )));
        }
        let push = self.push_payload(push)?;
        let id = self.inner.id;
        device.with_backend(|backend| backend.dispatch(id, [x, y, z], &push))?;
        device.stats_counters().inc_dispatches();
        tracing::trace!(device = %device.label(), ?id, groups = ?[x, y, z], "dispatch");
        Ok(())
    }

    /// Dispatches with group counts read from `args` at `offset` when the work executes.
    /// See [`DispatchIndirectArgs`] for the layout.
    pub fn dispatch_indirect(&self, args: &Buffer, offset: u64) -> Result<()> {
        self.dispatch_indirect_with(args, offset, &[])
    }

    pub fn dispatch_indirect_with(&self, args: &Buffer, offset: u64, push: &[u8]) -> Result<()> {
        let device = self.device();
        device.ensure_same("indirect argument buffer", args.device())?;
        device.require(BackendFeatures::INDIRECT_DISPATCH, "indirect dispatch")?;
        if offset % DispatchIndirectArgs::ALIGN_BYTES != 0 {
            return Err(RhiError::Value(format!(
                "indirect argument offset {offset} is not 4-byte aligned"
            )));
        }
        if offset
            .checked_add(DispatchIndirectArgs::SIZE_BYTES)
            .map_or(true, |end| end > args.size())
        {
            return Err(RhiError::Value(format!(
                "indirect arguments at offset {offset} exceed the buffer size {}",
                args.size()
            )));
        }
        let push = self.push_payload(push)?;
        let id = self.inner.id;
        let args_id = args.id();
        device.with_backend(|backend| backend.dispatch_indirect(id, args_id, offset, &push))?;
        device.stats_counters().inc_indirect_dispatches();
        tracing::trace!(device = %device.label(), ?id, offset, "dispatch_indirect");
        Ok(())
    }

    pub fn bind_cbv(&self, index: u32, resource: &dyn Resource) -> Result<()> {
        self.bind(BindingKind::Cbv, index, resource)
    }

    pub fn bind_srv(&self, index: u32, resource: &dyn Resource) -> Result<()> {
        self.bind(BindingKind::Srv, index, resource)
    }

    pub fn bind_uav(&self, index: u32, resource: &dyn Resource) -> Result<()> {
        self.bind(BindingKind::Uav, index, resource)
    }

    /// Replaces bindless slot `index` of table `kind`. Affects dispatches issued afterwards.
    fn bind(&self, kind: BindingKind, index: u32, resource: &dyn Resource) -> Result<()> {
        let capacity = self.inner.bindless_capacity;
        if capacity == 0 {
            return Err(RhiError::Value(format!(
                "bind_{} requires a pipeline created with a bindless capacity",
                kind.as_str()
            )));
        }
        if index >= capacity {
            return Err(RhiError::Value(format!(
                "{} index {index} is out of bounds (bindless capacity {capacity})",
                kind.as_str()
            )));
        }
        let device = self.device();
        let resource = resource.as_resource();
        device.ensure_same("bound resource", resource.device())?;

        let mut table = self.inner.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.inner.id;
        let resource_id = resource.id();
        device.with_backend(|backend| backend.bind(id, kind, index, resource_id))?;
        let previous = table.slots_mut(kind)[index as usize].replace(resource.to_any());
        drop(table);
        drop(previous);
        tracing::debug!(device = %device.label(), ?id, kind = kind.as_str(), index, ?resource_id, "bound resource");
        Ok(())
    }

    fn push_payload(&self, push: &[u8]) -> Result<Vec<u8>> {
        let push_size = self.inner.push_size as usize;
        match (push_size, push.len()) {
            (0, 0) => Ok(Vec::new()),
            (0, len) => Err(RhiError::Value(format!(
                "pipeline has no push constants but {len} bytes were supplied"
            ))),
            (size, 0) => Ok(vec![0; size]),
            (size, len) if size == len => Ok(push.to_vec()),
            (size, len) => Err(RhiError::Value(format!(
                "push constants must be exactly {size} bytes, got {len}"
            ))),
        }
    }
}

impl fmt::Debug for Compute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compute")
            .field("kernel", &self.inner.kernel.describe())
            .field("push_size", &self.inner.push_size)
            .field("bindless_capacity", &self.inner.bindless_capacity)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Device {
    pub fn create_compute(&self, kernel: &Kernel, desc: &ComputeDesc<'_>) -> Result<Compute> {
        let limits = self.limits()?;

        if desc.push_size > 0 {
            self.require(BackendFeatures::PUSH_CONSTANTS, "push constants")?;
            if desc.push_size % 4 != 0 || desc.push_size > limits.max_push_constant_size {
                return Err(RhiError::Value(format!(
                    "push_size must be a multiple of 4 no larger than {} (got {})",
                    limits.max_push_constant_size, desc.push_size
                )));
            }
        }

        let capacity = desc.bindless_capacity;
        if capacity > 0 {
            self.require(BackendFeatures::BINDLESS, "bindless tables")?;
            if capacity > limits.max_bindless_capacity {
                return Err(RhiError::Value(format!(
                    "bindless capacity {capacity} exceeds the backend limit of {}",
                    limits.max_bindless_capacity
                )));
            }
            for (kind, list) in [("cbv", &desc.cbv), ("srv", &desc.srv), ("uav", &desc.uav)] {
                if list.len() > capacity as usize {
                    return Err(RhiError::Value(format!(
                        "{} {kind} resources do not fit a bindless capacity of {capacity}",
                        list.len()
                    )));
                }
            }
        }

        for resource in desc.cbv.iter().chain(&desc.srv).chain(&desc.uav) {
            self.ensure_same("bound resource", resource.device())?;
        }
        for sampler in &desc.samplers {
            self.ensure_same("sampler", sampler.device())?;
        }

        let ids = |list: &[&dyn Resource]| -> Vec<ResourceId> {
            list.iter().map(|r| r.as_resource().id()).collect()
        };
        let info = ComputeCreateInfo {
            kernel,
            cbv: ids(&desc.cbv),
            srv: ids(&desc.srv),
            uav: ids(&desc.uav),
            samplers: desc.samplers.iter().map(|s| s.id()).collect(),
            push_size: desc.push_size,
            bindless_capacity: capacity,
        };
        let id = self.with_backend(|backend| backend.create_compute(&info))?;

        let table_len = |list: &[&dyn Resource]| (capacity as usize).max(list.len());
        let owned = |list: &[&dyn Resource]| {
            let mut slots: Vec<Option<AnyResource>> =
                list.iter().map(|r| Some(r.as_resource().to_any())).collect();
            slots.resize(table_len(list), None);
            slots
        };
        let bindings = BindingTable {
            cbv: owned(&desc.cbv),
            srv: owned(&desc.srv),
            uav: owned(&desc.uav),
            samplers: desc.samplers.iter().map(|s| (*s).clone()).collect(),
        };

        tracing::debug!(
            device = %self.label(),
            kernel = %kernel.describe(),
            cbv = desc.cbv.len(),
            srv = desc.srv.len(),
            uav = desc.uav.len(),
            samplers = desc.samplers.len(),
            push_size = desc.push_size,
            bindless_capacity = capacity,
            ?id,
            "created compute pipeline"
        );
        Ok(Compute {
            inner: Arc::new(ComputeInner {
                device: self.clone(),
                id,
                kernel: kernel.clone(),
                push_size: desc.push_size,
                bindless_capacity: capacity,
                bindings: Mutex::new(bindings),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_args_layout() {
        assert_eq!(DispatchIndirectArgs::SIZE_BYTES, 12);
        assert_eq!(DispatchIndirectArgs::ALIGN_BYTES, 4);
        let args = DispatchIndirectArgs { x: 2, y: 3, z: 4 };
        assert_eq!(
            args.as_bytes(),
            &[2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0][..]
        );
    }

    #[test]
    fn indirect_args_read_from_unaligned_bytes() {
        let words: [u32; 4] = [1, 2, 3, 4];
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        assert_eq!(
            DispatchIndirectArgs::from_bytes(&bytes[4..]),
            Some(DispatchIndirectArgs { x: 2, y: 3, z: 4 })
        );
        assert_eq!(DispatchIndirectArgs::from_bytes(&bytes[8..]), None);
    }

    #[test]
    fn slots_report_kind_and_index() {
        assert_eq!(Slot::Uav(3).kind(), BindingKind::Uav);
        assert_eq!(Slot::Srv(7).index(), 7);
    }
}
