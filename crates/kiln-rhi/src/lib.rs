//! `kiln-rhi` is a small compute-first hardware interface over several native GPU APIs.
//!
//! It provides:
//! - Device discovery and ranking through an explicit [`Instance`].
//! - Heaps, buffers and textures, including explicit heap aliasing and sparse tiles.
//! - A validated copy engine between buffers and textures (see [`CopyDesc`]).
//! - Compute pipelines with push constants, bindless tables and indirect dispatch.
//! - Swapchains for window-system and headless surfaces.
//!
//! Native APIs sit behind the [`hal::GpuBackend`] trait. The software backend is always built and
//! runs [`Kernel::Cpu`] kernels; the `wgpu` feature adds Vulkan, D3D12, Metal and GL.

mod error;
mod instance;
mod device;
mod registry;

pub mod backend;
pub mod compute;
pub mod config;
pub mod format;
pub mod hal;
pub mod heap;
pub mod resource;
pub mod sampler;
pub mod stats;
pub mod swapchain;

pub use backend::BackendKind;
pub use compute::{
    Compute, ComputeDesc, CpuKernel, DispatchIndirectArgs, Kernel, KernelContext, ShaderBinary,
    ShaderKind, Slot, ViewDimensions,
};
pub use config::InstanceConfig;
pub use device::Device;
pub use error::{Result, RhiError};
pub use format::PixelFormat;
pub use heap::{Heap, HeapKind};
pub use instance::Instance;
pub use registry::{Id, ResourceRegistry};
pub use resource::{
    Backing, Buffer, BufferDesc, CopyDesc, Resource, ResourceRef, Texture, TextureDesc,
    TextureDimension, TileGeometry,
};
pub use sampler::{AddressMode, FilterMode, Sampler, SamplerDesc};
pub use stats::DeviceStatsSnapshot;
pub use swapchain::{HeadlessSurface, SurfaceHandle, Swapchain};
