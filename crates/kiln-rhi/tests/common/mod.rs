//! Shared helpers for `kiln-rhi` integration tests.
//!
//! Most tests run on the software backend so they exercise the full front-end on any machine.
//! Tests that need a native adapter go through [`native_device`], which skips unless
//! `KILN_REQUIRE_GPU` is set.

#![allow(dead_code)]

use kiln_rhi::config::is_truthy;
use kiln_rhi::{BackendKind, Buffer, BufferDesc, CopyDesc, Device, HeapKind, Instance, InstanceConfig, Resource};

pub const REQUIRE_GPU_ENV: &str = "KILN_REQUIRE_GPU";

pub fn require_gpu() -> bool {
    std::env::var(REQUIRE_GPU_ENV).is_ok_and(|raw| is_truthy(&raw))
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_gpu() {
        panic!("{REQUIRE_GPU_ENV} is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Routes `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn software_instance() -> Instance {
    Instance::new(InstanceConfig::default().with_backend(BackendKind::Software))
}

pub fn debug_instance() -> Instance {
    Instance::new(
        InstanceConfig::default()
            .with_backend(BackendKind::Software)
            .with_debug(true),
    )
}

/// First software device. Devices stay usable after their instance is dropped.
pub fn software_device() -> Device {
    software_instance().device(0).unwrap()
}

/// Best adapter of the platform's native backend, or `None` (after [`skip_or_panic`]).
pub fn native_device(test_name: &str) -> Option<Device> {
    let backend = BackendKind::platform_default();
    if backend == BackendKind::Software {
        skip_or_panic(test_name, "built without a native backend");
        return None;
    }
    let instance = Instance::new(InstanceConfig::default().with_backend(backend));
    match instance.best_device().and_then(|device| device.features().map(|_| device)) {
        Ok(device) => Some(device),
        Err(err) => {
            skip_or_panic(test_name, &format!("no usable {backend} adapter: {err}"));
            None
        }
    }
}

pub fn upload_buffer(device: &Device, data: &[u8]) -> Buffer {
    let buffer = device
        .create_buffer(&BufferDesc::new(HeapKind::Upload, data.len() as u64))
        .unwrap();
    buffer.upload(data, 0).unwrap();
    buffer
}

/// Copies `resource` (a buffer, or slice 0 mip 0 of a texture) into a fresh READBACK buffer.
pub fn read_back(resource: &dyn Resource) -> Vec<u8> {
    let readback = resource
        .device()
        .create_buffer(&BufferDesc::new(HeapKind::Readback, resource.size()))
        .unwrap();
    resource.copy_to(&readback, &CopyDesc::new()).unwrap();
    readback.readback(0, 0).unwrap()
}

pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}
