#![cfg(feature = "wgpu")]

mod common;

use kiln_rhi::hal::{BackendFeatures, NativeDevice, NativeTexture};
use kiln_rhi::{
    BufferDesc, ComputeDesc, CopyDesc, Device, DispatchIndirectArgs, HeapKind, Kernel,
    PixelFormat, Resource, RhiError, TextureDesc, TextureDimension,
};
use pretty_assertions::assert_eq;

const DOUBLE_WGSL: &str = r#"
struct Push {
    bias: u32,
}

@group(1) @binding(0) var<storage, read> src: array<u32>;
@group(2) @binding(0) var<storage, read_write> dst: array<u32>;
var<push_constant> push: Push;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&src) {
        dst[id.x] = src[id.x] * 2u + push.bias;
    }
}
"#;

const COPY_WGSL: &str = r#"
@group(1) @binding(0) var<storage, read> src: array<u32>;
@group(2) @binding(0) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&src) {
        dst[id.x] = src[id.x];
    }
}
"#;

#[test]
fn native_buffer_round_trip() {
    common::init_tracing();
    let Some(device) = common::native_device("native_buffer_round_trip") else {
        return;
    };
    let data: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
    let upload = common::upload_buffer(&device, &data);
    let gpu = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, data.len() as u64))
        .unwrap();
    upload.copy_to(&gpu, &CopyDesc::new()).unwrap();
    assert_eq!(common::read_back(&gpu), data);
}

#[test]
fn native_texture_round_trip() {
    let Some(device) = common::native_device("native_texture_round_trip") else {
        return;
    };
    let texture = device
        .create_texture2d(16, 4, PixelFormat::R8G8B8A8Unorm)
        .unwrap();
    let pitch = texture.row_pitch() as usize;
    let mut data = vec![0u8; texture.size() as usize];
    for y in 0..4 {
        for x in 0..64 {
            data[y * pitch + x] = (y * 64 + x) as u8;
        }
    }
    common::upload_buffer(&device, &data)
        .copy_to(&texture, &CopyDesc::new())
        .unwrap();
    assert_eq!(common::read_back(&texture), data);
}

#[test]
fn native_compute_with_push_constants() {
    let Some(device) = common::native_device("native_compute_with_push_constants") else {
        return;
    };
    if !device.features().unwrap().contains(BackendFeatures::PUSH_CONSTANTS) {
        common::skip_or_panic("native_compute_with_push_constants", "no push constants");
        return;
    }
    let input: Vec<u32> = (0..256).collect();
    let src = common::upload_buffer(&device, &common::words(&input));
    let dst = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, src.size()))
        .unwrap();

    let compute = device
        .create_compute(
            &Kernel::wgsl(DOUBLE_WGSL, "main"),
            &ComputeDesc::new()
                .with_srv(&[&src])
                .with_uav(&[&dst])
                .with_push_size(4),
        )
        .unwrap();
    compute.dispatch_with(4, 1, 1, &common::words(&[5])).unwrap();

    let expected: Vec<u32> = input.iter().map(|v| v * 2 + 5).collect();
    assert_eq!(common::to_words(&common::read_back(&dst)), expected);
}

#[test]
fn native_indirect_dispatch() {
    let Some(device) = common::native_device("native_indirect_dispatch") else {
        return;
    };
    if !device.features().unwrap().contains(BackendFeatures::INDIRECT_DISPATCH) {
        common::skip_or_panic("native_indirect_dispatch", "no indirect execution");
        return;
    }
    let input: Vec<u32> = (1..=128).collect();
    let src = common::upload_buffer(&device, &common::words(&input));
    let dst = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, src.size()))
        .unwrap();
    let compute = device
        .create_compute(
            &Kernel::wgsl(COPY_WGSL, "main"),
            &ComputeDesc::new().with_srv(&[&src]).with_uav(&[&dst]),
        )
        .unwrap();

    // Only the first workgroup runs.
    let args = DispatchIndirectArgs { x: 1, y: 1, z: 1 };
    let args_buffer = common::upload_buffer(&device, args.as_bytes());
    compute.dispatch_indirect(&args_buffer, 0).unwrap();

    let out = common::to_words(&common::read_back(&dst));
    assert_eq!(&out[..64], &input[..64]);
    assert!(out[64..].iter().all(|v| *v == 0));
}

#[test]
fn native_backends_do_not_run_cpu_kernels() {
    let Some(device) = common::native_device("native_backends_do_not_run_cpu_kernels") else {
        return;
    };
    let err = device
        .create_compute(&Kernel::cpu([1, 1, 1], |_| {}), &ComputeDesc::new())
        .unwrap_err();
    assert!(err.is_unsupported(), "{err}");
}

fn native_rgba8(device: &Device, width: u32, height: u32) -> wgpu::Texture {
    let Some(NativeDevice::Wgpu { device, .. }) = device.native_device().unwrap() else {
        panic!("wgpu devices expose their native device");
    };
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("imported"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

#[test]
fn native_textures_can_be_wrapped() {
    let Some(device) = common::native_device("native_textures_can_be_wrapped") else {
        return;
    };
    let desc = TextureDesc::d2(8, 2, PixelFormat::R8G8B8A8Unorm);
    let texture = device
        .texture_from_native(&desc, NativeTexture::Wgpu(native_rgba8(&device, 8, 2)))
        .unwrap();
    assert_eq!(texture.row_pitch(), 256);

    let mut data = vec![0u8; texture.size() as usize];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    common::upload_buffer(&device, &data)
        .copy_to(&texture, &CopyDesc::new())
        .unwrap();
    let back = common::read_back(&texture);
    for row in 0..2 {
        let range = row * 256..row * 256 + 32;
        assert_eq!(back[range.clone()], data[range]);
    }
}

#[test]
fn wrapped_textures_must_match_their_description() {
    let Some(device) = common::native_device("wrapped_textures_must_match_their_description")
    else {
        return;
    };
    let native = NativeTexture::Wgpu(native_rgba8(&device, 8, 2));
    let err = device
        .texture_from_native(&TextureDesc::d2(4, 2, PixelFormat::R8G8B8A8Unorm), native)
        .unwrap_err();
    assert!(
        matches!(err, RhiError::Texture { dimension: TextureDimension::D2, .. }),
        "{err}"
    );

    let native = NativeTexture::Wgpu(native_rgba8(&device, 8, 2));
    let err = device
        .texture_from_native(&TextureDesc::d2(8, 2, PixelFormat::R32Float), native)
        .unwrap_err();
    assert!(matches!(err, RhiError::Texture { .. }), "{err}");
}

#[test]
fn the_software_backend_cannot_wrap_native_textures() {
    let Some(native) = common::native_device("the_software_backend_cannot_wrap_native_textures")
    else {
        return;
    };
    let software = common::software_device();
    assert!(software.native_device().unwrap().is_none());
    let err = software
        .texture_from_native(
            &TextureDesc::d2(8, 2, PixelFormat::R8G8B8A8Unorm),
            NativeTexture::Wgpu(native_rgba8(&native, 8, 2)),
        )
        .unwrap_err();
    assert!(err.is_unsupported(), "{err}");
}
