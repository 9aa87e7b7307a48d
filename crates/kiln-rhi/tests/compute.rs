mod common;

use kiln_rhi::{
    AddressMode, Buffer, BufferDesc, ComputeDesc, CopyDesc, Device, DispatchIndirectArgs,
    FilterMode, HeapKind, Kernel, PixelFormat, Resource, RhiError, SamplerDesc, Slot,
    ViewDimensions,
};
use pretty_assertions::assert_eq;

/// DEFAULT buffer holding `words`.
fn gpu_words(device: &Device, words: &[u32]) -> Buffer {
    let bytes = common::words(words);
    let buffer = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, bytes.len() as u64))
        .unwrap();
    common::upload_buffer(device, &bytes)
        .copy_to(&buffer, &CopyDesc::new())
        .unwrap();
    buffer
}

fn gpu_zeroed(device: &Device, words: usize) -> Buffer {
    gpu_words(device, &vec![0; words])
}

fn read_words(buffer: &Buffer) -> Vec<u32> {
    common::to_words(&common::read_back(buffer))
}

#[test]
fn cpu_kernel_adds_two_buffers() {
    let device = common::software_device();
    let a = gpu_words(&device, &(0..64u32).collect::<Vec<_>>());
    let b = gpu_words(&device, &(0..64u32).map(|i| i * 100).collect::<Vec<_>>());
    let out = gpu_zeroed(&device, 64);

    let kernel = Kernel::cpu([16, 1, 1], |ctx| {
        let i = u64::from(ctx.global_id()[0]);
        let sum = ctx.read_u32(Slot::Srv(0), i) + ctx.read_u32(Slot::Srv(1), i);
        ctx.write_u32(Slot::Uav(0), i, sum);
    });
    let compute = device
        .create_compute(
            &kernel,
            &ComputeDesc::new().with_srv(&[&a, &b]).with_uav(&[&out]),
        )
        .unwrap();
    compute.dispatch(4, 1, 1).unwrap();

    let expected: Vec<u32> = (0..64).map(|i| i * 101).collect();
    assert_eq!(read_words(&out), expected);
    assert_eq!(device.stats().dispatches, 1);
}

#[test]
fn writes_through_read_only_slots_are_dropped() {
    let device = common::software_device();
    let input = gpu_words(&device, &[7; 4]);
    let kernel = Kernel::cpu([4, 1, 1], |ctx| {
        let i = u64::from(ctx.global_id()[0]);
        ctx.write_u32(Slot::Srv(0), i, 0);
        ctx.write_u32(Slot::Cbv(0), i, 0);
    });
    let compute = device
        .create_compute(&kernel, &ComputeDesc::new().with_srv(&[&input]).with_cbv(&[&input]))
        .unwrap();
    compute.dispatch(1, 1, 1).unwrap();
    assert_eq!(read_words(&input), vec![7; 4]);
}

#[test]
fn push_constants_reach_the_kernel() {
    let device = common::software_device();
    let out = gpu_zeroed(&device, 8);
    let kernel = Kernel::cpu([8, 1, 1], |ctx| {
        let i = ctx.global_id()[0];
        let value = ctx.push_u32(0) * i + ctx.push_u32(1);
        ctx.write_u32(Slot::Uav(0), u64::from(i), value);
    });
    let compute = device
        .create_compute(&kernel, &ComputeDesc::new().with_uav(&[&out]).with_push_size(8))
        .unwrap();
    assert_eq!(compute.push_size(), 8);

    compute.dispatch_with(1, 1, 1, &common::words(&[3, 7])).unwrap();
    assert_eq!(read_words(&out), vec![7, 10, 13, 16, 19, 22, 25, 28]);

    // Empty push data means zeroed constants.
    compute.dispatch(1, 1, 1).unwrap();
    assert_eq!(read_words(&out), vec![0; 8]);

    let err = compute.dispatch_with(1, 1, 1, &[0; 4]).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
}

#[test]
fn push_data_without_push_constants_is_rejected() {
    let device = common::software_device();
    let compute = device
        .create_compute(&Kernel::cpu([1, 1, 1], |_| {}), &ComputeDesc::new())
        .unwrap();
    let err = compute.dispatch_with(1, 1, 1, &[0; 4]).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
}

#[test]
fn indirect_dispatch_reads_group_counts_from_a_buffer() {
    let device = common::software_device();
    let args = gpu_words(&device, &[99, 3, 2, 1]);
    let out = gpu_zeroed(&device, 32);
    let kernel = Kernel::cpu([4, 1, 1], |ctx| {
        let [x, y, _] = ctx.global_id();
        ctx.write_u32(Slot::Uav(0), u64::from(y * 12 + x), 1);
    });
    let compute = device
        .create_compute(&kernel, &ComputeDesc::new().with_uav(&[&out]))
        .unwrap();

    compute.dispatch_indirect(&args, 4).unwrap();

    let written = read_words(&out);
    assert_eq!(written.iter().filter(|w| **w == 1).count(), 24);
    assert_eq!(&written[24..], &[0; 8]);
    assert_eq!(device.stats().indirect_dispatches, 1);
}

#[test]
fn indirect_arguments_are_validated() {
    let device = common::software_device();
    let args = gpu_words(&device, &[1, 1, 1, 1]);
    let compute = device
        .create_compute(&Kernel::cpu([1, 1, 1], |_| {}), &ComputeDesc::new())
        .unwrap();

    let err = compute.dispatch_indirect(&args, 2).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = compute.dispatch_indirect(&args, 8).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");

    let huge = gpu_words(&device, &[70_000, 1, 1]);
    let err = compute.dispatch_indirect(&huge, 0).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");

    let foreign = common::software_instance().device(1).unwrap();
    let foreign_args = gpu_words(&foreign, &[1, 1, 1]);
    let err = compute.dispatch_indirect(&foreign_args, 0).unwrap_err();
    assert!(err.is_device_mismatch(), "{err}");
}

#[test]
fn indirect_args_match_the_documented_layout() {
    let device = common::software_device();
    let args = DispatchIndirectArgs { x: 2, y: 1, z: 1 };
    let buffer = common::upload_buffer(&device, args.as_bytes());
    let out = gpu_zeroed(&device, 2);
    let compute = device
        .create_compute(
            &Kernel::cpu([1, 1, 1], |ctx| {
                let x = ctx.global_id()[0];
                ctx.write_u32(Slot::Uav(0), u64::from(x), x + 1);
            }),
            &ComputeDesc::new().with_uav(&[&out]),
        )
        .unwrap();
    compute.dispatch_indirect(&buffer, 0).unwrap();
    assert_eq!(read_words(&out), vec![1, 2]);
}

#[test]
fn bindless_slots_are_filled_after_creation() {
    let device = common::software_device();
    let out = gpu_zeroed(&device, 4);
    let first = gpu_words(&device, &[1, 2, 3, 4]);
    let second = gpu_words(&device, &[10, 20, 30, 40]);

    let kernel = Kernel::cpu([4, 1, 1], |ctx| {
        let i = u64::from(ctx.global_id()[0]);
        let table = ctx.push_u32(0);
        let value = ctx.read_u32(Slot::Srv(table), i);
        ctx.write_u32(Slot::Uav(0), i, value);
    });
    let compute = device
        .create_compute(
            &kernel,
            &ComputeDesc::new()
                .with_uav(&[&out])
                .with_push_size(4)
                .with_bindless(8),
        )
        .unwrap();
    assert_eq!(compute.bindless_capacity(), 8);
    assert!(compute.is_bound(Slot::Uav(0)));
    assert!(!compute.is_bound(Slot::Srv(5)));

    // An empty slot reads as zero.
    compute.dispatch_with(1, 1, 1, &common::words(&[5])).unwrap();
    assert_eq!(read_words(&out), vec![0; 4]);

    compute.bind_srv(5, &first).unwrap();
    compute.bind_srv(7, &second).unwrap();
    assert!(compute.is_bound(Slot::Srv(5)));

    compute.dispatch_with(1, 1, 1, &common::words(&[5])).unwrap();
    assert_eq!(read_words(&out), vec![1, 2, 3, 4]);
    compute.dispatch_with(1, 1, 1, &common::words(&[7])).unwrap();
    assert_eq!(read_words(&out), vec![10, 20, 30, 40]);

    // Rebinding only affects later dispatches.
    compute.bind_srv(5, &second).unwrap();
    compute.dispatch_with(1, 1, 1, &common::words(&[5])).unwrap();
    assert_eq!(read_words(&out), vec![10, 20, 30, 40]);
}

#[test]
fn construction_bindings_and_bindless_slots_mix() {
    let device = common::software_device();
    let a = gpu_words(&device, &[1, 1]);
    let b = gpu_words(&device, &[2, 2]);
    let out = gpu_zeroed(&device, 2);
    let kernel = Kernel::cpu([2, 1, 1], |ctx| {
        let i = u64::from(ctx.global_id()[0]);
        let sum = ctx.read_u32(Slot::Srv(0), i) + ctx.read_u32(Slot::Srv(1), i);
        ctx.write_u32(Slot::Uav(0), i, sum);
    });
    let compute = device
        .create_compute(
            &kernel,
            &ComputeDesc::new()
                .with_srv(&[&a])
                .with_uav(&[&out])
                .with_bindless(2),
        )
        .unwrap();
    compute.bind_srv(1, &b).unwrap();
    compute.dispatch(1, 1, 1).unwrap();
    assert_eq!(read_words(&out), vec![3, 3]);

    // Construction-time slots are rebindable too.
    compute.bind_uav(0, &a).unwrap();
    compute.dispatch(1, 1, 1).unwrap();
    assert_eq!(read_words(&a), vec![3, 3]);
}

#[test]
fn bind_requires_a_bindless_pipeline_and_a_valid_slot() {
    let device = common::software_device();
    let buffer = gpu_zeroed(&device, 4);
    let fixed = device
        .create_compute(&Kernel::cpu([1, 1, 1], |_| {}), &ComputeDesc::new().with_uav(&[&buffer]))
        .unwrap();
    let err = fixed.bind_uav(0, &buffer).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");

    let bindless = device
        .create_compute(&Kernel::cpu([1, 1, 1], |_| {}), &ComputeDesc::new().with_bindless(4))
        .unwrap();
    let err = bindless.bind_cbv(4, &buffer).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");

    let foreign = common::software_instance().device(1).unwrap();
    let other = gpu_zeroed(&foreign, 4);
    let err = bindless.bind_srv(0, &other).unwrap_err();
    assert!(err.is_device_mismatch(), "{err}");
}

#[test]
fn creation_limits_are_enforced() {
    let device = common::software_device();
    let limits = device.limits().unwrap();
    let noop = Kernel::cpu([1, 1, 1], |_| {});
    let buffer = gpu_zeroed(&device, 4);

    let err = device
        .create_compute(&noop, &ComputeDesc::new().with_push_size(6))
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = device
        .create_compute(
            &noop,
            &ComputeDesc::new().with_push_size(limits.max_push_constant_size + 4),
        )
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = device
        .create_compute(
            &noop,
            &ComputeDesc::new().with_bindless(limits.max_bindless_capacity + 1),
        )
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = device
        .create_compute(
            &noop,
            &ComputeDesc::new().with_srv(&[&buffer, &buffer]).with_bindless(1),
        )
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");

    let compute = device.create_compute(&noop, &ComputeDesc::new()).unwrap();
    let err = compute
        .dispatch(limits.max_dispatch_dimension + 1, 1, 1)
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
}

#[test]
fn resources_from_another_device_cannot_be_bound() {
    let instance = common::software_instance();
    let first = instance.device(0).unwrap();
    let second = instance.device(1).unwrap();
    let foreign = gpu_zeroed(&second, 4);
    let err = first
        .create_compute(
            &Kernel::cpu([1, 1, 1], |_| {}),
            &ComputeDesc::new().with_uav(&[&foreign]),
        )
        .unwrap_err();
    assert!(err.is_device_mismatch(), "{err}");
}

#[test]
fn software_backend_rejects_shader_binaries_and_empty_workgroups() {
    let device = common::software_device();
    let err = device
        .create_compute(
            &Kernel::wgsl("@compute @workgroup_size(1) fn main() {}", "main"),
            &ComputeDesc::new(),
        )
        .unwrap_err();
    assert!(err.is_unsupported(), "{err}");

    let err = device
        .create_compute(&Kernel::cpu([0, 1, 1], |_| {}), &ComputeDesc::new())
        .unwrap_err();
    assert!(matches!(err, RhiError::Shader(_)), "{err}");
}

#[test]
fn dispatches_must_fit_the_global_id_range() {
    let device = common::software_device();
    let compute = device
        .create_compute(&Kernel::cpu([1 << 17, 1, 1], |_| {}), &ComputeDesc::new())
        .unwrap();
    let err = compute.dispatch(65535, 1, 1).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    assert_eq!(device.stats().dispatches, 0);
}

#[test]
fn kernels_sample_textures() {
    let device = common::software_device();
    let texture = device.create_texture2d(2, 1, PixelFormat::R32Float).unwrap();
    let mut texels: Vec<u8> = [0.0f32, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    texels.resize(texture.size() as usize, 0);
    common::upload_buffer(&device, &texels)
        .copy_to(&texture, &CopyDesc::new())
        .unwrap();

    let point = device
        .create_sampler(&SamplerDesc::new(AddressMode::Wrap, FilterMode::Point))
        .unwrap();
    let linear = device
        .create_sampler(&SamplerDesc::new(AddressMode::Clamp, FilterMode::Linear))
        .unwrap();
    let out = gpu_zeroed(&device, 5);

    let kernel = Kernel::cpu([1, 1, 1], |ctx| {
        let samples = [
            ctx.sample(0, Slot::Srv(0), [0.25, 0.5, 0.0], 0),
            ctx.sample(0, Slot::Srv(0), [0.75, 0.5, 0.0], 0),
            ctx.sample(0, Slot::Srv(0), [1.25, 0.5, 0.0], 0),
            ctx.sample(1, Slot::Srv(0), [0.5, 0.5, 0.0], 0),
            ctx.sample(1, Slot::Srv(0), [1.5, 0.5, 0.0], 0),
        ];
        for (i, rgba) in samples.iter().enumerate() {
            ctx.write_u32(Slot::Uav(0), i as u64, rgba[0].to_bits());
        }
    });
    let compute = device
        .create_compute(
            &kernel,
            &ComputeDesc::new()
                .with_srv(&[&texture])
                .with_uav(&[&out])
                .with_samplers(&[&point, &linear]),
        )
        .unwrap();
    assert_eq!(compute.samplers().len(), 2);
    compute.dispatch(1, 1, 1).unwrap();

    let values: Vec<f32> = read_words(&out).into_iter().map(f32::from_bits).collect();
    assert_eq!(values, vec![0.0, 4.0, 0.0, 2.0, 4.0]);
}

#[test]
fn kernels_load_and_store_texels() {
    let device = common::software_device();
    let texture = device.create_texture2d(4, 4, PixelFormat::R32Uint).unwrap();
    let typed = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, 16).with_format(PixelFormat::R32Uint))
        .unwrap();
    common::upload_buffer(&device, &common::words(&[100, 200, 300, 400]))
        .copy_to(&typed, &CopyDesc::new())
        .unwrap();

    let kernel = Kernel::cpu([4, 4, 1], |ctx| {
        let [x, y, _] = ctx.global_id();
        let mut base = [0u8; 4];
        ctx.load_texel(Slot::Srv(0), [y, 0, 0], 0, &mut base);
        let value = u32::from_le_bytes(base) + x;
        ctx.store_texel(Slot::Uav(0), [x, y, 0], 0, &value.to_le_bytes());
        // Outside the texture: dropped.
        ctx.store_texel(Slot::Uav(0), [x + 4, y, 0], 0, &value.to_le_bytes());
        if let Some(ViewDimensions::Texture { width, height, .. }) = ctx.dimensions(Slot::Uav(0)) {
            assert_eq!((width, height), (4, 4));
        }
    });
    let compute = device
        .create_compute(
            &kernel,
            &ComputeDesc::new().with_srv(&[&typed]).with_uav(&[&texture]),
        )
        .unwrap();
    compute.dispatch(1, 1, 1).unwrap();

    let words = common::to_words(&common::read_back(&texture));
    let pitch_words = texture.row_pitch() as usize / 4;
    for y in 0..4 {
        let row = &words[y * pitch_words..y * pitch_words + 4];
        let base = 100 * (y as u32 + 1);
        assert_eq!(row, &[base, base + 1, base + 2, base + 3], "row {y}");
    }
}
