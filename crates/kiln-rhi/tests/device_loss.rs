mod common;

use kiln_rhi::backend::software::SoftwareLoader;
use kiln_rhi::{BufferDesc, ComputeDesc, HeapKind, Instance, InstanceConfig, Kernel, RhiError};

#[test]
fn device_loss_is_sticky() {
    common::init_tracing();
    let loader = SoftwareLoader::default();
    let loss = loader.loss_switch();
    let instance = Instance::with_loader(InstanceConfig::default(), Box::new(loader));
    let device = instance.device(0).unwrap();

    let buffer = common::upload_buffer(&device, &[0; 64]);
    let compute = device
        .create_compute(&Kernel::cpu([1, 1, 1], |_| {}), &ComputeDesc::new())
        .unwrap();
    assert!(!device.is_lost());

    loss.trigger();
    assert!(matches!(buffer.upload(&[1; 4], 0), Err(RhiError::DeviceLost)));
    assert!(device.is_lost());

    assert!(matches!(compute.dispatch(1, 1, 1), Err(RhiError::DeviceLost)));
    assert!(matches!(
        device.create_heap(HeapKind::Default, 1024),
        Err(RhiError::DeviceLost)
    ));
    assert!(matches!(
        device.create_buffer(&BufferDesc::new(HeapKind::Upload, 16)),
        Err(RhiError::DeviceLost)
    ));

    // Releasing objects of a lost device is silent.
    drop(compute);
    drop(buffer);
}

#[test]
fn loss_on_one_loader_leaves_other_instances_alone() {
    let lost = SoftwareLoader::default();
    lost.loss_switch().trigger();
    let lost = Instance::with_loader(InstanceConfig::default(), Box::new(lost));
    let healthy = common::software_instance();

    let err = lost
        .device(0)
        .unwrap()
        .create_heap(HeapKind::Default, 64)
        .unwrap_err();
    assert!(matches!(err, RhiError::DeviceLost), "{err}");

    let device = healthy.device(0).unwrap();
    assert!(device.create_heap(HeapKind::Default, 64).is_ok());
    assert!(!device.is_lost());
}
