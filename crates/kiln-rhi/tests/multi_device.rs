mod common;

use kiln_rhi::backend::software::SoftwareLoader;
use kiln_rhi::hal::AdapterInfo;
use kiln_rhi::{
    BackendKind, BufferDesc, CopyDesc, HeapKind, Instance, InstanceConfig, Resource, RhiError,
};
use pretty_assertions::assert_eq;

fn adapter(name: &str, is_hardware: bool, is_discrete: bool, vram: u64) -> AdapterInfo {
    AdapterInfo {
        name: name.to_owned(),
        vendor_id: 0x10de,
        device_id: 0,
        is_hardware,
        is_discrete,
        dedicated_video_memory: vram,
        dedicated_system_memory: 0,
        shared_system_memory: 0,
    }
}

fn ranked_instance(config: InstanceConfig) -> Instance {
    let loader = SoftwareLoader::with_adapters(vec![
        adapter("integrated", true, false, 512 << 20),
        adapter("small discrete", true, true, 2 << 30),
        adapter("big discrete", true, true, 8 << 30),
        adapter("reference", false, false, 0),
    ]);
    Instance::with_loader(config, Box::new(loader))
}

#[test]
fn discovery_lists_every_adapter_in_order() {
    let instance = common::software_instance();
    let devices = instance.discover_devices().unwrap();
    assert_eq!(devices.len(), 2);
    for (index, device) in devices.iter().enumerate() {
        assert_eq!(device.index(), index);
        assert_eq!(device.backend_kind(), BackendKind::Software);
        assert!(!device.is_hardware());
    }
    // Discovery is cached: later calls hand out the same devices.
    assert_eq!(instance.device(1).unwrap(), devices[1]);
    assert!(instance.device(0).unwrap().same_device(&devices[0]));
    assert!(!devices[0].same_device(&devices[1]));
}

#[test]
fn out_of_range_indices_are_reported() {
    let instance = common::software_instance();
    let err = instance.device(2).unwrap_err();
    assert!(matches!(err, RhiError::DeviceIndex { index: 2, count: 2 }), "{err}");
    assert!(instance.select_current(7).is_err());
}

#[test]
fn best_device_prefers_discrete_hardware_with_most_memory() {
    let instance = ranked_instance(InstanceConfig::default());
    let best = instance.best_device().unwrap();
    assert_eq!(best.name(), "big discrete");
    assert_eq!(best.index(), 2);
    assert!(best.is_discrete());
    assert_eq!(best.dedicated_video_memory(), 8 << 30);
}

#[test]
fn equally_ranked_adapters_resolve_to_the_last_one() {
    let instance = common::software_instance();
    assert_eq!(instance.best_device().unwrap().index(), 1);

    let instance = Instance::with_loader(
        InstanceConfig::default(),
        Box::new(SoftwareLoader::with_adapters(vec![
            adapter("first", true, true, 4 << 30),
            adapter("second", true, true, 4 << 30),
            adapter("slower", true, false, 4 << 30),
        ])),
    );
    assert_eq!(instance.best_device().unwrap().name(), "second");
}

#[test]
fn a_pinned_device_index_overrides_ranking() {
    let instance = ranked_instance(InstanceConfig::default().with_device_index(3));
    assert_eq!(instance.best_device().unwrap().name(), "reference");
    assert_eq!(instance.current_device().unwrap().index(), 3);
}

#[test]
fn current_device_defaults_to_best_and_follows_selection() {
    let instance = ranked_instance(InstanceConfig::default());
    assert_eq!(instance.current_device().unwrap().index(), 2);

    let selected = instance.select_current(0).unwrap();
    assert_eq!(selected.name(), "integrated");
    assert_eq!(instance.current_device().unwrap(), selected);
}

#[test]
fn loader_kind_overrides_the_configured_backend() {
    let instance = Instance::with_loader(
        InstanceConfig::default().with_backend(BackendKind::Vulkan),
        Box::new(SoftwareLoader::default()),
    );
    assert_eq!(instance.config().backend, BackendKind::Software);
    assert_eq!(instance.device(0).unwrap().backend_kind(), BackendKind::Software);
}

#[test]
fn copies_between_devices_are_rejected() {
    let instance = common::software_instance();
    let first = instance.device(0).unwrap();
    let second = instance.device(1).unwrap();

    let src = common::upload_buffer(&first, &[1, 2, 3, 4]);
    let dst = second
        .create_buffer(&BufferDesc::new(HeapKind::Readback, 4))
        .unwrap();
    let err = src.copy_to(&dst, &CopyDesc::new()).unwrap_err();
    assert!(err.is_device_mismatch(), "{err}");

    // Each device keeps its own memory and counters.
    let local = first
        .create_buffer(&BufferDesc::new(HeapKind::Readback, 4))
        .unwrap();
    src.copy_to(&local, &CopyDesc::new()).unwrap();
    assert_eq!(local.readback(0, 0).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(first.stats().copies, 1);
    assert_eq!(second.stats().copies, 0);
}

#[test]
fn unavailable_backends_fail_discovery() {
    let instance = Instance::new(InstanceConfig::default().with_backend(BackendKind::D3D11));
    let err = instance.discover_devices().unwrap_err();
    assert!(err.is_unsupported(), "{err}");
}
