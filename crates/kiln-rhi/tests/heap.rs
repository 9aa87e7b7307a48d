mod common;

use kiln_rhi::{BufferDesc, CopyDesc, HeapKind, PixelFormat, Resource, RhiError, TextureDesc};
use pretty_assertions::assert_eq;

#[test]
fn placed_buffers_alias_heap_memory() {
    let device = common::software_device();
    let heap = device.create_heap(HeapKind::Upload, 1024).unwrap();
    let a = device
        .create_buffer_in(&BufferDesc::new(HeapKind::Upload, 256), &heap, 0)
        .unwrap();
    let b = device
        .create_buffer_in(&BufferDesc::new(HeapKind::Upload, 256), &heap, 128)
        .unwrap();
    assert!(a.heap().is_some_and(|h| h.ptr_eq(&heap)));
    assert_eq!(b.heap_offset(), 128);

    a.upload(&[0x11, 0x22, 0x33, 0x44], 130).unwrap();

    let readback = device
        .create_buffer(&BufferDesc::new(HeapKind::Readback, 4))
        .unwrap();
    b.copy_to(&readback, &CopyDesc::new().with_offsets(2, 0).with_size(4))
        .unwrap();
    assert_eq!(readback.readback(0, 0).unwrap(), vec![0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn placed_textures_share_default_heap_memory() {
    let device = common::software_device();
    let desc = TextureDesc::d2(4, 4, PixelFormat::R8G8B8A8Unorm);
    let heap = device.create_heap(HeapKind::Default, 4096).unwrap();
    let first = device.create_texture_in(&desc, &heap, 0).unwrap();
    let second = device.create_texture_in(&desc, &heap, 0).unwrap();

    let pixels: Vec<u8> = (0..first.size()).map(|i| i as u8).collect();
    let upload = common::upload_buffer(&device, &pixels);
    upload.copy_to(&first, &CopyDesc::new()).unwrap();

    assert_eq!(common::read_back(&second), pixels);
}

#[test]
fn heap_kind_must_match_the_buffer() {
    let device = common::software_device();
    let heap = device.create_heap(HeapKind::Default, 1024).unwrap();
    let err = device
        .create_buffer_in(&BufferDesc::new(HeapKind::Upload, 256), &heap, 0)
        .unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");

    let upload = device.create_heap(HeapKind::Upload, 1024).unwrap();
    let err = device
        .create_texture_in(&TextureDesc::d2(4, 4, PixelFormat::R8Unorm), &upload, 0)
        .unwrap_err();
    assert!(matches!(err, RhiError::Texture { .. }), "{err}");
}

#[test]
fn placements_must_fit_the_heap() {
    let device = common::software_device();
    let heap = device.create_heap(HeapKind::Default, 512).unwrap();

    assert!(device
        .create_buffer_in(&BufferDesc::new(HeapKind::Default, 256), &heap, 256)
        .is_ok());
    let err = device
        .create_buffer_in(&BufferDesc::new(HeapKind::Default, 256), &heap, 257)
        .unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");
    let err = device
        .create_buffer_in(&BufferDesc::new(HeapKind::Default, 256), &heap, u64::MAX)
        .unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");

    let err = device
        .create_texture_in(&TextureDesc::d2(64, 64, PixelFormat::R32Float), &heap, 0)
        .unwrap_err();
    assert!(matches!(err, RhiError::Texture { .. }), "{err}");
}

#[test]
fn zero_sized_heaps_are_rejected() {
    let device = common::software_device();
    assert!(matches!(
        device.create_heap(HeapKind::Default, 0),
        Err(RhiError::Heap(_))
    ));
}

#[test]
fn heaps_from_another_device_are_rejected() {
    let instance = common::software_instance();
    let first = instance.device(0).unwrap();
    let second = instance.device(1).unwrap();
    let heap = second.create_heap(HeapKind::Default, 1024).unwrap();

    let err = first
        .create_buffer_in(&BufferDesc::new(HeapKind::Default, 256), &heap, 0)
        .unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");
}

#[test]
fn a_heap_outlives_its_handle_while_resources_use_it() {
    let device = common::software_device();
    let buffer = {
        let heap = device.create_heap(HeapKind::Upload, 256).unwrap();
        device
            .create_buffer_in(&BufferDesc::new(HeapKind::Upload, 256), &heap, 0)
            .unwrap()
    };
    buffer.upload(&[5; 16], 0).unwrap();
    assert_eq!(buffer.heap().map(|h| h.size()), Some(256));
}
