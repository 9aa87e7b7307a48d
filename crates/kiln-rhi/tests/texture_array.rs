mod common;

use kiln_rhi::{BufferDesc, CopyDesc, HeapKind, PixelFormat, Resource, RhiError, TextureDesc};
use pretty_assertions::assert_eq;

fn filled(len: u64, value: u8) -> Vec<u8> {
    vec![value; len as usize]
}

#[test]
fn slices_are_independent_subresources() {
    let device = common::software_device();
    let array = device
        .create_texture(&TextureDesc::d2(4, 4, PixelFormat::R8G8B8A8Unorm).with_slices(3))
        .unwrap();
    assert_eq!(array.slices(), 3);
    assert_eq!(array.heap_size(), array.size() * 3);

    for slice in 0..3u32 {
        let upload = common::upload_buffer(&device, &filled(array.size(), slice as u8 + 1));
        upload
            .copy_to(&array, &CopyDesc::new().with_slices(0, slice))
            .unwrap();
    }

    let readback = device
        .create_buffer(&BufferDesc::new(HeapKind::Readback, array.size()))
        .unwrap();
    for slice in 0..3u32 {
        array
            .copy_to(&readback, &CopyDesc::new().with_slices(slice, 0))
            .unwrap();
        let out = readback.readback(16, 0).unwrap();
        assert_eq!(out, filled(16, slice as u8 + 1), "slice {slice}");
    }
}

#[test]
fn texture_copies_move_between_slices() {
    let device = common::software_device();
    let desc = TextureDesc::d1(64, PixelFormat::R32Uint).with_slices(2);
    let src = device.create_texture(&desc).unwrap();
    let dst = device.create_texture(&desc).unwrap();

    let mut words: Vec<u32> = (0..64).collect();
    let upload = common::upload_buffer(&device, &common::words(&words));
    upload
        .copy_to(&src, &CopyDesc::new().with_slices(0, 1))
        .unwrap();

    src.copy_to(
        &dst,
        &CopyDesc::new()
            .with_slices(1, 0)
            .with_src_origin(32, 0, 0)
            .with_extent(16, 1, 1),
    )
    .unwrap();

    let out = common::to_words(&common::read_back(&dst));
    words = (32..48).collect();
    assert_eq!(&out[..16], &words[..]);
    assert!(out[16..64].iter().all(|w| *w == 0));
}

#[test]
fn out_of_range_slices_are_rejected() {
    let device = common::software_device();
    let array = device
        .create_texture(&TextureDesc::d2(4, 4, PixelFormat::R8Unorm).with_slices(2))
        .unwrap();
    let upload = common::upload_buffer(&device, &filled(array.size(), 0));

    let err = upload
        .copy_to(&array, &CopyDesc::new().with_slices(0, 2))
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = array
        .copy_to(&array, &CopyDesc::new().with_slices(5, 0))
        .unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
}
