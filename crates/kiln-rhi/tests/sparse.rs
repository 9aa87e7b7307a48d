mod common;

use kiln_rhi::resource::SPARSE_TILE_SIZE;
use kiln_rhi::{
    Backing, BufferDesc, CopyDesc, HeapKind, PixelFormat, Resource, RhiError, TextureDesc,
};
use pretty_assertions::assert_eq;

const TILE: u64 = SPARSE_TILE_SIZE;

#[test]
fn bound_tiles_hold_data_and_unbound_tiles_read_zero() {
    let device = common::software_device();
    let sparse = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, TILE * 3).sparse())
        .unwrap();
    assert!(matches!(sparse.backing(), Backing::Sparse));
    let tiles = sparse.tiles().unwrap();
    assert_eq!((tiles.tiles_x, tiles.tiles_y, tiles.tiles_z), (3, 1, 1));
    assert_eq!(sparse.bound_tiles(), 0);

    let heap = device.create_heap(HeapKind::Default, TILE * 2).unwrap();
    sparse.bind_tile(0, 0, 0, 0, Some((&heap, TILE))).unwrap();
    sparse.bind_tile(2, 0, 0, 0, Some((&heap, 0))).unwrap();
    assert_eq!(sparse.bound_tiles(), 2);

    let upload = common::upload_buffer(&device, &vec![0x5a; (TILE * 3) as usize]);
    upload.copy_to(&sparse, &CopyDesc::new()).unwrap();

    let out = common::read_back(&sparse);
    let tile = |i: u64| &out[(i * TILE) as usize..((i + 1) * TILE) as usize];
    assert!(tile(0).iter().all(|b| *b == 0x5a));
    assert!(tile(1).iter().all(|b| *b == 0));
    assert!(tile(2).iter().all(|b| *b == 0x5a));
    assert_eq!(device.stats().tile_binds, 2);
}

#[test]
fn tiles_sharing_heap_memory_alias() {
    let device = common::software_device();
    let sparse = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, TILE * 2).sparse())
        .unwrap();
    let heap = device.create_heap(HeapKind::Default, TILE).unwrap();
    sparse.bind_tile(0, 0, 0, 0, Some((&heap, 0))).unwrap();
    sparse.bind_tile(1, 0, 0, 0, Some((&heap, 0))).unwrap();

    let upload = common::upload_buffer(&device, &[1, 2, 3, 4]);
    upload
        .copy_to(&sparse, &CopyDesc::new().with_offsets(0, TILE + 8))
        .unwrap();

    let readback = device
        .create_buffer(&BufferDesc::new(HeapKind::Readback, 4))
        .unwrap();
    sparse
        .copy_to(&readback, &CopyDesc::new().with_offsets(8, 0).with_size(4))
        .unwrap();
    assert_eq!(readback.readback(0, 0).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn unbinding_a_tile_hides_its_contents() {
    let device = common::software_device();
    let sparse = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, TILE).sparse())
        .unwrap();
    let heap = device.create_heap(HeapKind::Default, TILE).unwrap();
    sparse.bind_tile(0, 0, 0, 0, Some((&heap, 0))).unwrap();
    common::upload_buffer(&device, &[9; 16])
        .copy_to(&sparse, &CopyDesc::new())
        .unwrap();

    sparse.bind_tile(0, 0, 0, 0, None).unwrap();
    assert_eq!(sparse.bound_tiles(), 0);
    assert!(common::read_back(&sparse)[..16].iter().all(|b| *b == 0));

    // Rebinding the same memory brings the data back.
    sparse.bind_tile(0, 0, 0, 0, Some((&heap, 0))).unwrap();
    assert_eq!(&common::read_back(&sparse)[..16], &[9; 16]);
}

#[test]
fn bind_tile_validates_its_arguments() {
    let device = common::software_device();
    let sparse = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, TILE * 2).sparse())
        .unwrap();
    let heap = device.create_heap(HeapKind::Default, TILE * 2).unwrap();

    let err = sparse.bind_tile(2, 0, 0, 0, Some((&heap, 0))).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = sparse.bind_tile(0, 0, 0, 1, Some((&heap, 0))).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = sparse.bind_tile(0, 0, 0, 0, Some((&heap, 16))).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");
    let err = sparse.bind_tile(0, 0, 0, 0, Some((&heap, TILE * 2))).unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");

    let upload_heap = device.create_heap(HeapKind::Upload, TILE).unwrap();
    let err = sparse.bind_tile(0, 0, 0, 0, Some((&upload_heap, 0))).unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");

    let other = common::software_instance().device(1).unwrap();
    let foreign = other.create_heap(HeapKind::Default, TILE).unwrap();
    let err = sparse.bind_tile(0, 0, 0, 0, Some((&foreign, 0))).unwrap_err();
    assert!(err.is_device_mismatch(), "{err}");

    let dense = device
        .create_buffer(&BufferDesc::new(HeapKind::Default, TILE))
        .unwrap();
    assert!(dense.tiles().is_none());
    let err = dense.bind_tile(0, 0, 0, 0, Some((&heap, 0))).unwrap_err();
    assert!(matches!(err, RhiError::Value(_)), "{err}");

    assert_eq!(sparse.bound_tiles(), 0);
}

#[test]
fn sparse_resources_cannot_be_placed() {
    let device = common::software_device();
    let heap = device.create_heap(HeapKind::Default, TILE).unwrap();
    let err = device
        .create_buffer_in(&BufferDesc::new(HeapKind::Default, TILE).sparse(), &heap, 0)
        .unwrap_err();
    assert!(matches!(err, RhiError::Buffer(_)), "{err}");

    let err = device
        .create_texture(
            &TextureDesc::d2(256, 256, PixelFormat::R32Float)
                .with_mip_levels(2)
                .sparse(),
        )
        .unwrap_err();
    assert!(matches!(err, RhiError::Texture { .. }), "{err}");
}

#[test]
fn sparse_textures_map_texels_through_tiles() {
    let device = common::software_device();
    // 128x128 texels per tile at 4 bytes per pixel, so a 256x128 texture is two tiles wide.
    let texture = device
        .create_texture(&TextureDesc::d2(256, 128, PixelFormat::R32Uint).sparse())
        .unwrap();
    let tiles = texture.tiles().unwrap();
    assert_eq!((tiles.tile_width, tiles.tile_height), (128, 128));
    assert_eq!((tiles.tiles_x, tiles.tiles_y), (2, 1));

    let heap = device.create_heap(HeapKind::Default, TILE).unwrap();
    texture.bind_tile(1, 0, 0, 0, Some((&heap, 0))).unwrap();

    let row_words: Vec<u32> = (0..256).collect();
    let mut data = Vec::new();
    for _ in 0..128 {
        data.extend(common::words(&row_words));
    }
    assert_eq!(data.len() as u64, texture.size());
    common::upload_buffer(&device, &data)
        .copy_to(&texture, &CopyDesc::new())
        .unwrap();

    let out = common::to_words(&common::read_back(&texture));
    let row = &out[256 * 5..256 * 6];
    assert!(row[..128].iter().all(|w| *w == 0));
    assert_eq!(&row[128..], &row_words[128..]);
}
