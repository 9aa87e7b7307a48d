use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{ResourceRef, TextureDimension};
use crate::hal::{BackendFeatures, Placement};
use crate::heap::Heap;
use crate::{Result, RhiError};

/// Bytes of memory behind one sparse tile.
pub const SPARSE_TILE_SIZE: u64 = 64 * 1024;

/// Tile shape and tile grid of a sparse resource.
///
/// Buffers are split into [`SPARSE_TILE_SIZE`]-byte tiles along x. Textures use the standard
/// 64 KiB tile shapes, which depend on the dimension and on bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_depth: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tiles_z: u32,
}

impl TileGeometry {
    pub fn for_buffer(size: u64) -> Self {
        Self {
            tile_width: SPARSE_TILE_SIZE as u32,
            tile_height: 1,
            tile_depth: 1,
            tiles_x: size.div_ceil(SPARSE_TILE_SIZE) as u32,
            tiles_y: 1,
            tiles_z: 1,
        }
    }

    pub fn for_texture(
        dimension: TextureDimension,
        bytes_per_pixel: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Option<Self> {
        let (tile_width, tile_height, tile_depth) = match (dimension, bytes_per_pixel) {
            (TextureDimension::D1, bpp @ (1 | 2 | 4 | 8 | 16)) => (65536 / bpp, 1, 1),
            (TextureDimension::D2, 1) => (256, 256, 1),
            (TextureDimension::D2, 2) => (256, 128, 1),
            (TextureDimension::D2, 4) => (128, 128, 1),
            (TextureDimension::D2, 8) => (128, 64, 1),
            (TextureDimension::D2, 16) => (64, 64, 1),
            (TextureDimension::D3, 1) => (64, 32, 32),
            (TextureDimension::D3, 2) => (32, 32, 32),
            (TextureDimension::D3, 4) => (32, 32, 16),
            (TextureDimension::D3, 8) => (32, 16, 16),
            (TextureDimension::D3, 16) => (16, 16, 16),
            _ => return None,
        };
        Some(Self {
            tile_width,
            tile_height,
            tile_depth,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            tiles_z: depth.div_ceil(tile_depth),
        })
    }

    pub fn tile_count(&self) -> u64 {
        u64::from(self.tiles_x) * u64::from(self.tiles_y) * u64::from(self.tiles_z)
    }

    pub fn contains(&self, tile: [u32; 3]) -> bool {
        tile[0] < self.tiles_x && tile[1] < self.tiles_y && tile[2] < self.tiles_z
    }

    /// Tile holding element `(x, y, z)`, and the element's linear index inside that tile.
    pub(crate) fn locate(&self, x: u32, y: u32, z: u32) -> ([u32; 3], u64) {
        let tile = [x / self.tile_width, y / self.tile_height, z / self.tile_depth];
        let (lx, ly, lz) = (
            u64::from(x % self.tile_width),
            u64::from(y % self.tile_height),
            u64::from(z % self.tile_depth),
        );
        let inner = (lz * u64::from(self.tile_height) + ly) * u64::from(self.tile_width) + lx;
        (tile, inner)
    }
}

/// Front-end record of which heaps back a sparse resource, keeping them alive while bound.
#[derive(Debug)]
pub(crate) struct SparseState {
    geometry: TileGeometry,
    bound: Mutex<HashMap<([u32; 3], u32), Heap>>,
}

impl SparseState {
    pub(crate) fn new(geometry: TileGeometry) -> Self {
        Self {
            geometry,
            bound: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    pub(crate) fn bound_tiles(&self) -> usize {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub(crate) fn bind_tile(
    resource: ResourceRef<'_>,
    tile: [u32; 3],
    slice: u32,
    binding: Option<(&Heap, u64)>,
) -> Result<()> {
    let device = resource.device();
    let Some(state) = resource.sparse_state() else {
        return Err(RhiError::Value("not a sparse resource".into()));
    };
    let geometry = state.geometry;
    if !geometry.contains(tile) {
        return Err(RhiError::Value(format!(
            "tile ({}, {}, {}) is out of bounds (tiles_x: {}, tiles_y: {}, tiles_z: {})",
            tile[0], tile[1], tile[2], geometry.tiles_x, geometry.tiles_y, geometry.tiles_z
        )));
    }
    if slice >= resource.slices() {
        return Err(RhiError::Value(format!(
            "slice {slice} is out of bounds ({} slices)",
            resource.slices()
        )));
    }

    let placement = match binding {
        None => None,
        Some((heap, offset)) => {
            device.ensure_same("heap", heap.device())?;
            if heap.kind() != resource.heap_kind() {
                return Err(resource.error(format!(
                    "tile heap kind {} does not match resource heap kind {}",
                    heap.kind(),
                    resource.heap_kind()
                )));
            }
            if offset % SPARSE_TILE_SIZE != 0 {
                return Err(RhiError::Value(format!(
                    "tile heap offset {offset} is not a multiple of {SPARSE_TILE_SIZE}"
                )));
            }
            if offset.checked_add(SPARSE_TILE_SIZE).map_or(true, |end| end > heap.size()) {
                return Err(resource.error(format!(
                    "invalid heap offset ({offset}) (heap size {})",
                    heap.size()
                )));
            }
            Some(Placement {
                heap: heap.id(),
                offset,
            })
        }
    };

    device.require(BackendFeatures::SPARSE, "sparse residency")?;

    let mut bound = state.bound.lock().unwrap_or_else(PoisonError::into_inner);
    let id = resource.id();
    device.with_backend(|backend| backend.bind_tile(id, tile, slice, placement))?;
    device.stats_counters().inc_tile_binds();
    tracing::debug!(
        device = %device.label(),
        ?id,
        ?tile,
        slice,
        ?placement,
        "bound tile"
    );

    let previous = match binding {
        Some((heap, _)) => bound.insert((tile, slice), heap.clone()),
        None => bound.remove(&(tile, slice)),
    };
    drop(bound);
    drop(previous);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_tiles_cover_the_whole_size() {
        let geometry = TileGeometry::for_buffer(SPARSE_TILE_SIZE * 3 + 1);
        assert_eq!(geometry.tiles_x, 4);
        assert_eq!(geometry.tile_count(), 4);
        assert!(geometry.contains([3, 0, 0]));
        assert!(!geometry.contains([4, 0, 0]));
    }

    #[test]
    fn standard_texture_shapes_hold_64k() {
        for bpp in [1u32, 2, 4, 8, 16] {
            for dimension in [TextureDimension::D1, TextureDimension::D2, TextureDimension::D3] {
                let g = TileGeometry::for_texture(dimension, bpp, 1, 1, 1).unwrap();
                let bytes = u64::from(g.tile_width * g.tile_height * g.tile_depth * bpp);
                assert_eq!(bytes, SPARSE_TILE_SIZE, "{dimension} bpp={bpp}");
            }
        }
        assert!(TileGeometry::for_texture(TextureDimension::D2, 12, 1, 1, 1).is_none());
    }

    #[test]
    fn locate_maps_texels_into_tiles() {
        let g = TileGeometry::for_texture(TextureDimension::D2, 4, 512, 512, 1).unwrap();
        assert_eq!((g.tiles_x, g.tiles_y), (4, 4));
        assert_eq!(g.locate(0, 0, 0), ([0, 0, 0], 0));
        assert_eq!(g.locate(129, 2, 0), ([1, 0, 0], 2 * 128 + 1));
    }
}
