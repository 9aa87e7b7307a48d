//! CPU-side packing between tightly packed pixel rows and pitched linear layouts.

use crate::{Result, RhiError};

/// Interleaves `filler` after every `stride`-byte element of `data`.
///
/// `data` must hold a whole number of elements.
pub fn chunked(data: &[u8], stride: u32, filler: &[u8]) -> Result<Vec<u8>> {
    if stride == 0 {
        return Err(RhiError::Value("stride must be greater than 0".into()));
    }
    let stride = stride as usize;
    if data.len() % stride != 0 {
        return Err(RhiError::Value(format!(
            "data length {} is not a multiple of the stride {stride}",
            data.len()
        )));
    }
    let elements = data.len() / stride;
    let mut out = Vec::with_capacity(elements * (stride + filler.len()));
    for element in data.chunks_exact(stride) {
        out.extend_from_slice(element);
        out.extend_from_slice(filler);
    }
    Ok(out)
}

/// Splits tightly packed rows of `width * bytes_per_pixel` bytes into `(offset, row)` pairs at
/// `pitch`-byte intervals.
///
/// `data` may be shorter than `height` rows, in which case the last row is partial, but never
/// longer. Every placed byte must land below `capacity`.
pub fn pitched_rows<'a>(
    data: &'a [u8],
    pitch: u32,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    capacity: u64,
) -> Result<Vec<(u64, &'a [u8])>> {
    let row_bytes = u64::from(width) * u64::from(bytes_per_pixel);
    if row_bytes > u64::from(pitch) {
        return Err(RhiError::Value(format!(
            "pitch {pitch} is smaller than a row of {row_bytes} bytes"
        )));
    }
    let supplied = data.len() as u64;
    if supplied > row_bytes * u64::from(height) {
        return Err(RhiError::Value(format!(
            "supplied {supplied} bytes but {height} rows of {row_bytes} bytes hold only {}",
            row_bytes * u64::from(height)
        )));
    }
    if supplied == 0 {
        return Ok(Vec::new());
    }
    let full_rows = supplied / row_bytes;
    let tail = supplied % row_bytes;
    let end = if tail == 0 {
        (full_rows - 1) * u64::from(pitch) + row_bytes
    } else {
        full_rows * u64::from(pitch) + tail
    };
    if end > capacity {
        return Err(RhiError::Value(format!(
            "pitched rows span {end} bytes (expected no more than {capacity})"
        )));
    }
    let rows = data
        .chunks(row_bytes as usize)
        .enumerate()
        .map(|(y, row)| (y as u64 * u64::from(pitch), row))
        .collect();
    Ok(rows)
}

/// Gathers `height` rows of `width * bytes_per_pixel` bytes spaced `pitch` bytes apart.
pub fn unpitch(
    src: &[u8],
    pitch: u32,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
) -> Result<Vec<u8>> {
    let row_bytes = width as usize * bytes_per_pixel as usize;
    let required = pitched_size(pitch, width, height, bytes_per_pixel);
    if row_bytes > pitch as usize || (src.len() as u64) < required {
        return Err(RhiError::Value(format!(
            "requested buffer out of bounds: {required} (expected no more than {})",
            src.len()
        )));
    }
    let mut out = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * pitch as usize;
        out.extend_from_slice(&src[start..start + row_bytes]);
    }
    Ok(out)
}

/// Bytes spanned by `height` pitched rows, where the last row is not padded.
pub fn pitched_size(pitch: u32, width: u32, height: u32, bytes_per_pixel: u32) -> u64 {
    if height == 0 {
        return 0;
    }
    u64::from(pitch) * u64::from(height - 1) + u64::from(width) * u64::from(bytes_per_pixel)
}
