//! Pixel formats shared by typed buffers and textures.
//!
//! Discriminants follow the DXGI numbering so formats can round-trip through tooling that
//! speaks raw integers (shader reflection dumps, capture files).

use half::f16;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R32G32B32A32Float = 2,
    R32G32B32A32Uint = 3,
    R32G32B32A32Sint = 4,
    R32G32B32Float = 6,
    R32G32B32Uint = 7,
    R32G32B32Sint = 8,
    R16G16B16A16Float = 10,
    R16G16B16A16Unorm = 11,
    R16G16B16A16Uint = 12,
    R16G16B16A16Snorm = 13,
    R16G16B16A16Sint = 14,
    R32G32Float = 16,
    R32G32Uint = 17,
    R32G32Sint = 18,
    R8G8B8A8Unorm = 28,
    R8G8B8A8UnormSrgb = 29,
    R8G8B8A8Uint = 30,
    R8G8B8A8Snorm = 31,
    R8G8B8A8Sint = 32,
    R16G16Float = 34,
    R16G16Unorm = 35,
    R16G16Uint = 36,
    R16G16Snorm = 37,
    R16G16Sint = 38,
    R32Float = 41,
    R32Uint = 42,
    R32Sint = 43,
    R8G8Unorm = 49,
    R8G8Uint = 50,
    R8G8Snorm = 51,
    R8G8Sint = 52,
    R16Float = 54,
    R16Unorm = 55,
    R16Uint = 57,
    R16Snorm = 58,
    R16Sint = 59,
    R8Unorm = 61,
    R8Uint = 62,
    R8Snorm = 63,
    R8Sint = 64,
    B8G8R8A8Unorm = 87,
    B8G8R8A8UnormSrgb = 91,
}

/// How shader code observes texels of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Float,
    Uint,
    Sint,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 42] = [
        Self::R32G32B32A32Float,
        Self::R32G32B32A32Uint,
        Self::R32G32B32A32Sint,
        Self::R32G32B32Float,
        Self::R32G32B32Uint,
        Self::R32G32B32Sint,
        Self::R16G16B16A16Float,
        Self::R16G16B16A16Unorm,
        Self::R16G16B16A16Uint,
        Self::R16G16B16A16Snorm,
        Self::R16G16B16A16Sint,
        Self::R32G32Float,
        Self::R32G32Uint,
        Self::R32G32Sint,
        Self::R8G8B8A8Unorm,
        Self::R8G8B8A8UnormSrgb,
        Self::R8G8B8A8Uint,
        Self::R8G8B8A8Snorm,
        Self::R8G8B8A8Sint,
        Self::R16G16Float,
        Self::R16G16Unorm,
        Self::R16G16Uint,
        Self::R16G16Snorm,
        Self::R16G16Sint,
        Self::R32Float,
        Self::R32Uint,
        Self::R32Sint,
        Self::R8G8Unorm,
        Self::R8G8Uint,
        Self::R8G8Snorm,
        Self::R8G8Sint,
        Self::R16Float,
        Self::R16Unorm,
        Self::R16Uint,
        Self::R16Snorm,
        Self::R16Sint,
        Self::R8Unorm,
        Self::R8Uint,
        Self::R8Snorm,
        Self::R8Sint,
        Self::B8G8R8A8Unorm,
        Self::B8G8R8A8UnormSrgb,
    ];

    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.as_raw() == raw)
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R32G32B32A32Float | Self::R32G32B32A32Uint | Self::R32G32B32A32Sint => 16,
            Self::R32G32B32Float | Self::R32G32B32Uint | Self::R32G32B32Sint => 12,
            Self::R16G16B16A16Float
            | Self::R16G16B16A16Unorm
            | Self::R16G16B16A16Uint
            | Self::R16G16B16A16Snorm
            | Self::R16G16B16A16Sint
            | Self::R32G32Float
            | Self::R32G32Uint
            | Self::R32G32Sint => 8,
            Self::R8G8B8A8Unorm
            | Self::R8G8B8A8UnormSrgb
            | Self::R8G8B8A8Uint
            | Self::R8G8B8A8Snorm
            | Self::R8G8B8A8Sint
            | Self::R16G16Float
            | Self::R16G16Unorm
            | Self::R16G16Uint
            | Self::R16G16Snorm
            | Self::R16G16Sint
            | Self::R32Float
            | Self::R32Uint
            | Self::R32Sint
            | Self::B8G8R8A8Unorm
            | Self::B8G8R8A8UnormSrgb => 4,
            Self::R8G8Unorm
            | Self::R8G8Uint
            | Self::R8G8Snorm
            | Self::R8G8Sint
            | Self::R16Float
            | Self::R16Unorm
            | Self::R16Uint
            | Self::R16Snorm
            | Self::R16Sint => 2,
            Self::R8Unorm | Self::R8Uint | Self::R8Snorm | Self::R8Sint => 1,
        }
    }

    pub const fn sample_kind(self) -> SampleKind {
        match self {
            Self::R32G32B32A32Uint
            | Self::R32G32B32Uint
            | Self::R16G16B16A16Uint
            | Self::R32G32Uint
            | Self::R8G8B8A8Uint
            | Self::R16G16Uint
            | Self::R32Uint
            | Self::R8G8Uint
            | Self::R16Uint
            | Self::R8Uint => SampleKind::Uint,
            Self::R32G32B32A32Sint
            | Self::R32G32B32Sint
            | Self::R16G16B16A16Sint
            | Self::R32G32Sint
            | Self::R8G8B8A8Sint
            | Self::R16G16Sint
            | Self::R32Sint
            | Self::R8G8Sint
            | Self::R16Sint
            | Self::R8Sint => SampleKind::Sint,
            _ => SampleKind::Float,
        }
    }

    /// 32-bit float formats are not filterable without optional device features.
    pub const fn is_filterable(self) -> bool {
        !matches!(
            self,
            Self::R32G32B32A32Float | Self::R32G32B32Float | Self::R32G32Float | Self::R32Float
        ) && matches!(self.sample_kind(), SampleKind::Float)
    }

    pub const fn is_srgb(self) -> bool {
        matches!(self, Self::R8G8B8A8UnormSrgb | Self::B8G8R8A8UnormSrgb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Unorm8,
    Snorm8,
    Uint8,
    Sint8,
    Unorm16,
    Snorm16,
    Uint16,
    Sint16,
    Float16,
    Uint32,
    Sint32,
    Float32,
}

impl Channel {
    const fn size(self) -> usize {
        match self {
            Channel::Unorm8 | Channel::Snorm8 | Channel::Uint8 | Channel::Sint8 => 1,
            Channel::Unorm16
            | Channel::Snorm16
            | Channel::Uint16
            | Channel::Sint16
            | Channel::Float16 => 2,
            Channel::Uint32 | Channel::Sint32 | Channel::Float32 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        let u16_at = || u16::from_le_bytes([bytes[0], bytes[1]]);
        let u32_at = || u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        match self {
            Channel::Unorm8 => f32::from(bytes[0]) / 255.0,
            Channel::Snorm8 => (f32::from(bytes[0] as i8) / 127.0).max(-1.0),
            Channel::Uint8 => f32::from(bytes[0]),
            Channel::Sint8 => f32::from(bytes[0] as i8),
            Channel::Unorm16 => f32::from(u16_at()) / 65535.0,
            Channel::Snorm16 => (f32::from(u16_at() as i16) / 32767.0).max(-1.0),
            Channel::Uint16 => f32::from(u16_at()),
            Channel::Sint16 => f32::from(u16_at() as i16),
            Channel::Float16 => f16::from_bits(u16_at()).to_f32(),
            Channel::Uint32 => u32_at() as f32,
            Channel::Sint32 => u32_at() as i32 as f32,
            Channel::Float32 => f32::from_bits(u32_at()),
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

impl PixelFormat {
    fn layout(self) -> (Channel, usize) {
        use PixelFormat::*;
        match self {
            R32G32B32A32Float => (Channel::Float32, 4),
            R32G32B32A32Uint => (Channel::Uint32, 4),
            R32G32B32A32Sint => (Channel::Sint32, 4),
            R32G32B32Float => (Channel::Float32, 3),
            R32G32B32Uint => (Channel::Uint32, 3),
            R32G32B32Sint => (Channel::Sint32, 3),
            R16G16B16A16Float => (Channel::Float16, 4),
            R16G16B16A16Unorm => (Channel::Unorm16, 4),
            R16G16B16A16Uint => (Channel::Uint16, 4),
            R16G16B16A16Snorm => (Channel::Snorm16, 4),
            R16G16B16A16Sint => (Channel::Sint16, 4),
            R32G32Float => (Channel::Float32, 2),
            R32G32Uint => (Channel::Uint32, 2),
            R32G32Sint => (Channel::Sint32, 2),
            R8G8B8A8Unorm | R8G8B8A8UnormSrgb | B8G8R8A8Unorm | B8G8R8A8UnormSrgb => {
                (Channel::Unorm8, 4)
            }
            R8G8B8A8Uint => (Channel::Uint8, 4),
            R8G8B8A8Snorm => (Channel::Snorm8, 4),
            R8G8B8A8Sint => (Channel::Sint8, 4),
            R16G16Float => (Channel::Float16, 2),
            R16G16Unorm => (Channel::Unorm16, 2),
            R16G16Uint => (Channel::Uint16, 2),
            R16G16Snorm => (Channel::Snorm16, 2),
            R16G16Sint => (Channel::Sint16, 2),
            R32Float => (Channel::Float32, 1),
            R32Uint => (Channel::Uint32, 1),
            R32Sint => (Channel::Sint32, 1),
            R8G8Unorm => (Channel::Unorm8, 2),
            R8G8Uint => (Channel::Uint8, 2),
            R8G8Snorm => (Channel::Snorm8, 2),
            R8G8Sint => (Channel::Sint8, 2),
            R16Float => (Channel::Float16, 1),
            R16Unorm => (Channel::Unorm16, 1),
            R16Uint => (Channel::Uint16, 1),
            R16Snorm => (Channel::Snorm16, 1),
            R16Sint => (Channel::Sint16, 1),
            R8Unorm => (Channel::Unorm8, 1),
            R8Uint => (Channel::Uint8, 1),
            R8Snorm => (Channel::Snorm8, 1),
            R8Sint => (Channel::Sint8, 1),
        }
    }

    /// Decodes one texel to RGBA. Missing channels read as 0, missing alpha as 1.
    ///
    /// sRGB formats are converted to linear; BGRA formats are swizzled to RGBA.
    pub fn decode_texel(self, bytes: &[u8]) -> Option<[f32; 4]> {
        let (channel, count) = self.layout();
        let bytes = bytes.get(..channel.size() * count)?;
        let mut rgba = [0.0, 0.0, 0.0, 1.0];
        for (i, value) in bytes.chunks_exact(channel.size()).enumerate() {
            rgba[i] = channel.decode(value);
        }
        if matches!(self, Self::B8G8R8A8Unorm | Self::B8G8R8A8UnormSrgb) {
            rgba.swap(0, 2);
        }
        if self.is_srgb() {
            for c in &mut rgba[..3] {
                *c = srgb_to_linear(*c);
            }
        }
        Some(rgba)
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_round_trip() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_raw(format.as_raw()), Some(format));
        }
        assert_eq!(PixelFormat::from_raw(0), None);
        assert_eq!(PixelFormat::from_raw(90), None);
    }

    #[test]
    fn pixel_sizes_match_channel_layout() {
        assert_eq!(PixelFormat::R32G32B32A32Uint.bytes_per_pixel(), 16);
        assert_eq!(PixelFormat::R32G32B32Float.bytes_per_pixel(), 12);
        assert_eq!(PixelFormat::R16G16B16A16Float.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::B8G8R8A8UnormSrgb.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::R16Float.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::R8Uint.bytes_per_pixel(), 1);
    }

    #[test]
    fn decode_normalized_and_float_texels() {
        assert_eq!(
            PixelFormat::R8G8B8A8Unorm.decode_texel(&[255, 0, 51, 255]),
            Some([1.0, 0.0, 0.2, 1.0])
        );
        assert_eq!(
            PixelFormat::B8G8R8A8Unorm.decode_texel(&[255, 0, 0, 255]),
            Some([0.0, 0.0, 1.0, 1.0])
        );
        assert_eq!(
            PixelFormat::R32Float.decode_texel(&1.5f32.to_le_bytes()),
            Some([1.5, 0.0, 0.0, 1.0])
        );
        assert_eq!(PixelFormat::R32G32Float.decode_texel(&[0; 4]), None);
    }

    #[test]
    fn half_float_texels_decode() {
        let texel: Vec<u8> = [0x3c00u16, 0xc000, 0x3800, 0x7c00]
            .iter()
            .flat_map(|h| h.to_le_bytes())
            .collect();
        let [r, g, b, a] = PixelFormat::R16G16B16A16Float.decode_texel(&texel).unwrap();
        assert_eq!((r, g, b), (1.0, -2.0, 0.5));
        assert!(a.is_infinite());
    }

    #[test]
    fn channel_layouts_match_pixel_sizes() {
        for format in PixelFormat::ALL {
            let (channel, count) = format.layout();
            assert_eq!(
                (channel.size() * count) as u32,
                format.bytes_per_pixel(),
                "{format:?}"
            );
        }
    }

    #[test]
    fn float32_formats_are_not_filterable() {
        assert!(!PixelFormat::R32Float.is_filterable());
        assert!(PixelFormat::R16G16B16A16Float.is_filterable());
        assert!(!PixelFormat::R32Uint.is_filterable());
    }
}
