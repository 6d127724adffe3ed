//! Pixel and codec types produced and consumed by decoders.

use std::fmt;

/// Coarsest discard level. Level `d` halves each dimension `d` times.
pub const MAX_DISCARD_LEVEL: u8 = 5;

/// Compressed image codec as announced by the datagram image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageCodec {
    /// Not announced; decoders sniff the stream.
    #[default]
    Unknown,
    Rgb,
    J2c,
    Bmp,
    Tga,
    Jpeg,
    Dxt,
    Png,
    Other(u8),
}

impl ImageCodec {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Rgb,
            2 => Self::J2c,
            3 => Self::Bmp,
            4 => Self::Tga,
            5 => Self::Jpeg,
            6 => Self::Dxt,
            7 => Self::Png,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Rgb => 1,
            Self::J2c => 2,
            Self::Bmp => 3,
            Self::Tga => 4,
            Self::Jpeg => 5,
            Self::Dxt => 6,
            Self::Png => 7,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ImageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Rgb => write!(f, "rgb"),
            Self::J2c => write!(f, "j2c"),
            Self::Bmp => write!(f, "bmp"),
            Self::Tga => write!(f, "tga"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Dxt => write!(f, "dxt"),
            Self::Png => write!(f, "png"),
            Self::Other(code) => write!(f, "codec#{}", code),
        }
    }
}

/// Uncompressed pixels, row-major, `components` bytes per pixel.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub data: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, components: u8, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            components,
            data,
        }
    }

    /// Number of bytes a well-formed buffer of these dimensions holds.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.components as usize
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("components", &self.components)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Decoder output for one discard level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub discard: u8,
    pub raw: RawImage,
    /// Auxiliary channel (alpha mask), present only when requested.
    pub aux: Option<RawImage>,
}
