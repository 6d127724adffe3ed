//! Decoder backed by the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::trace;

use crate::decode::{DecodeError, DecodedImage, ImageCodec, ImageDecoder, RawImage};
use crate::id::ImageId;
use crate::BoxFuture;

/// Decodes PNG, JPEG, BMP and TGA streams on the blocking thread pool.
///
/// These formats are not progressive, so the decoder always needs the whole
/// stream and reports `None` from [`ImageDecoder::data_size`]. Discard levels
/// are produced by downsampling the full-resolution image.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateDecoder {
    filter: FilterType,
}

impl Default for ImageCrateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCrateDecoder {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

fn format_for(codec: ImageCodec) -> Result<Option<ImageFormat>, DecodeError> {
    match codec {
        ImageCodec::Unknown => Ok(None),
        ImageCodec::Png => Ok(Some(ImageFormat::Png)),
        ImageCodec::Jpeg => Ok(Some(ImageFormat::Jpeg)),
        ImageCodec::Bmp => Ok(Some(ImageFormat::Bmp)),
        ImageCodec::Tga => Ok(Some(ImageFormat::Tga)),
        other => Err(DecodeError::UnsupportedCodec(other)),
    }
}

fn decode_blocking(
    data: &[u8],
    format: Option<ImageFormat>,
    discard: u8,
    needs_aux: bool,
    filter: FilterType,
) -> Result<DecodedImage, DecodeError> {
    let reader = match format {
        Some(format) => ImageReader::with_format(Cursor::new(data), format),
        None => ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| DecodeError::InvalidData(e.to_string()))?,
    };
    let full = reader
        .decode()
        .map_err(|e| DecodeError::InvalidData(e.to_string()))?;

    let image = if discard > 0 {
        let width = (full.width() >> discard).max(1);
        let height = (full.height() >> discard).max(1);
        full.resize_exact(width, height, filter)
    } else {
        full
    };

    Ok(split_channels(image, discard, needs_aux))
}

fn split_channels(image: DynamicImage, discard: u8, needs_aux: bool) -> DecodedImage {
    let (width, height) = (image.width(), image.height());

    if needs_aux {
        let rgba = image.to_rgba8().into_raw();
        let mut color = Vec::with_capacity(rgba.len() / 4 * 3);
        let mut alpha = Vec::with_capacity(rgba.len() / 4);
        for pixel in rgba.chunks_exact(4) {
            color.extend_from_slice(&pixel[..3]);
            alpha.push(pixel[3]);
        }
        return DecodedImage {
            discard,
            raw: RawImage::new(width, height, 3, color),
            aux: Some(RawImage::new(width, height, 1, alpha)),
        };
    }

    let raw = if image.color().has_alpha() {
        RawImage::new(width, height, 4, image.to_rgba8().into_raw())
    } else {
        RawImage::new(width, height, 3, image.to_rgb8().into_raw())
    };
    DecodedImage {
        discard,
        raw,
        aux: None,
    }
}

impl ImageDecoder for ImageCrateDecoder {
    fn decode(
        &self,
        id: ImageId,
        codec: ImageCodec,
        data: Bytes,
        discard: u8,
        needs_aux: bool,
    ) -> BoxFuture<'_, Result<DecodedImage, DecodeError>> {
        let filter = self.filter;
        Box::pin(async move {
            if data.is_empty() {
                return Err(DecodeError::Incomplete {
                    discard,
                    available: 0,
                });
            }
            let format = format_for(codec)?;
            trace!(%id, %codec, bytes = data.len(), discard, "decoding");
            tokio::task::spawn_blocking(move || {
                decode_blocking(&data, format, discard, needs_aux, filter)
            })
            .await
            .map_err(|e| DecodeError::TaskFailed(e.to_string()))?
        })
    }

    fn data_size(&self, _width: u32, _height: u32, _components: u8, _discard: u8) -> Option<usize> {
        None
    }

    fn name(&self) -> &str {
        "image"
    }
}
