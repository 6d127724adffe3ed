//! Decoder trait.

use bytes::Bytes;
use thiserror::Error;

use crate::decode::{DecodedImage, ImageCodec};
use crate::id::ImageId;
use crate::transport::FIRST_PACKET_SIZE;
use crate::BoxFuture;

/// Assumed compression ratio for progressive streams.
pub const DEFAULT_COMPRESSION_RATIO: usize = 8;

/// Errors raised while decoding compressed bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid image data: {0}")]
    InvalidData(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(ImageCodec),

    #[error("not enough data for discard level {discard} ({available} bytes)")]
    Incomplete { discard: u8, available: usize },

    #[error("decode task failed: {0}")]
    TaskFailed(String),
}

/// Turns compressed bytes into raw pixels.
///
/// `decode` must not block the calling task; CPU-bound work belongs on the
/// blocking pool.
pub trait ImageDecoder: Send + Sync + 'static {
    /// Decode `data` at `discard`, producing an auxiliary channel if asked.
    fn decode(
        &self,
        id: ImageId,
        codec: ImageCodec,
        data: Bytes,
        discard: u8,
        needs_aux: bool,
    ) -> BoxFuture<'_, Result<DecodedImage, DecodeError>>;

    /// Leading bytes of the stream needed to decode at `discard`.
    ///
    /// `None` means the decoder needs the complete stream. The default
    /// assumes a progressive codec at [`DEFAULT_COMPRESSION_RATIO`].
    fn data_size(&self, width: u32, height: u32, components: u8, discard: u8) -> Option<usize> {
        estimate_data_size(width, height, components, discard)
    }

    fn name(&self) -> &str;
}

/// Progressive-stream size estimate used by the default `data_size`.
///
/// Returns `None` when the dimensions are unknown.
pub fn estimate_data_size(width: u32, height: u32, components: u8, discard: u8) -> Option<usize> {
    if width == 0 || height == 0 || components == 0 {
        return None;
    }
    let w = (width >> discard).max(1) as usize;
    let h = (height >> discard).max(1) as usize;
    let bytes = w * h * components as usize / DEFAULT_COMPRESSION_RATIO;
    Some(bytes.max(FIRST_PACKET_SIZE))
}
