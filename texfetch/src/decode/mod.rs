//! Image decoding.
//!
//! The worker hands the bytes it has assembled to an [`ImageDecoder`] at a
//! target discard level and receives raw pixels back. The decoder also
//! answers how many leading bytes a discard level needs, which is what lets
//! the worker stop fetching early for coarse requests.

mod image_crate;
mod traits;
mod types;

pub use image_crate::ImageCrateDecoder;
pub use traits::{estimate_data_size, DecodeError, ImageDecoder, DEFAULT_COMPRESSION_RATIO};
pub use types::{DecodedImage, ImageCodec, RawImage, MAX_DISCARD_LEVEL};
