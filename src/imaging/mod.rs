// Raw guide-frame handling: 16-bit pixel decoding, display stretch and PNG output.

mod pixel_codec;
mod png_codec;
mod stretch_curve;

pub use pixel_codec::{RawFrame, decode_base64, decode_le_u16, encode_le_u16};
pub use png_codec::{EncodedImage, encode_png, encode_png_base64};
pub use stretch_curve::{RenderedImage, StretchParameters, stretch};

use std::fmt;

/// Errors raised while converting between wire bytes, pixel buffers and PNG.
#[derive(Debug)]
pub enum CodecError {
    /// The inline pixel payload was not valid base64.
    InvalidBase64(base64::DecodeError),
    /// Declared dimensions do not agree with the number of samples.
    DimensionMismatch {
        width: u32,
        height: u32,
        pixel_count: usize,
    },
    /// Zero-sized or inconsistent rendered image handed to the encoder.
    InvalidImage(String),
    /// The PNG encoder itself failed.
    Encode(image::ImageError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBase64(e) => write!(f, "invalid base64 pixel data: {}", e),
            Self::DimensionMismatch {
                width,
                height,
                pixel_count,
            } => write!(
                f,
                "frame declared as {}x{} but carries {} pixels",
                width, height, pixel_count
            ),
            Self::InvalidImage(msg) => write!(f, "cannot encode image: {}", msg),
            Self::Encode(e) => write!(f, "PNG encoding failed: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidBase64(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        CodecError::InvalidBase64(err)
    }
}

impl From<image::ImageError> for CodecError {
    fn from(err: image::ImageError) -> Self {
        CodecError::Encode(err)
    }
}
