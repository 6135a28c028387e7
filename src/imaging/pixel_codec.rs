// Conversion between the wire representation of a guide frame and its 16-bit samples.

use super::CodecError;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

/// A single 16-bit grayscale frame as delivered by the guider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

impl RawFrame {
    pub const BIT_DEPTH: u8 = 16;

    /// Wraps an already decoded pixel buffer. The sample count must equal `width * height`.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Result<Self, CodecError> {
        if pixels.len() as u64 != width as u64 * height as u64 {
            return Err(CodecError::DimensionMismatch {
                width,
                height,
                pixel_count: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decodes little-endian samples whose dimensions are known from the sender.
    pub fn from_le_bytes(bytes: &[u8], width: u32, height: u32) -> Result<Self, CodecError> {
        Self::new(width, height, decode_le_u16(bytes))
    }

    /// Decodes little-endian samples whose dimensions are unknown.
    ///
    /// The only available signal is the sample count, so the frame is assumed to be
    /// square with `side = floor(sqrt(count))`. Samples past `side * side` are dropped.
    /// Non-square sensors come out with the wrong geometry; this is a best-effort
    /// fallback, not a reconstruction.
    pub fn square_from_le_bytes(bytes: &[u8]) -> Self {
        let mut pixels = decode_le_u16(bytes);
        let side = pixels.len().isqrt();
        let used = side * side;

        if used != pixels.len() {
            warn!(
                "Frame of {} pixels is not a perfect square; assuming {}x{} and discarding {} trailing pixels",
                pixels.len(),
                side,
                side,
                pixels.len() - used
            );
        }
        pixels.truncate(used);

        Self {
            width: side as u32,
            height: side as u32,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }
}

/// Reads consecutive little-endian `u16` samples. A trailing odd byte is ignored.
pub fn decode_le_u16(bytes: &[u8]) -> Vec<u16> {
    let mut pixels = vec![0u16; bytes.len() / 2];
    LittleEndian::read_u16_into(&bytes[..pixels.len() * 2], &mut pixels);
    pixels
}

/// Inverse of [`decode_le_u16`].
pub fn encode_le_u16(pixels: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; pixels.len() * 2];
    LittleEndian::write_u16_into(pixels, &mut bytes);
    bytes
}

/// Decodes the guider's base64 pixel payload.
///
/// Some guider builds pad the string with NUL characters, which are stripped first.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    let trimmed = text.trim_end_matches('\0');
    Ok(BASE64_STANDARD.decode(trimmed)?)
}
