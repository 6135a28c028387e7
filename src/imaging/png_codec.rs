use super::{CodecError, RenderedImage};
use base64::prelude::{BASE64_STANDARD, Engine as _};
use image::ImageFormat;
use serde::Serialize;
use std::io::Cursor;
use tracing::debug;

/// A PNG ready for transport inside a JSON body.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub base64: String,
}

// Encodes a rendered frame as a standalone PNG.
pub fn encode_png(image: &RenderedImage) -> Result<Vec<u8>, CodecError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(CodecError::InvalidImage(format!(
            "zero-sized image ({}x{})",
            width, height
        )));
    }

    let expected = width as usize * height as usize;
    if image.as_raw().len() != expected {
        return Err(CodecError::InvalidImage(format!(
            "buffer holds {} bytes but {}x{} needs {}",
            image.as_raw().len(),
            width,
            height,
            expected
        )));
    }

    debug!("Encoding {}x{} frame as PNG.", width, height);

    let mut buffer = Cursor::new(Vec::new());
    image::write_buffer_with_format(
        &mut buffer,
        image.as_raw(),
        width,
        height,
        image::ColorType::L8,
        ImageFormat::Png,
    )?;

    Ok(buffer.into_inner())
}

pub fn encode_png_base64(image: &RenderedImage) -> Result<EncodedImage, CodecError> {
    let png = encode_png(image)?;
    Ok(EncodedImage {
        format: "png",
        width: image.width(),
        height: image.height(),
        base64: BASE64_STANDARD.encode(png),
    })
}
