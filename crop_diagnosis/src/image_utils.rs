use image::{DynamicImage, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageInputError {
    #[error("{0}")]
    InvalidImage(String),
}

/// Decodes an uploaded image. The full decode doubles as verification, so
/// truncated or corrupted payloads are rejected here rather than later.
pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, ImageInputError> {
    if image_data.is_empty() {
        return Err(ImageInputError::InvalidImage("empty file".to_string()));
    }

    let image_reader = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ImageInputError::InvalidImage(e.to_string()))?;

    if image_reader.format().is_none() {
        return Err(ImageInputError::InvalidImage(
            "unrecognized image format".to_string(),
        ));
    }

    image_reader
        .decode()
        .map_err(|e| ImageInputError::InvalidImage(e.to_string()))
}

/// Drops alpha and expands grayscale so every image has three color channels.
pub fn to_rgb(image: &DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb.clone(),
        other => other.to_rgb8(),
    }
}
