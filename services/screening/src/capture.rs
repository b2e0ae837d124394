//! services/screening/src/capture.rs
//!
//! Turns captured bytes into an `ImageBlob` the backends will accept:
//! JPEG or PNG, under 8 MiB, at least 512x512.

use std::io::Cursor;
use std::path::Path;

use hemoscan_core::{
    domain::{ImageBlob, ImageFormat},
    ports::{PortError, PortResult},
};
use image::ImageReader;
use tracing::debug;

use crate::error::ClientError;

pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;
pub const MIN_DIMENSION: u32 = 512;

/// Validates raw capture bytes and wraps them in an `ImageBlob`.
pub fn validate_capture(name: &str, bytes: Vec<u8>) -> PortResult<ImageBlob> {
    if bytes.is_empty() {
        return Err(PortError::ValidationFailure("The image is empty".to_string()));
    }
    if bytes.len() >= MAX_IMAGE_BYTES {
        return Err(PortError::ValidationFailure(format!(
            "The image is {} bytes; it must be smaller than 8 MB",
            bytes.len()
        )));
    }

    let format = match image::guess_format(&bytes) {
        Ok(image::ImageFormat::Jpeg) => ImageFormat::Jpeg,
        Ok(image::ImageFormat::Png) => ImageFormat::Png,
        _ => {
            return Err(PortError::ValidationFailure(
                "Only JPEG and PNG images are supported".to_string(),
            ))
        }
    };

    let decoder_format = match format {
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
    };
    let (width, height) = ImageReader::with_format(Cursor::new(&bytes), decoder_format)
        .into_dimensions()
        .map_err(|e| PortError::ValidationFailure(format!("Unreadable image: {}", e)))?;

    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(PortError::ValidationFailure(format!(
            "The image is {}x{}; it must be at least {}x{}",
            width, height, MIN_DIMENSION, MIN_DIMENSION
        )));
    }

    debug!(name, width, height, "Capture accepted");
    Ok(ImageBlob {
        name: name.to_string(),
        format,
        bytes,
    })
}

/// Reads and validates an image file.
pub async fn load_capture(path: &Path) -> Result<ImageBlob, ClientError> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    Ok(validate_capture(&name, bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn accepts_large_enough_png_and_jpeg() {
        let png = validate_capture("a.png", encode(512, 600, image::ImageFormat::Png)).unwrap();
        assert_eq!(png.format, ImageFormat::Png);
        let jpg = validate_capture("b.jpg", encode(640, 512, image::ImageFormat::Jpeg)).unwrap();
        assert_eq!(jpg.format, ImageFormat::Jpeg);
        assert_eq!(jpg.name, "b.jpg");
    }

    #[test]
    fn rejects_small_images() {
        let err = validate_capture("s.png", encode(511, 900, image::ImageFormat::Png)).unwrap_err();
        assert!(matches!(err, PortError::ValidationFailure(msg) if msg.contains("511x900")));
    }

    #[test]
    fn rejects_other_formats_and_oversized_blobs() {
        assert!(matches!(
            validate_capture("x.gif", b"GIF89a........".to_vec()),
            Err(PortError::ValidationFailure(_))
        ));
        assert!(matches!(
            validate_capture("empty.png", Vec::new()),
            Err(PortError::ValidationFailure(_))
        ));
        let mut big = vec![0u8; MAX_IMAGE_BYTES];
        big[..4].copy_from_slice(&[0x89, b'P', b'N', b'G']);
        assert!(matches!(
            validate_capture("big.png", big),
            Err(PortError::ValidationFailure(msg)) if msg.contains("8 MB")
        ));
    }
}
