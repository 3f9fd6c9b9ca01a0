use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty frame buffer")]
    Empty,
    #[error("Unrecognized image format: {0}")]
    UnknownFormat(std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Decoded image has no pixels ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },
    #[error("Decode task failed: {0}")]
    Aborted(String),
}

/// A decoded still image, alive for a single inference call.
#[derive(Debug)]
pub struct Frame {
    image: DynamicImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

impl TryFrom<DynamicImage> for Frame {
    type Error = DecodeError;

    fn try_from(image: DynamicImage) -> Result<Self, Self::Error> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroSized { width, height });
        }
        Ok(Self { image })
    }
}

pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(DecodeError::UnknownFormat)?
        .decode()?;

    Frame::try_from(image)
}

/// Decodes on the blocking pool so large frames do not stall the async workers.
pub async fn decode_blocking(bytes: Bytes) -> Result<Frame, DecodeError> {
    tokio::task::spawn_blocking(move || decode(&bytes))
        .await
        .map_err(|e| DecodeError::Aborted(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, format).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let frame = decode(&encode(100, 60, ImageFormat::Png)).unwrap();

        assert_eq!(frame.width(), 100);
        assert_eq!(frame.height(), 60);
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn test_reencoded_frame_keeps_dimensions() {
        let frame = decode(&encode(37, 23, ImageFormat::Jpeg)).unwrap();

        let mut cursor = Cursor::new(Vec::new());
        frame.image().write_to(&mut cursor, ImageFormat::Png).unwrap();
        let again = decode(&cursor.into_inner()).unwrap();

        assert_eq!((again.width(), again.height()), (37, 23));
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_truncated_image_is_rejected() {
        let bytes = encode(64, 64, ImageFormat::Png);
        let truncated = &bytes[..bytes.len() / 2];

        assert!(decode(truncated).is_err());
    }

    #[test]
    fn test_noise_is_rejected() {
        let noise: Vec<u8> = (0u8..=32).map(|b| b.wrapping_mul(37)).collect();

        assert!(decode(&noise).is_err());
    }

    #[test]
    fn test_png_header_without_body_is_rejected() {
        let header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

        assert!(decode(&header).is_err());
    }

    #[tokio::test]
    async fn test_decode_blocking() {
        let bytes = Bytes::from(encode(48, 32, ImageFormat::Png));
        let frame = decode_blocking(bytes).await.unwrap();

        assert_eq!((frame.width(), frame.height()), (48, 32));
        assert!(matches!(
            decode_blocking(Bytes::new()).await,
            Err(DecodeError::Empty)
        ));
    }
}
