//! Frame decoding and validation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::sync::Arc;

/// Decoded payloads smaller than this cannot be a camera image.
pub const MIN_PAYLOAD_BYTES: usize = 100;

/// One decoded camera image.
///
/// Cloning is cheap: pixel data and encoded bytes are shared.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the relay's receive order, starting at 1
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes as sent by the camera (e.g. JPEG), after base64 decoding
    pub encoded: Arc<[u8]>,
    pub image: Arc<DynamicImage>,
}

/// Why a payload was not turned into a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("received empty payload")]
    Empty,

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("payload too small to be an image ({len} bytes)")]
    Undersized { len: usize },

    #[error("invalid image data: {0}")]
    Image(String),
}

/// What the consumer gets from the relay buffer.
#[derive(Debug, Clone)]
pub enum Delivery {
    Frame(Frame),
    Error(FrameError),
}

impl Delivery {
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Delivery::Frame(frame) => Some(frame),
            Delivery::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FrameError> {
        match self {
            Delivery::Frame(_) => None,
            Delivery::Error(err) => Some(err),
        }
    }
}

/// Decode a base64 stream payload into a validated frame.
pub fn decode_payload(payload: &[u8], sequence: u64) -> Result<Frame, FrameError> {
    let text = payload.trim_ascii();
    if text.is_empty() {
        return Err(FrameError::Empty);
    }

    let bytes = STANDARD
        .decode(text)
        .map_err(|e| FrameError::Base64(e.to_string()))?;
    if bytes.len() < MIN_PAYLOAD_BYTES {
        return Err(FrameError::Undersized { len: bytes.len() });
    }

    let format = image::guess_format(&bytes).map_err(|e| FrameError::Image(e.to_string()))?;
    let image = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| FrameError::Image(e.to_string()))?;
    let (width, height) = image.dimensions();

    Ok(Frame {
        sequence,
        received_at: Utc::now(),
        format,
        width,
        height,
        encoded: Arc::from(bytes),
        image: Arc::new(image),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut seed: u32 = 0x2545_f491;
        let img = image::RgbImage::from_fn(width, height, |_, _| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [r, g, b, _] = seed.to_le_bytes();
            image::Rgb([r, g, b])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_valid_png() {
        let png = noisy_png(16, 12);
        let payload = STANDARD.encode(&png);

        let frame = decode_payload(payload.as_bytes(), 7).unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.format, ImageFormat::Png);
        assert_eq!((frame.width, frame.height), (16, 12));
        assert_eq!(&*frame.encoded, png.as_slice());
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let payload = format!("  {}\n", STANDARD.encode(noisy_png(8, 8)));
        assert!(decode_payload(payload.as_bytes(), 1).is_ok());
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert_eq!(decode_payload(b"", 1).unwrap_err(), FrameError::Empty);
        assert_eq!(decode_payload(b" \r\n", 1).unwrap_err(), FrameError::Empty);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_payload(b"not*base64*at*all", 1).unwrap_err();
        assert!(matches!(err, FrameError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_every_undersized_payload() {
        for len in 1..MIN_PAYLOAD_BYTES {
            let payload = STANDARD.encode(vec![0xffu8; len]);
            assert_eq!(
                decode_payload(payload.as_bytes(), 1).unwrap_err(),
                FrameError::Undersized { len },
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_decode_rejects_non_image() {
        let payload = STANDARD.encode(vec![0x42u8; 512]);
        let err = decode_payload(payload.as_bytes(), 1).unwrap_err();
        assert!(matches!(err, FrameError::Image(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_png() {
        let mut png = noisy_png(32, 32);
        png.truncate(png.len() / 2);
        let payload = STANDARD.encode(&png);
        let err = decode_payload(payload.as_bytes(), 1).unwrap_err();
        assert!(matches!(err, FrameError::Image(_)));
    }

    #[test]
    fn test_delivery_accessors() {
        let delivery = Delivery::Error(FrameError::Empty);
        assert!(delivery.frame().is_none());
        assert_eq!(delivery.error(), Some(&FrameError::Empty));
    }
}
