//! Payment-proof compression.
//!
//! Buyers upload phone screenshots of their bank transfer. They are stored
//! in the purchase row and attached to the operator email, so they are
//! re-encoded as small JPEGs first.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use raffle_core::environment::ProofCompressor;
use raffle_core::error::{RaffleError, Result};

/// Widest image kept before quality reduction
pub const MAX_WIDTH: u32 = 800;
/// Narrowest image the shrink loop will produce
pub const MIN_WIDTH: u32 = 320;
/// First JPEG quality tried
pub const QUALITY_START: u8 = 75;
/// Lowest JPEG quality tried
pub const QUALITY_MIN: u8 = 35;
/// Size ceiling of the compressed proof
pub const MAX_PROOF_BYTES: usize = 80 * 1024;

/// Re-encodes PNG/JPEG uploads as JPEG under [`MAX_PROOF_BYTES`].
///
/// Strategy: cap the width at [`MAX_WIDTH`], walk the quality down from
/// [`QUALITY_START`] to [`QUALITY_MIN`] in steps of 5, and if nothing fits,
/// shrink the width by 10% and try again until [`MIN_WIDTH`].
///
/// CPU-bound; call it from `spawn_blocking`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegProofCompressor;

impl JpegProofCompressor {
    /// Create a compressor with the default limits
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let height = u64::from(img.height()) * u64::from(width) / u64::from(img.width().max(1));
    let height = u32::try_from(height).unwrap_or(u32::MAX).max(1);
    img.resize_exact(width, height, FilterType::Lanczos3)
}

fn encode_under_ceiling(img: &DynamicImage) -> Option<Vec<u8>> {
    let rgb = img.to_rgb8();
    (QUALITY_MIN..=QUALITY_START)
        .rev()
        .step_by(5)
        .find_map(|quality| {
            let mut buf = Vec::new();
            // An encoding failure at one quality just moves on to the next.
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
                .ok()?;
            (buf.len() <= MAX_PROOF_BYTES).then_some(buf)
        })
}

impl ProofCompressor for JpegProofCompressor {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.is_empty() {
            return Err(RaffleError::ProofRejected("no image data".to_string()));
        }

        let mut img = image::load_from_memory(raw)
            .map_err(|e| RaffleError::ProofRejected(format!("decode: {e}")))?;

        if img.width() > MAX_WIDTH {
            img = resize_to_width(&img, MAX_WIDTH);
        }

        if let Some(out) = encode_under_ceiling(&img) {
            return Ok(out);
        }

        let mut width = img.width();
        while width > MIN_WIDTH {
            width = (width * 9 / 10).max(MIN_WIDTH);
            img = resize_to_width(&img, width);

            if let Some(out) = encode_under_ceiling(&img) {
                tracing::debug!(width, bytes = out.len(), "Proof compressed after shrinking");
                return Ok(out);
            }
        }

        Err(RaffleError::ProofRejected(format!(
            "unable to compress image under {MAX_PROOF_BYTES} bytes"
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, noisy: bool) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if noisy {
                // Cheap deterministic noise defeats JPEG's compression.
                let v = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503));
                #[allow(clippy::cast_possible_truncation)]
                Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
            } else {
                Rgb([200, 220, 240])
            }
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn rejects_empty_and_garbage() {
        let compressor = JpegProofCompressor::new();
        assert!(matches!(
            compressor.compress(&[]),
            Err(RaffleError::ProofRejected(_))
        ));
        assert!(matches!(
            compressor.compress(b"not an image"),
            Err(RaffleError::ProofRejected(_))
        ));
    }

    #[test]
    fn wide_screenshot_is_capped_and_small() {
        let out = JpegProofCompressor::new().compress(&png(1600, 900, false)).unwrap();
        assert!(out.len() <= MAX_PROOF_BYTES);

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), MAX_WIDTH);
        assert_eq!(decoded.height(), 450);
    }

    #[test]
    fn output_is_jpeg() {
        let out = JpegProofCompressor::new().compress(&png(100, 100, false)).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn noisy_image_shrinks_until_it_fits_or_is_rejected() {
        match JpegProofCompressor::new().compress(&png(640, 900, true)) {
            Ok(out) => {
                assert!(out.len() <= MAX_PROOF_BYTES);
                let decoded = image::load_from_memory(&out).unwrap();
                assert!(decoded.width() <= 640 && decoded.width() >= MIN_WIDTH);
            }
            Err(err) => assert!(matches!(err, RaffleError::ProofRejected(_))),
        }
    }
}
