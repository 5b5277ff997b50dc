//! Image decoding for transported color/depth messages.

use anyhow::{bail, Context, Result};
use image::{DynamicImage, RgbImage};

use crate::frame::DepthImage;

/// Turns encoded message bytes into rasters. Failures drop the frame pair.
pub trait FrameDecoder: Send {
    fn decode_color(&self, bytes: &[u8]) -> Result<RgbImage>;
    fn decode_depth(&self, bytes: &[u8]) -> Result<DepthImage>;
}

/// Decoder backed by the `image` crate (PNG, JPEG).
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageDecoder;

impl FrameDecoder for ImageDecoder {
    fn decode_color(&self, bytes: &[u8]) -> Result<RgbImage> {
        let img = image::load_from_memory(bytes).context("decode color image")?;
        Ok(img.to_rgb8())
    }

    /// Depth keeps its sensor units: 16-bit input passes through unchanged,
    /// 8-bit grayscale is widened without rescaling.
    fn decode_depth(&self, bytes: &[u8]) -> Result<DepthImage> {
        let img = image::load_from_memory(bytes).context("decode depth image")?;
        match img {
            DynamicImage::ImageLuma16(depth) => Ok(depth),
            DynamicImage::ImageLuma8(gray) => {
                let (w, h) = gray.dimensions();
                let widened = gray.into_raw().into_iter().map(u16::from).collect();
                DepthImage::from_raw(w, h, widened).context("widen 8-bit depth")
            }
            other => bail!("depth image must be single channel, got {:?}", other.color()),
        }
    }
}
