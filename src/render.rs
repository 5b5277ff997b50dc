//! Mapping/rendering collaborators and rendered-buffer handling.
//!
//! The splat renderer itself is external. This module defines the narrow
//! interface the frame cycle needs from it, the linear float buffer it hands
//! back, and the post-processing applied before the buffer reaches a
//! swapchain image (display gamma, vertical flip) or the preview mirror.

use anyhow::{anyhow, Result};
use nalgebra::Isometry3;

use crate::xr::{Fov, SwapchainImage};

/// Display gamma exponent applied to linear renderer output.
pub const DISPLAY_GAMMA: f32 = 1.0 / 2.2;

// ----------------------------------------------------------------------------
// ColorBuffer
// ----------------------------------------------------------------------------

/// Row-major RGB buffer in floating-point linear color, row 0 at the top.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ColorBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * 3],
        }
    }

    /// Wrap raw RGB samples. Fails if the sample count does not match the shape.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "color buffer {}x{} needs {} samples, got {}",
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [f32; 3]) {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    /// True when the buffer is non-empty and exactly `width` x `height`.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.width == width && self.height == height
    }

    /// Raise every sample to `exponent`. Negative samples clamp to zero first.
    pub fn apply_gamma(&mut self, exponent: f32) {
        for v in &mut self.data {
            *v = v.max(0.0).powf(exponent);
        }
    }

    /// Mirror rows top-to-bottom (GL textures have their origin bottom-left).
    pub fn flip_vertical(&mut self) {
        let row = self.width as usize * 3;
        let h = self.height as usize;
        for y in 0..h / 2 {
            let (top, bottom) = self.data.split_at_mut((h - 1 - y) * row);
            top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
        }
    }

    /// Quantise to 8-bit RGB, clamping to [0, 1].
    pub fn to_rgb8(&self) -> image::RgbImage {
        let bytes = self
            .data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        image::RgbImage::from_raw(self.width, self.height, bytes)
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }
}

/// Prepare a renderer buffer for upload: display gamma then vertical flip.
pub fn prepare_for_display(buffer: &mut ColorBuffer) {
    buffer.apply_gamma(DISPLAY_GAMMA);
    buffer.flip_vertical();
}

// ----------------------------------------------------------------------------
// Collaborator traits
// ----------------------------------------------------------------------------

/// Camera registered with the mapping engine for XR rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewCamera {
    pub camera_id: u32,
    pub width: u32,
    pub height: u32,
    pub near_z: f32,
    pub far_z: f32,
    pub fov: Fov,
}

/// Mapping/rendering engine seen from the frame cycle.
pub trait MappingEngine {
    /// Register the compositor's view camera (intrinsics derived from `fov`).
    fn register_view_camera(&mut self, camera: &ViewCamera) -> Result<()>;

    /// Current camera-to-world estimate from tracking.
    fn camera_to_world(&self) -> Isometry3<f32>;

    /// Render a linear float RGB buffer of `width` x `height` from `pose`.
    fn render_from_pose(
        &mut self,
        pose: &Isometry3<f32>,
        width: u32,
        height: u32,
        high_quality: bool,
    ) -> Result<ColorBuffer>;
}

/// Copies a prepared buffer into an acquired swapchain image.
pub trait ImageUploader {
    fn upload(&mut self, target: SwapchainImage, buffer: &ColorBuffer) -> Result<()>;
}

/// Destination rectangle on the preview surface, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MirrorRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// Local companion surface mirroring what the headset shows. Best-effort only.
pub trait PreviewSurface {
    fn present(&mut self, view_index: usize, buffer: &ColorBuffer, dst: MirrorRect) -> Result<()>;
}

/// Side-by-side mirror layout on a `width` x `height / 2` companion surface.
///
/// View 0 takes the left half, every other view the right half.
pub fn mirror_rect(view_index: usize, width: u32, height: u32) -> MirrorRect {
    let surface_w = width;
    let surface_h = height / 2;
    let (x0, x1) = if view_index == 0 {
        (0, surface_w / 2)
    } else {
        (surface_w / 2, surface_w)
    };
    MirrorRect {
        x0,
        y0: 0,
        x1,
        y1: surface_h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> ColorBuffer {
        let data = (0..width * height * 3).map(|i| i as f32).collect();
        ColorBuffer::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(ColorBuffer::from_raw(2, 2, vec![0.0; 11]).is_err());
        assert!(ColorBuffer::from_raw(2, 2, vec![0.0; 12]).is_ok());
    }

    #[test]
    fn matches_requires_exact_shape() {
        let buf = ColorBuffer::new(4, 3);
        assert!(buf.matches(4, 3));
        assert!(!buf.matches(3, 4));
        assert!(!ColorBuffer::new(0, 0).matches(0, 0));
    }

    #[test]
    fn flip_vertical_swaps_rows() {
        let mut buf = ramp(2, 3);
        let top = buf.pixel(1, 0);
        let bottom = buf.pixel(1, 2);
        let middle = buf.pixel(0, 1);
        buf.flip_vertical();
        assert_eq!(buf.pixel(1, 0), bottom);
        assert_eq!(buf.pixel(1, 2), top);
        assert_eq!(buf.pixel(0, 1), middle);
    }

    #[test]
    fn gamma_brightens_mid_tones_and_keeps_endpoints() {
        let mut buf = ColorBuffer::from_raw(1, 1, vec![0.0, 0.5, 1.0]).unwrap();
        buf.apply_gamma(DISPLAY_GAMMA);
        let [r, g, b] = buf.pixel(0, 0);
        assert_eq!(r, 0.0);
        assert!((g - 0.5f32.powf(DISPLAY_GAMMA)).abs() < 1e-6);
        assert!(g > 0.7);
        assert!((b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn to_rgb8_clamps() {
        let buf = ColorBuffer::from_raw(1, 1, vec![-1.0, 0.5, 3.0]).unwrap();
        let img = buf.to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 128, 255]);
    }

    #[test]
    fn mirror_layout_is_side_by_side() {
        assert_eq!(
            mirror_rect(0, 1280, 720),
            MirrorRect { x0: 0, y0: 0, x1: 640, y1: 360 }
        );
        assert_eq!(
            mirror_rect(1, 1280, 720),
            MirrorRect { x0: 640, y0: 0, x1: 1280, y1: 360 }
        );
    }
}
