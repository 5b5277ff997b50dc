//! Local mirror of what the headset shows.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::render::{ColorBuffer, MirrorRect, PreviewSurface};

/// Software companion surface, `width` x `height / 2` for a `width` x `height` view.
pub struct MirrorCanvas {
    surface: RgbImage,
    presented: u64,
}

impl MirrorCanvas {
    pub fn new(view_width: u32, view_height: u32) -> Self {
        Self {
            surface: RgbImage::new(view_width, (view_height / 2).max(1)),
            presented: 0,
        }
    }

    pub fn surface(&self) -> &RgbImage {
        &self.surface
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.surface
            .save(path)
            .with_context(|| format!("write preview {}", path.display()))
    }
}

impl PreviewSurface for MirrorCanvas {
    fn present(&mut self, view_index: usize, buffer: &ColorBuffer, dst: MirrorRect) -> Result<()> {
        let (sw, sh) = self.surface.dimensions();
        if dst.x1 > sw || dst.y1 > sh || dst.x0 >= dst.x1 || dst.y0 >= dst.y1 {
            bail!(
                "mirror rect {:?} for view {} outside {}x{} surface",
                dst,
                view_index,
                sw,
                sh
            );
        }
        let scaled = imageops::resize(
            &buffer.to_rgb8(),
            dst.x1 - dst.x0,
            dst.y1 - dst.y0,
            FilterType::Triangle,
        );
        imageops::replace(&mut self.surface, &scaled, dst.x0 as i64, dst.y0 as i64);
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mirror_rect;

    #[test]
    fn views_land_side_by_side() {
        let mut canvas = MirrorCanvas::new(8, 4);
        let white = ColorBuffer::from_raw(8, 4, vec![1.0; 8 * 4 * 3]).unwrap();
        canvas.present(1, &white, mirror_rect(1, 8, 4)).unwrap();
        assert_eq!(canvas.surface().dimensions(), (8, 2));
        assert_eq!(canvas.surface().get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(canvas.surface().get_pixel(7, 1).0, [255, 255, 255]);
        assert_eq!(canvas.presented(), 1);
    }

    #[test]
    fn out_of_bounds_rect_is_rejected() {
        let mut canvas = MirrorCanvas::new(8, 4);
        let buffer = ColorBuffer::new(8, 4);
        let rect = MirrorRect { x0: 4, y0: 0, x1: 16, y1: 2 };
        assert!(canvas.present(0, &buffer, rect).is_err());
    }
}
