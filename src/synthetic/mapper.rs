//! Stand-in mapping engine and swapchain uploader.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use nalgebra::Isometry3;

use crate::render::{ColorBuffer, ImageUploader, MappingEngine, ViewCamera};
use crate::synthetic::tracker::SyntheticTracker;
use crate::xr::runtime::SwapchainImage;

/// Renders a gradient that shifts with the render pose, so successive frames
/// differ the way a real splat render would.
#[derive(Default)]
pub struct SyntheticMapper {
    camera: Option<ViewCamera>,
    tracker: Option<Arc<SyntheticTracker>>,
    renders: u64,
}

impl SyntheticMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the camera-to-world estimate from `tracker`.
    pub fn with_tracker(tracker: Arc<SyntheticTracker>) -> Self {
        Self {
            tracker: Some(tracker),
            ..Self::default()
        }
    }

    pub fn camera(&self) -> Option<&ViewCamera> {
        self.camera.as_ref()
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }
}

impl MappingEngine for SyntheticMapper {
    fn register_view_camera(&mut self, camera: &ViewCamera) -> Result<()> {
        if camera.width == 0 || camera.height == 0 {
            bail!("view camera {} has an empty image", camera.camera_id);
        }
        if !(camera.near_z > 0.0 && camera.near_z < camera.far_z) {
            bail!(
                "view camera {} clip range {}..{} is invalid",
                camera.camera_id,
                camera.near_z,
                camera.far_z
            );
        }
        log::info!(
            "mapper: registered camera {} ({}x{}, fov {:.3}..{:.3} x {:.3}..{:.3})",
            camera.camera_id,
            camera.width,
            camera.height,
            camera.fov.angle_left,
            camera.fov.angle_right,
            camera.fov.angle_down,
            camera.fov.angle_up
        );
        self.camera = Some(camera.clone());
        Ok(())
    }

    fn camera_to_world(&self) -> Isometry3<f32> {
        self.tracker
            .as_ref()
            .map(|tracker| tracker.latest_pose())
            .unwrap_or_else(Isometry3::identity)
    }

    fn render_from_pose(
        &mut self,
        pose: &Isometry3<f32>,
        width: u32,
        height: u32,
        _high_quality: bool,
    ) -> Result<ColorBuffer> {
        if self.camera.is_none() {
            bail!("render requested before a view camera was registered");
        }
        self.renders += 1;
        let t = pose.translation.vector;
        let phase = (t.x + t.z).fract().abs();
        let mut buffer = ColorBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let u = x as f32 / width.max(1) as f32;
                let v = y as f32 / height.max(1) as f32;
                buffer.set_pixel(x, y, [(u + phase).fract(), v, 1.0 - u * v]);
            }
        }
        Ok(buffer)
    }
}

/// Keeps an 8-bit copy of the last buffer uploaded to each texture.
#[derive(Default)]
pub struct MemoryUploader {
    textures: HashMap<u32, image::RgbImage>,
    uploads: u64,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn texture(&self, texture: u32) -> Option<&image::RgbImage> {
        self.textures.get(&texture)
    }
}

impl ImageUploader for MemoryUploader {
    fn upload(&mut self, target: SwapchainImage, buffer: &ColorBuffer) -> Result<()> {
        self.textures.insert(target.texture, buffer.to_rgb8());
        self.uploads += 1;
        Ok(())
    }
}
