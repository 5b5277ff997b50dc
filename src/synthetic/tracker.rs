//! Stand-in tracking engine.
//!
//! Derives a pose per frame from the depth raster (forward motion follows the
//! median depth) and records the trajectory, which can be saved in TUM format
//! (`timestamp tx ty tz qx qy qz qw`).

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use image::RgbImage;
use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use crate::frame::DepthImage;
use crate::ingest::pipeline::{ImuSample, TrackingEngine};

pub const TRAJECTORY_FILE: &str = "CameraTrajectory.txt";

pub struct SyntheticTracker {
    image_scale: f32,
    max_frames: Option<u64>,
    tracked: AtomicU64,
    shut_down: AtomicBool,
    trajectory: Mutex<Vec<(f64, Isometry3<f32>)>>,
}

impl SyntheticTracker {
    pub fn new(image_scale: f32) -> Self {
        Self {
            image_scale,
            max_frames: None,
            tracked: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            trajectory: Mutex::new(Vec::new()),
        }
    }

    /// Shut down on its own after `frames` tracked pairs.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn frames_tracked(&self) -> u64 {
        self.tracked.load(Ordering::SeqCst)
    }

    /// Latest camera-to-world estimate, identity before the first frame.
    pub fn latest_pose(&self) -> Isometry3<f32> {
        self.trajectory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, pose)| *pose)
            .unwrap_or_else(Isometry3::identity)
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.trajectory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(t, _)| *t)
            .collect()
    }
}

fn median_depth_m(depth: &DepthImage) -> f32 {
    let mut valid: Vec<u16> = depth.pixels().map(|p| p.0[0]).filter(|d| *d > 0).collect();
    if valid.is_empty() {
        return 0.0;
    }
    let mid = valid.len() / 2;
    let (_, median, _) = valid.select_nth_unstable(mid);
    *median as f32 / 1000.0
}

impl TrackingEngine for SyntheticTracker {
    fn track_rgbd(&self, color: &RgbImage, depth: &DepthImage, timestamp: f64, _aux: &[ImuSample]) {
        let forward = median_depth_m(depth);
        let yaw = (timestamp as f32 * 0.01).sin() * 0.1;
        let pose = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, forward * 0.01 * timestamp as f32),
            UnitQuaternion::from_euler_angles(0.0, yaw, 0.0),
        );
        log::trace!(
            "tracker: frame {} color {:?} depth {:?} median depth {:.3} m",
            timestamp,
            color.dimensions(),
            depth.dimensions(),
            forward
        );
        self.trajectory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((timestamp, pose));

        let tracked = self.tracked.fetch_add(1, Ordering::SeqCst) + 1;
        if self.max_frames.is_some_and(|max| tracked >= max) {
            self.shutdown();
        }
    }

    fn image_scale(&self) -> f32 {
        self.image_scale
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            log::info!("tracker: shut down after {} frames", self.frames_tracked());
        }
    }

    fn save_trajectories(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(TRAJECTORY_FILE);
        let file = fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let trajectory = self.trajectory.lock().unwrap_or_else(PoisonError::into_inner);
        for (timestamp, pose) in trajectory.iter() {
            let t = pose.translation.vector;
            let q = pose.rotation.coords;
            writeln!(
                out,
                "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
                timestamp, t.x, t.y, t.z, q.x, q.y, q.z, q.w
            )?;
        }
        out.flush()?;
        log::info!("tracker: wrote {} poses to {}", trajectory.len(), path.display());
        Ok(())
    }
}
