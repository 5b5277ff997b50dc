//! Per-call tracking latency record.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const TRACKING_TIME_FILE: &str = "TrackingTime.txt";

/// Tracking call durations in seconds, in call order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatencyLog {
    samples: Vec<f64>,
}

impl LatencyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push(elapsed.as_secs_f64());
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn median(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Write one value per line with four decimals.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        for sample in &self.samples {
            writeln!(writer, "{:.4}", sample)?;
        }
        Ok(())
    }

    /// Write `TrackingTime.txt` into `dir`, creating it if needed, and log a summary.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(TRACKING_TIME_FILE);
        let file = fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;

        if let (Some(median), Some(mean)) = (self.median(), self.mean()) {
            log::info!(
                "tracking time over {} frames: median {:.4}s, mean {:.4}s",
                self.len(),
                median,
                mean
            );
        }
        Ok(path)
    }
}
