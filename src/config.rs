use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::DEFAULT_QUEUE_CAPACITY;
use crate::ingest::{IngestConfig, TransportConfig};
use crate::xr::runtime::{FormFactor, ReferenceSpaceType, ViewConfigurationType};
use crate::xr::{FrameCycleConfig, XrAppConfig};

const DEFAULT_ENDPOINT: &str = "tcp://localhost:5555";
const DEFAULT_IMAGE_SCALE: f32 = 1.0;
const DEFAULT_NEAR_Z: f32 = 0.01;
const DEFAULT_FAR_Z: f32 = 100.0;
const DEFAULT_CAMERA_ID: u32 = crate::xr::app::XR_VIEW_CAMERA_ID;
const DEFAULT_REQUIRED_EXTENSION: &str = "XR_KHR_opengl_enable";
const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    ingest: Option<IngestConfigFile>,
    xr: Option<XrConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    endpoint: Option<String>,
    queue_capacity: Option<usize>,
    image_scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct XrConfigFile {
    form_factor: Option<FormFactor>,
    view_configuration: Option<ViewConfigurationType>,
    reference_space: Option<ReferenceSpaceType>,
    near_z: Option<f32>,
    far_z: Option<f32>,
    camera_id: Option<u32>,
    required_extension: Option<String>,
    swapchain_wait_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    preview: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub ingest: IngestSettings,
    pub xr: XrSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub endpoint: String,
    pub queue_capacity: usize,
    pub image_scale: f32,
}

#[derive(Debug, Clone)]
pub struct XrSettings {
    pub form_factor: FormFactor,
    pub view_configuration: ViewConfigurationType,
    pub reference_space: ReferenceSpaceType,
    pub near_z: f32,
    pub far_z: f32,
    pub camera_id: u32,
    pub required_extension: String,
    /// `None` waits for swapchain images indefinitely.
    pub swapchain_wait_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub preview: bool,
}

impl BridgeConfig {
    /// Load from the file named by `XR_BRIDGE_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("XR_BRIDGE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Self {
        let ingest = file.ingest.unwrap_or_default();
        let xr = file.xr.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        Self {
            ingest: IngestSettings {
                endpoint: ingest
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                queue_capacity: ingest.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                image_scale: ingest.image_scale.unwrap_or(DEFAULT_IMAGE_SCALE),
            },
            xr: XrSettings {
                form_factor: xr.form_factor.unwrap_or(FormFactor::HeadMountedDisplay),
                view_configuration: xr
                    .view_configuration
                    .unwrap_or(ViewConfigurationType::PrimaryStereo),
                reference_space: xr.reference_space.unwrap_or(ReferenceSpaceType::View),
                near_z: xr.near_z.unwrap_or(DEFAULT_NEAR_Z),
                far_z: xr.far_z.unwrap_or(DEFAULT_FAR_Z),
                camera_id: xr.camera_id.unwrap_or(DEFAULT_CAMERA_ID),
                required_extension: xr
                    .required_extension
                    .unwrap_or_else(|| DEFAULT_REQUIRED_EXTENSION.to_string()),
                swapchain_wait_timeout: xr.swapchain_wait_timeout_ms.map(Duration::from_millis),
            },
            output: OutputSettings {
                dir: output
                    .dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                preview: output.preview.unwrap_or(true),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("XR_BRIDGE_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.ingest.endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(capacity) = std::env::var("XR_BRIDGE_QUEUE_CAPACITY") {
            self.ingest.queue_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("XR_BRIDGE_QUEUE_CAPACITY must be a positive integer"))?;
        }
        if let Ok(scale) = std::env::var("XR_BRIDGE_IMAGE_SCALE") {
            self.ingest.image_scale = scale
                .trim()
                .parse()
                .map_err(|_| anyhow!("XR_BRIDGE_IMAGE_SCALE must be a number"))?;
        }
        if let Ok(dir) = std::env::var("XR_BRIDGE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output.dir = PathBuf::from(dir);
            }
        }
        if let Ok(near) = std::env::var("XR_BRIDGE_NEAR_Z") {
            self.xr.near_z = near
                .trim()
                .parse()
                .map_err(|_| anyhow!("XR_BRIDGE_NEAR_Z must be a number"))?;
        }
        if let Ok(far) = std::env::var("XR_BRIDGE_FAR_Z") {
            self.xr.far_z = far
                .trim()
                .parse()
                .map_err(|_| anyhow!("XR_BRIDGE_FAR_Z must be a number"))?;
        }
        if let Ok(preview) = std::env::var("XR_BRIDGE_PREVIEW") {
            self.output.preview = parse_bool(&preview)
                .ok_or_else(|| anyhow!("XR_BRIDGE_PREVIEW must be true or false"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ingest.queue_capacity == 0 {
            return Err(anyhow!("ingest.queue_capacity must be at least 1"));
        }
        if !(self.ingest.image_scale.is_finite() && self.ingest.image_scale > 0.0) {
            return Err(anyhow!(
                "ingest.image_scale must be a positive number, got {}",
                self.ingest.image_scale
            ));
        }
        if !(self.xr.near_z > 0.0 && self.xr.near_z < self.xr.far_z) {
            return Err(anyhow!(
                "xr clip range must satisfy 0 < near_z < far_z, got {}..{}",
                self.xr.near_z,
                self.xr.far_z
            ));
        }
        if self.xr.required_extension.trim().is_empty() {
            return Err(anyhow!("xr.required_extension must not be empty"));
        }
        Ok(())
    }

    pub fn xr_app_config(&self) -> XrAppConfig {
        XrAppConfig {
            required_extension: self.xr.required_extension.clone(),
            form_factor: self.xr.form_factor,
            reference_space: self.xr.reference_space,
            near_z: self.xr.near_z,
            far_z: self.xr.far_z,
            camera_id: self.xr.camera_id,
            cycle: FrameCycleConfig {
                view_type: self.xr.view_configuration,
                swapchain_wait_timeout: self.xr.swapchain_wait_timeout,
                ..FrameCycleConfig::default()
            },
            ..XrAppConfig::default()
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            queue_capacity: self.ingest.queue_capacity,
            ..IngestConfig::default()
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            endpoint: self.ingest.endpoint.clone(),
            ..TransportConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
