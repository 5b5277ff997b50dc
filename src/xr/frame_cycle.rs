//! Per-frame compositor protocol.
//!
//! One call to `run_cycle` is one displayed frame:
//!
//! 1. wait for frame timing (fatal on failure)
//! 2. begin frame (fatal on failure)
//! 3. locate views; failure, a view-count mismatch or an invalid pose turns
//!    rendering off for this cycle only
//! 4. per view, in order: acquire, wait, render, validate, upload, mirror,
//!    release. The first failing view stops the loop, after its image has
//!    been released.
//! 5. end frame, exactly once, with one projection layer or none
//!
//! The cycle is never abandoned between begin and end. Errors that must
//! propagate (image release, end frame) are returned only after end frame has
//! been issued.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::pose;
use crate::render::{mirror_rect, prepare_for_display, ImageUploader, MappingEngine, PreviewSurface};
use crate::xr::resources::{ViewSwapchain, XrResources};
use crate::xr::runtime::{
    CompositorRuntime, FrameEndInfo, LocatedViews, ProjectionLayer, ProjectionView, View,
    ViewConfigurationType,
};

/// Why a cycle ended the way it did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// All views rendered; one layer submitted.
    Submitted,
    /// The runtime asked not to render this frame.
    NotRequested,
    LocateFailed,
    ViewCountMismatch { expected: usize, got: usize },
    InvalidPose,
    RenderFailed { view: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub display_time: i64,
    /// Whether rendering was still on at end frame.
    pub should_render: bool,
    pub rendered_views: usize,
    pub layers_submitted: usize,
    pub outcome: CycleOutcome,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub submitted: u64,
    pub skipped: u64,
    pub view_failures: u64,
    pub preview_failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCycleConfig {
    pub view_type: ViewConfigurationType,
    /// `None` waits for swapchain images indefinitely.
    pub swapchain_wait_timeout: Option<Duration>,
    pub high_quality: bool,
}

impl Default for FrameCycleConfig {
    fn default() -> Self {
        Self {
            view_type: ViewConfigurationType::PrimaryStereo,
            swapchain_wait_timeout: None,
            high_quality: true,
        }
    }
}

/// External collaborators a cycle renders through.
pub struct RenderTargets<'a> {
    pub mapper: &'a mut dyn MappingEngine,
    pub uploader: &'a mut dyn ImageUploader,
    pub preview: Option<&'a mut dyn PreviewSurface>,
}

pub struct FrameCycleController {
    config: FrameCycleConfig,
    stats: CycleStats,
}

impl FrameCycleController {
    pub fn new(config: FrameCycleConfig) -> Self {
        Self {
            config,
            stats: CycleStats::default(),
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Run one complete frame cycle.
    pub fn run_cycle(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        resources: &XrResources,
        targets: &mut RenderTargets<'_>,
    ) -> Result<CycleReport> {
        let session = resources
            .session
            .ok_or_else(|| anyhow!("frame cycle without a session"))?;
        let space = resources
            .space
            .ok_or_else(|| anyhow!("frame cycle without a reference space"))?;

        let frame_state = runtime.wait_frame(session).context("wait for frame timing")?;
        runtime.begin_frame(session).context("begin frame")?;
        self.stats.cycles += 1;

        let display_time = frame_state.predicted_display_time;
        let mut should_render = frame_state.should_render;
        let mut outcome = CycleOutcome::NotRequested;
        let mut located: Option<LocatedViews> = None;

        if should_render {
            match runtime.locate_views(session, self.config.view_type, display_time, space) {
                Err(err) => {
                    log::debug!("not rendering: {}", err);
                    should_render = false;
                    outcome = CycleOutcome::LocateFailed;
                }
                Ok(views) if views.views.len() != resources.view_count() => {
                    log::debug!(
                        "not rendering: located {} views, expected {}",
                        views.views.len(),
                        resources.view_count()
                    );
                    should_render = false;
                    outcome = CycleOutcome::ViewCountMismatch {
                        expected: resources.view_count(),
                        got: views.views.len(),
                    };
                }
                Ok(views) if !views.flags.pose_valid() => {
                    log::debug!("not rendering: pose flags {:?}", views.flags);
                    should_render = false;
                    outcome = CycleOutcome::InvalidPose;
                }
                Ok(views) => located = Some(views),
            }
        }

        let mut rendered_views = 0;
        let mut deferred: Option<anyhow::Error> = None;
        if let (true, Some(views)) = (should_render, located.as_ref()) {
            for (index, (swapchain, view)) in resources.swapchains.iter().zip(&views.views).enumerate() {
                let image_index = match runtime.acquire_swapchain_image(swapchain.handle) {
                    Ok(image_index) => image_index,
                    Err(err) => {
                        log::warn!("view {} not rendered: {}", index, err);
                        self.stats.view_failures += 1;
                        should_render = false;
                        outcome = CycleOutcome::RenderFailed { view: index };
                        break;
                    }
                };
                let drawn = self.render_view(runtime, index, image_index, swapchain, view, targets);
                let released = runtime.release_swapchain_image(swapchain.handle);

                if let Err(err) = released {
                    deferred = Some(
                        anyhow::Error::new(err).context(format!("release swapchain image of view {}", index)),
                    );
                    should_render = false;
                    outcome = CycleOutcome::RenderFailed { view: index };
                    break;
                }
                if let Err(err) = drawn {
                    log::warn!("view {} not rendered: {:#}", index, err);
                    self.stats.view_failures += 1;
                    should_render = false;
                    outcome = CycleOutcome::RenderFailed { view: index };
                    break;
                }
                rendered_views += 1;
            }
        }

        let mut layers = Vec::new();
        if let (true, Some(views)) = (should_render, located.as_ref()) {
            layers.push(ProjectionLayer {
                space,
                views: resources
                    .swapchains
                    .iter()
                    .zip(&views.views)
                    .map(|(swapchain, view)| ProjectionView {
                        pose: view.pose,
                        fov: view.fov,
                        swapchain: swapchain.handle,
                        width: swapchain.width,
                        height: swapchain.height,
                    })
                    .collect(),
            });
            outcome = CycleOutcome::Submitted;
        }

        let layers_submitted = layers.len();
        let ended = runtime.end_frame(
            session,
            &FrameEndInfo {
                display_time,
                layers,
            },
        );

        if layers_submitted > 0 {
            self.stats.submitted += 1;
        } else {
            self.stats.skipped += 1;
        }

        if let Err(err) = ended {
            if let Some(pending) = deferred {
                log::error!("{:#}", pending);
            }
            return Err(anyhow::Error::new(err).context("end frame"));
        }
        if let Some(err) = deferred {
            return Err(err);
        }

        log::trace!(
            "frame {} at {}: {:?}, {} layer(s)",
            self.stats.cycles,
            display_time,
            outcome,
            layers_submitted
        );
        Ok(CycleReport {
            display_time,
            should_render,
            rendered_views,
            layers_submitted,
            outcome,
        })
    }

    /// Wait for, render, validate, upload and mirror one acquired view image.
    ///
    /// The caller releases the image whether or not this succeeds.
    fn render_view(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        index: usize,
        image_index: u32,
        swapchain: &ViewSwapchain,
        view: &View,
        targets: &mut RenderTargets<'_>,
    ) -> Result<()> {
        runtime
            .wait_swapchain_image(swapchain.handle, self.config.swapchain_wait_timeout)
            .context("wait swapchain image")?;
        let target = swapchain
            .image(image_index)
            .ok_or_else(|| anyhow!("swapchain image index {} out of range", image_index))?;

        let camera_to_world = targets.mapper.camera_to_world();
        let render_pose = pose::render_pose(&view.pose, &camera_to_world);
        let mut buffer = targets
            .mapper
            .render_from_pose(&render_pose, swapchain.width, swapchain.height, self.config.high_quality)
            .context("render from pose")?;

        if !buffer.matches(swapchain.width, swapchain.height) {
            return Err(anyhow!(
                "rendered {}x{}, swapchain is {}x{}",
                buffer.width(),
                buffer.height(),
                swapchain.width,
                swapchain.height
            ));
        }

        prepare_for_display(&mut buffer);
        targets
            .uploader
            .upload(target, &buffer)
            .context("upload to swapchain image")?;

        if let Some(preview) = targets.preview.as_deref_mut() {
            let dst = mirror_rect(index, swapchain.width, swapchain.height);
            if let Err(err) = preview.present(index, &buffer, dst) {
                self.stats.preview_failures += 1;
                log::warn!("preview mirror of view {} failed: {:#}", index, err);
            }
        }
        Ok(())
    }
}
