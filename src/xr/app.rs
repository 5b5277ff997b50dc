//! Session bootstrap, main loop and ordered shutdown.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};

use crate::render::{MappingEngine, ViewCamera};
use crate::xr::events::{EventDispatcher, PlatformInput};
use crate::xr::frame_cycle::{CycleOutcome, CycleStats, FrameCycleConfig, FrameCycleController, RenderTargets};
use crate::xr::resources::{ViewSwapchain, XrResources};
use crate::xr::runtime::{
    choose_swapchain_format, CompositorRuntime, FormFactor, ReferenceSpaceType, SwapchainCreateInfo,
    PREFERRED_SWAPCHAIN_FORMAT,
};
use crate::xr::state::{SessionState, SessionStateMachine};

/// Sleep between event pumps while the frame cycle is disabled.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Camera id the XR view is registered under in the mapping engine.
pub const XR_VIEW_CAMERA_ID: u32 = 996;

#[derive(Clone, Debug, PartialEq)]
pub struct XrAppConfig {
    pub app_name: String,
    pub required_extension: String,
    pub form_factor: FormFactor,
    pub reference_space: ReferenceSpaceType,
    pub near_z: f32,
    pub far_z: f32,
    pub camera_id: u32,
    pub cycle: FrameCycleConfig,
}

impl Default for XrAppConfig {
    fn default() -> Self {
        Self {
            app_name: "xr-mapping-bridge".to_string(),
            required_extension: "XR_KHR_opengl_enable".to_string(),
            form_factor: FormFactor::HeadMountedDisplay,
            reference_space: ReferenceSpaceType::View,
            near_z: 0.01,
            far_z: 100.0,
            camera_id: XR_VIEW_CAMERA_ID,
            cycle: FrameCycleConfig::default(),
        }
    }
}

/// What the main loop did before it stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub final_state: SessionState,
    pub cycles: CycleStats,
    pub elapsed: Duration,
}

/// A compositor session driving the mapping engine's renderer.
///
/// Owns the runtime and every handle created through it. Handles are released
/// in dependency order by `shutdown`, which also runs on drop.
pub struct XrApp<R: CompositorRuntime> {
    runtime: R,
    config: XrAppConfig,
    resources: XrResources,
    machine: SessionStateMachine,
    dispatcher: EventDispatcher,
    controller: FrameCycleController,
    shut_down: bool,
}

impl<R: CompositorRuntime> XrApp<R> {
    /// Create instance, session, space and swapchains, then register the
    /// first view's camera with `mapper`.
    ///
    /// On failure every handle created so far is destroyed before returning.
    pub fn initialize(runtime: R, config: XrAppConfig, mapper: &mut dyn MappingEngine) -> Result<Self> {
        let mut app = Self {
            runtime,
            dispatcher: EventDispatcher::new(config.cycle.view_type),
            controller: FrameCycleController::new(config.cycle),
            config,
            resources: XrResources::new(),
            machine: SessionStateMachine::new(),
            shut_down: false,
        };
        if let Err(err) = app.bootstrap(mapper) {
            log::error!("compositor setup failed: {:#}", err);
            app.shutdown();
            return Err(err);
        }
        Ok(app)
    }

    fn bootstrap(&mut self, mapper: &mut dyn MappingEngine) -> Result<()> {
        let runtime = &mut self.runtime;
        let resources = &mut self.resources;
        let config = &self.config;
        let view_type = config.cycle.view_type;

        let extensions = runtime.enumerate_extensions().context("enumerate extensions")?;
        log::info!("compositor runtime offers {} extensions", extensions.len());
        for ext in &extensions {
            log::debug!("  {} (v{})", ext.name, ext.version);
        }
        if !extensions.iter().any(|ext| ext.name == config.required_extension) {
            bail!(
                "compositor runtime does not support {}",
                config.required_extension
            );
        }

        let instance = runtime
            .create_instance(&config.app_name, &[config.required_extension.clone()])
            .context("create instance")?;
        resources.instance = Some(instance);

        let system = runtime
            .get_system(instance, config.form_factor)
            .context("get system")?;
        resources.system = Some(system);

        let views = runtime
            .enumerate_view_configuration_views(instance, system, view_type)
            .context("enumerate view configuration views")?;
        if views.is_empty() {
            bail!("compositor reports no views for {:?}", view_type);
        }
        for (i, view) in views.iter().enumerate() {
            log::info!(
                "view {}: recommended {}x{} ({} samples), max {}x{}",
                i,
                view.recommended_width,
                view.recommended_height,
                view.recommended_sample_count,
                view.max_width,
                view.max_height
            );
        }
        resources.view_configs = views.clone();

        let session = runtime
            .create_session(instance, system)
            .context("create session")?;
        resources.session = Some(session);

        let space = runtime
            .create_reference_space(session, config.reference_space)
            .context("create reference space")?;
        resources.space = Some(space);

        let formats = runtime
            .enumerate_swapchain_formats(session)
            .context("enumerate swapchain formats")?;
        let format = choose_swapchain_format(&formats, PREFERRED_SWAPCHAIN_FORMAT)
            .ok_or_else(|| anyhow!("compositor offers no swapchain formats"))?;
        if format != PREFERRED_SWAPCHAIN_FORMAT {
            log::warn!(
                "preferred swapchain format {:#x} unsupported, using {:#x}",
                PREFERRED_SWAPCHAIN_FORMAT,
                format
            );
        }

        for view in &views {
            let info = SwapchainCreateInfo {
                format,
                width: view.recommended_width,
                height: view.recommended_height,
                sample_count: view.recommended_sample_count,
            };
            let handle = runtime
                .create_swapchain(session, &info)
                .context("create swapchain")?;
            resources.swapchains.push(ViewSwapchain {
                handle,
                images: Vec::new(),
                width: info.width,
                height: info.height,
            });
            let images = runtime
                .enumerate_swapchain_images(handle)
                .context("enumerate swapchain images")?;
            if images.is_empty() {
                bail!("swapchain {} has no images", handle);
            }
            if let Some(slot) = resources.swapchains.last_mut() {
                slot.images = images;
            }
        }

        let located = runtime
            .locate_views(session, view_type, 0, space)
            .context("initial locate views")?;
        let first = located
            .views
            .first()
            .ok_or_else(|| anyhow!("initial locate returned no views"))?;
        let camera = ViewCamera {
            camera_id: config.camera_id,
            width: resources.swapchains[0].width,
            height: resources.swapchains[0].height,
            near_z: config.near_z,
            far_z: config.far_z,
            fov: first.fov,
        };
        mapper
            .register_view_camera(&camera)
            .context("register view camera")?;

        log::info!(
            "compositor ready: {} views, format {:#x}, session {}",
            resources.swapchains.len(),
            format,
            session
        );
        Ok(())
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn resources(&self) -> &XrResources {
        &self.resources
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn quit_requested(&self) -> bool {
        self.machine.quit_requested()
    }

    /// Drive events and frame cycles until quit is requested.
    ///
    /// Quit is only checked between cycles. Returns `Err` on a fatal error,
    /// after the compositor handles have been released.
    pub fn run(
        &mut self,
        targets: &mut RenderTargets<'_>,
        input: &mut dyn PlatformInput,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let mut last_outcome: Option<CycleOutcome> = None;
        let mut fatal: Option<anyhow::Error> = None;

        while !self.machine.quit_requested() {
            if let Err(err) =
                self.dispatcher
                    .pump(&mut self.runtime, &mut self.resources, &mut self.machine, input)
            {
                self.machine.mark_fatal();
                fatal = Some(err);
                break;
            }
            if !self.machine.frame_cycle_enabled() {
                if !self.machine.quit_requested() {
                    thread::sleep(IDLE_POLL_INTERVAL);
                }
                continue;
            }
            match self
                .controller
                .run_cycle(&mut self.runtime, &self.resources, targets)
            {
                Ok(report) => {
                    if last_outcome.as_ref() != Some(&report.outcome) {
                        log::debug!("frame cycle outcome: {:?}", report.outcome);
                        last_outcome = Some(report.outcome);
                    }
                }
                Err(err) => {
                    self.machine.mark_fatal();
                    fatal = Some(err);
                    break;
                }
            }
        }

        self.shutdown();
        let summary = RunSummary {
            final_state: self.machine.state(),
            cycles: self.controller.stats(),
            elapsed: started.elapsed(),
        };
        log::info!(
            "session loop finished in {:?}: {} cycles, {} submitted, state {:?}",
            summary.elapsed,
            summary.cycles.cycles,
            summary.cycles.submitted,
            summary.final_state
        );
        match fatal {
            Some(err) => Err(err.context("compositor session aborted")),
            None => Ok(summary),
        }
    }

    /// End the session if it is running, then release every handle in
    /// dependency order. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if self.machine.is_running() {
            if let Some(session) = self.resources.session {
                if let Err(err) = self.runtime.end_session(session) {
                    log::warn!("end session during shutdown: {}", err);
                }
            }
        }
        self.resources.teardown(&mut self.runtime);
    }
}

impl<R: CompositorRuntime> Drop for XrApp<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
