//! In-process compositor runtime.
//!
//! Walks the session through READY, SYNCHRONIZED, VISIBLE and FOCUSED, runs
//! frame cycles at a nominal 90 Hz, and after a configured number of frames
//! (or an exit request) goes STOPPING then EXITING. Protocol misuse, such as
//! destroying a handle twice or releasing an image that was never acquired,
//! is reported as an `XrError`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::pose::DevicePose;
use crate::xr::runtime::{
    CompositorRuntime, ExtensionProperties, FormFactor, FrameEndInfo, FrameState, Fov, InstanceHandle,
    LocatedViews, ReferenceSpaceType, SessionHandle, SpaceHandle, SwapchainCreateInfo, SwapchainHandle,
    SwapchainImage, SystemId, View, ViewConfigView, ViewConfigurationType, ViewStateFlags, XrError,
    XrResult, PREFERRED_SWAPCHAIN_FORMAT,
};
use crate::xr::state::{SessionEvent, SessionState};

/// Nanoseconds between predicted display times (90 Hz).
const FRAME_PERIOD_NS: i64 = 11_111_111;
const IMAGES_PER_SWAPCHAIN: u32 = 3;
const HALF_IPD: f32 = 0.032;

#[derive(Clone, Debug)]
pub struct SyntheticCompositorConfig {
    pub view_count: usize,
    pub width: u32,
    pub height: u32,
    /// Frames to run before the runtime stops the session. `None` runs until exit is requested.
    pub frames_before_exit: Option<u64>,
    /// Simulated frame pacing; zero returns from `wait_frame` immediately.
    pub frame_pacing: Duration,
}

impl Default for SyntheticCompositorConfig {
    fn default() -> Self {
        Self {
            view_count: 2,
            width: 640,
            height: 480,
            frames_before_exit: Some(300),
            frame_pacing: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub frames_waited: u64,
    pub frames_begun: u64,
    pub frames_ended: u64,
    pub layers_submitted: u64,
    pub images_acquired: u64,
    pub images_released: u64,
}

struct SwapchainSlot {
    images: u32,
    next_image: u32,
    acquired: Option<u32>,
}

pub struct SyntheticCompositor {
    config: SyntheticCompositorConfig,
    next_handle: u64,
    instance: Option<InstanceHandle>,
    session: Option<SessionHandle>,
    session_running: bool,
    stop_requested: bool,
    spaces: HashSet<SpaceHandle>,
    swapchains: HashMap<SwapchainHandle, SwapchainSlot>,
    events: VecDeque<SessionEvent>,
    frame_open: bool,
    display_time: i64,
    stats: CompositorStats,
}

impl SyntheticCompositor {
    pub fn new(config: SyntheticCompositorConfig) -> Self {
        Self {
            config,
            next_handle: 1,
            instance: None,
            session: None,
            session_running: false,
            stop_requested: false,
            spaces: HashSet::new(),
            swapchains: HashMap::new(),
            events: VecDeque::new(),
            frame_open: false,
            display_time: 0,
            stats: CompositorStats::default(),
        }
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn check_session(&self, call: &'static str, session: SessionHandle) -> XrResult<()> {
        if self.session == Some(session) {
            Ok(())
        } else {
            Err(XrError::new(call, "XR_ERROR_HANDLE_INVALID"))
        }
    }

    fn request_stop(&mut self) {
        if !self.stop_requested {
            self.stop_requested = true;
            self.events
                .push_back(SessionEvent::StateChanged(SessionState::Stopping));
        }
    }

    /// Head bobbing slowly in a circle, views offset by half the IPD.
    fn head_pose(&self, display_time: i64, view: usize) -> DevicePose {
        let t = display_time as f32 * 1e-9;
        let eye = if view == 0 { -HALF_IPD } else { HALF_IPD };
        let yaw = (t * 0.5).sin() * 0.2;
        let half = yaw / 2.0;
        DevicePose::from_components(
            [eye + 0.05 * t.cos(), 1.6, 0.05 * t.sin()],
            [0.0, half.sin(), 0.0, half.cos()],
        )
    }
}

impl CompositorRuntime for SyntheticCompositor {
    fn enumerate_extensions(&mut self) -> XrResult<Vec<ExtensionProperties>> {
        Ok(vec![
            ExtensionProperties {
                name: "XR_KHR_opengl_enable".to_string(),
                version: 10,
            },
            ExtensionProperties {
                name: "XR_EXT_debug_utils".to_string(),
                version: 5,
            },
        ])
    }

    fn create_instance(&mut self, app_name: &str, _extensions: &[String]) -> XrResult<InstanceHandle> {
        if self.instance.is_some() {
            return Err(XrError::new("xrCreateInstance", "XR_ERROR_LIMIT_REACHED"));
        }
        let instance = InstanceHandle(self.next_handle());
        log::debug!("synthetic compositor: instance for {}", app_name);
        self.instance = Some(instance);
        Ok(instance)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> XrResult<()> {
        if self.instance != Some(instance) {
            return Err(XrError::new("xrDestroyInstance", "XR_ERROR_HANDLE_INVALID"));
        }
        self.instance = None;
        Ok(())
    }

    fn get_system(&mut self, instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId> {
        if self.instance != Some(instance) {
            return Err(XrError::new("xrGetSystem", "XR_ERROR_HANDLE_INVALID"));
        }
        match form_factor {
            FormFactor::HeadMountedDisplay => Ok(SystemId(1)),
            FormFactor::HandheldDisplay => Err(XrError::new("xrGetSystem", "XR_ERROR_FORM_FACTOR_UNSUPPORTED")),
        }
    }

    fn enumerate_view_configuration_views(
        &mut self,
        _instance: InstanceHandle,
        _system: SystemId,
        view_type: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigView>> {
        let count = match view_type {
            ViewConfigurationType::PrimaryMono => 1,
            ViewConfigurationType::PrimaryStereo => self.config.view_count,
        };
        let view = ViewConfigView {
            recommended_width: self.config.width,
            recommended_height: self.config.height,
            max_width: self.config.width * 2,
            max_height: self.config.height * 2,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        Ok(vec![view; count])
    }

    fn create_session(&mut self, instance: InstanceHandle, _system: SystemId) -> XrResult<SessionHandle> {
        if self.instance != Some(instance) {
            return Err(XrError::new("xrCreateSession", "XR_ERROR_HANDLE_INVALID"));
        }
        let session = SessionHandle(self.next_handle());
        self.session = Some(session);
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Idle));
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Ready));
        Ok(session)
    }

    fn destroy_session(&mut self, session: SessionHandle) -> XrResult<()> {
        self.check_session("xrDestroySession", session)?;
        if !self.swapchains.is_empty() || !self.spaces.is_empty() {
            return Err(XrError::new(
                "xrDestroySession",
                "session still owns swapchains or spaces",
            ));
        }
        self.session = None;
        self.session_running = false;
        Ok(())
    }

    fn begin_session(&mut self, session: SessionHandle, _view_type: ViewConfigurationType) -> XrResult<()> {
        self.check_session("xrBeginSession", session)?;
        if self.session_running {
            return Err(XrError::new("xrBeginSession", "XR_ERROR_SESSION_RUNNING"));
        }
        self.session_running = true;
        for state in [SessionState::Synchronized, SessionState::Visible, SessionState::Focused] {
            self.events.push_back(SessionEvent::StateChanged(state));
        }
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> XrResult<()> {
        self.check_session("xrEndSession", session)?;
        if !self.session_running {
            return Err(XrError::new("xrEndSession", "XR_ERROR_SESSION_NOT_RUNNING"));
        }
        self.session_running = false;
        self.events.push_back(SessionEvent::StateChanged(SessionState::Idle));
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Exiting));
        Ok(())
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> XrResult<()> {
        self.check_session("xrRequestExitSession", session)?;
        if !self.session_running {
            return Err(XrError::new("xrRequestExitSession", "XR_ERROR_SESSION_NOT_RUNNING"));
        }
        self.request_stop();
        Ok(())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        _space_type: ReferenceSpaceType,
    ) -> XrResult<SpaceHandle> {
        self.check_session("xrCreateReferenceSpace", session)?;
        let space = SpaceHandle(self.next_handle());
        self.spaces.insert(space);
        Ok(space)
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> XrResult<()> {
        if !self.spaces.remove(&space) {
            return Err(XrError::new("xrDestroySpace", "XR_ERROR_HANDLE_INVALID"));
        }
        Ok(())
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> XrResult<Vec<i64>> {
        self.check_session("xrEnumerateSwapchainFormats", session)?;
        // GL_RGBA8, GL_SRGB8_ALPHA8, GL_RGBA16F
        Ok(vec![0x8058, PREFERRED_SWAPCHAIN_FORMAT, 0x881A])
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        self.check_session("xrCreateSwapchain", session)?;
        if info.width == 0 || info.height == 0 {
            return Err(XrError::new("xrCreateSwapchain", "XR_ERROR_SWAPCHAIN_RECT_INVALID"));
        }
        let handle = SwapchainHandle(self.next_handle());
        self.swapchains.insert(
            handle,
            SwapchainSlot {
                images: IMAGES_PER_SWAPCHAIN,
                next_image: 0,
                acquired: None,
            },
        );
        Ok(handle)
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> XrResult<Vec<SwapchainImage>> {
        let slot = self
            .swapchains
            .get(&swapchain)
            .ok_or_else(|| XrError::new("xrEnumerateSwapchainImages", "XR_ERROR_HANDLE_INVALID"))?;
        Ok((0..slot.images)
            .map(|index| SwapchainImage {
                swapchain,
                index,
                texture: (swapchain.0 as u32) * 16 + index,
            })
            .collect())
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        self.swapchains
            .remove(&swapchain)
            .map(|_| ())
            .ok_or_else(|| XrError::new("xrDestroySwapchain", "XR_ERROR_HANDLE_INVALID"))
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> XrResult<Option<SessionEvent>> {
        if self.instance != Some(instance) {
            return Err(XrError::new("xrPollEvent", "XR_ERROR_HANDLE_INVALID"));
        }
        Ok(self.events.pop_front())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> XrResult<FrameState> {
        self.check_session("xrWaitFrame", session)?;
        if !self.session_running {
            return Err(XrError::new("xrWaitFrame", "XR_ERROR_SESSION_NOT_RUNNING"));
        }
        if !self.config.frame_pacing.is_zero() {
            std::thread::sleep(self.config.frame_pacing);
        }
        self.stats.frames_waited += 1;
        self.display_time += FRAME_PERIOD_NS;
        if let Some(limit) = self.config.frames_before_exit {
            if self.stats.frames_waited >= limit {
                self.request_stop();
            }
        }
        Ok(FrameState {
            predicted_display_time: self.display_time,
            should_render: !self.stop_requested,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> XrResult<()> {
        self.check_session("xrBeginFrame", session)?;
        if self.frame_open {
            return Err(XrError::new("xrBeginFrame", "XR_FRAME_DISCARDED"));
        }
        self.frame_open = true;
        self.stats.frames_begun += 1;
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_type: ViewConfigurationType,
        display_time: i64,
        _space: SpaceHandle,
    ) -> XrResult<LocatedViews> {
        self.check_session("xrLocateViews", session)?;
        let count = match view_type {
            ViewConfigurationType::PrimaryMono => 1,
            ViewConfigurationType::PrimaryStereo => self.config.view_count,
        };
        let fov = Fov {
            angle_left: -0.785,
            angle_right: 0.785,
            angle_up: 0.698,
            angle_down: -0.698,
        };
        Ok(LocatedViews {
            flags: ViewStateFlags::valid(),
            views: (0..count)
                .map(|view| View {
                    pose: self.head_pose(display_time, view),
                    fov,
                })
                .collect(),
        })
    }

    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo) -> XrResult<()> {
        self.check_session("xrEndFrame", session)?;
        if !self.frame_open {
            return Err(XrError::new("xrEndFrame", "XR_ERROR_CALL_ORDER_INVALID"));
        }
        if self.swapchains.values().any(|slot| slot.acquired.is_some()) {
            return Err(XrError::new("xrEndFrame", "swapchain image still acquired"));
        }
        self.frame_open = false;
        self.stats.frames_ended += 1;
        self.stats.layers_submitted += info.layers.len() as u64;
        Ok(())
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<u32> {
        let slot = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| XrError::new("xrAcquireSwapchainImage", "XR_ERROR_HANDLE_INVALID"))?;
        if slot.acquired.is_some() {
            return Err(XrError::new("xrAcquireSwapchainImage", "XR_ERROR_CALL_ORDER_INVALID"));
        }
        let index = slot.next_image;
        slot.next_image = (slot.next_image + 1) % slot.images;
        slot.acquired = Some(index);
        self.stats.images_acquired += 1;
        Ok(index)
    }

    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, _timeout: Option<Duration>) -> XrResult<()> {
        match self.swapchains.get(&swapchain) {
            Some(slot) if slot.acquired.is_some() => Ok(()),
            Some(_) => Err(XrError::new("xrWaitSwapchainImage", "XR_ERROR_CALL_ORDER_INVALID")),
            None => Err(XrError::new("xrWaitSwapchainImage", "XR_ERROR_HANDLE_INVALID")),
        }
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        let slot = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| XrError::new("xrReleaseSwapchainImage", "XR_ERROR_HANDLE_INVALID"))?;
        if slot.acquired.take().is_none() {
            return Err(XrError::new("xrReleaseSwapchainImage", "XR_ERROR_CALL_ORDER_INVALID"));
        }
        self.stats.images_released += 1;
        Ok(())
    }
}
