#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use nalgebra::Isometry3;

use xr_mapping_bridge::pose::DevicePose;
use xr_mapping_bridge::render::{ColorBuffer, ImageUploader, MappingEngine, MirrorRect, PreviewSurface, ViewCamera};
use xr_mapping_bridge::xr::runtime::{
    CompositorRuntime, ExtensionProperties, FormFactor, FrameEndInfo, FrameState, Fov, InstanceHandle,
    LocatedViews, ReferenceSpaceType, SessionHandle, SpaceHandle, SwapchainCreateInfo, SwapchainHandle,
    SwapchainImage, SystemId, View, ViewConfigView, ViewConfigurationType, ViewStateFlags, XrError,
    XrResult,
};
use xr_mapping_bridge::xr::{SessionEvent, SessionState};

pub const VIEW_WIDTH: u32 = 8;
pub const VIEW_HEIGHT: u32 = 6;

// ----------------------------------------------------------------------------
// Recording compositor runtime
// ----------------------------------------------------------------------------

/// Every call the fake runtime received, by name, in order.
#[derive(Default)]
pub struct Script {
    pub calls: Vec<&'static str>,
    pub events: VecDeque<SessionEvent>,
    pub failing: HashSet<&'static str>,
    pub should_render: bool,
    pub flags: ViewStateFlags,
    pub located_views: usize,
    pub view_count: usize,
    pub layer_counts: Vec<usize>,
    pub poll_error: bool,
}

/// Fake compositor. Clones share one script, so a test can keep a handle
/// while the app owns the runtime.
#[derive(Clone)]
pub struct FakeRuntime {
    script: Rc<RefCell<Script>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            script: Rc::new(RefCell::new(Script {
                should_render: true,
                flags: ViewStateFlags::valid(),
                located_views: 2,
                view_count: 2,
                ..Script::default()
            })),
        }
    }

    pub fn script(&self) -> std::cell::RefMut<'_, Script> {
        self.script.borrow_mut()
    }

    pub fn fail(&self, call: &'static str) {
        self.script().failing.insert(call);
    }

    pub fn heal(&self, call: &'static str) {
        self.script().failing.remove(call);
    }

    pub fn push_state(&self, state: SessionState) {
        self.script().events.push_back(SessionEvent::StateChanged(state));
    }

    pub fn push_event(&self, event: SessionEvent) {
        self.script().events.push_back(event);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.script.borrow().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.script.borrow().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    pub fn layer_counts(&self) -> Vec<usize> {
        self.script.borrow().layer_counts.clone()
    }

    /// Record `call`, failing if it was scripted to fail.
    fn enter(&self, call: &'static str) -> XrResult<()> {
        let mut script = self.script.borrow_mut();
        script.calls.push(call);
        if script.failing.contains(call) {
            return Err(XrError::new(call, "XR_ERROR_RUNTIME_FAILURE"));
        }
        Ok(())
    }
}

impl CompositorRuntime for FakeRuntime {
    fn enumerate_extensions(&mut self) -> XrResult<Vec<ExtensionProperties>> {
        self.enter("enumerate_extensions")?;
        Ok(vec![ExtensionProperties {
            name: "XR_KHR_opengl_enable".to_string(),
            version: 10,
        }])
    }

    fn create_instance(&mut self, _app_name: &str, _extensions: &[String]) -> XrResult<InstanceHandle> {
        self.enter("create_instance")?;
        Ok(InstanceHandle(1))
    }

    fn destroy_instance(&mut self, _instance: InstanceHandle) -> XrResult<()> {
        self.enter("destroy_instance")
    }

    fn get_system(&mut self, _instance: InstanceHandle, _form_factor: FormFactor) -> XrResult<SystemId> {
        self.enter("get_system")?;
        Ok(SystemId(2))
    }

    fn enumerate_view_configuration_views(
        &mut self,
        _instance: InstanceHandle,
        _system: SystemId,
        _view_type: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigView>> {
        self.enter("enumerate_view_configuration_views")?;
        let count = self.script.borrow().view_count;
        Ok(vec![
            ViewConfigView {
                recommended_width: VIEW_WIDTH,
                recommended_height: VIEW_HEIGHT,
                max_width: VIEW_WIDTH,
                max_height: VIEW_HEIGHT,
                recommended_sample_count: 1,
                max_sample_count: 1,
            };
            count
        ])
    }

    fn create_session(&mut self, _instance: InstanceHandle, _system: SystemId) -> XrResult<SessionHandle> {
        self.enter("create_session")?;
        Ok(SessionHandle(3))
    }

    fn destroy_session(&mut self, _session: SessionHandle) -> XrResult<()> {
        self.enter("destroy_session")
    }

    fn begin_session(&mut self, _session: SessionHandle, _view_type: ViewConfigurationType) -> XrResult<()> {
        self.enter("begin_session")
    }

    fn end_session(&mut self, _session: SessionHandle) -> XrResult<()> {
        self.enter("end_session")
    }

    fn request_exit_session(&mut self, _session: SessionHandle) -> XrResult<()> {
        self.enter("request_exit_session")
    }

    fn create_reference_space(
        &mut self,
        _session: SessionHandle,
        _space_type: ReferenceSpaceType,
    ) -> XrResult<SpaceHandle> {
        self.enter("create_reference_space")?;
        Ok(SpaceHandle(4))
    }

    fn destroy_space(&mut self, _space: SpaceHandle) -> XrResult<()> {
        self.enter("destroy_space")
    }

    fn enumerate_swapchain_formats(&mut self, _session: SessionHandle) -> XrResult<Vec<i64>> {
        self.enter("enumerate_swapchain_formats")?;
        Ok(vec![0x8C43])
    }

    fn create_swapchain(
        &mut self,
        _session: SessionHandle,
        _info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        self.enter("create_swapchain")?;
        let n = self.count("create_swapchain") as u64;
        Ok(SwapchainHandle(100 + n))
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> XrResult<Vec<SwapchainImage>> {
        self.enter("enumerate_swapchain_images")?;
        Ok((0..3)
            .map(|index| SwapchainImage {
                swapchain,
                index,
                texture: swapchain.0 as u32 * 10 + index,
            })
            .collect())
    }

    fn destroy_swapchain(&mut self, _swapchain: SwapchainHandle) -> XrResult<()> {
        self.enter("destroy_swapchain")
    }

    fn poll_event(&mut self, _instance: InstanceHandle) -> XrResult<Option<SessionEvent>> {
        // Polls are not recorded; they would swamp the call log.
        let mut script = self.script.borrow_mut();
        if script.poll_error {
            return Err(XrError::new("poll_event", "XR_ERROR_INSTANCE_LOST"));
        }
        Ok(script.events.pop_front())
    }

    fn wait_frame(&mut self, _session: SessionHandle) -> XrResult<FrameState> {
        self.enter("wait_frame")?;
        let script = self.script.borrow();
        Ok(FrameState {
            predicted_display_time: 1_000 * script.calls.len() as i64,
            should_render: script.should_render,
        })
    }

    fn begin_frame(&mut self, _session: SessionHandle) -> XrResult<()> {
        self.enter("begin_frame")
    }

    fn locate_views(
        &mut self,
        _session: SessionHandle,
        _view_type: ViewConfigurationType,
        _display_time: i64,
        _space: SpaceHandle,
    ) -> XrResult<LocatedViews> {
        self.enter("locate_views")?;
        let script = self.script.borrow();
        Ok(LocatedViews {
            flags: script.flags,
            views: (0..script.located_views)
                .map(|i| View {
                    pose: DevicePose::from_components([i as f32 * 0.064, 1.6, 0.0], [0.0, 0.0, 0.0, 1.0]),
                    fov: Fov::symmetric(1.6, 1.4),
                })
                .collect(),
        })
    }

    fn end_frame(&mut self, _session: SessionHandle, info: &FrameEndInfo) -> XrResult<()> {
        let result = self.enter("end_frame");
        self.script().layer_counts.push(info.layers.len());
        result
    }

    fn acquire_swapchain_image(&mut self, _swapchain: SwapchainHandle) -> XrResult<u32> {
        self.enter("acquire_swapchain_image")?;
        Ok(0)
    }

    fn wait_swapchain_image(&mut self, _swapchain: SwapchainHandle, _timeout: Option<Duration>) -> XrResult<()> {
        self.enter("wait_swapchain_image")
    }

    fn release_swapchain_image(&mut self, _swapchain: SwapchainHandle) -> XrResult<()> {
        self.enter("release_swapchain_image")
    }
}

/// Assert destroy calls respect swapchains, space, session, instance order.
pub fn assert_teardown_order(calls: &[&'static str]) {
    let last = |name: &str| calls.iter().rposition(|c| *c == name);
    let first = |name: &str| calls.iter().position(|c| *c == name);

    if let Some(session) = first("destroy_session") {
        if let Some(swapchain) = last("destroy_swapchain") {
            assert!(swapchain < session, "swapchain destroyed after session: {calls:?}");
        }
        if let Some(space) = last("destroy_space") {
            assert!(space < session, "space destroyed after session: {calls:?}");
        }
    }
    if let Some(instance) = first("destroy_instance") {
        if let Some(session) = last("destroy_session") {
            assert!(session < instance, "session destroyed after instance: {calls:?}");
        }
        if let Some(space) = last("destroy_space") {
            assert!(space < instance, "space destroyed after instance: {calls:?}");
        }
    }
    for name in ["destroy_swapchain", "destroy_space", "destroy_session", "destroy_instance"] {
        let expected_max = if name == "destroy_swapchain" { 2 } else { 1 };
        let n = calls.iter().filter(|c| **c == name).count();
        assert!(n <= expected_max, "{name} called {n} times: {calls:?}");
    }
}

// ----------------------------------------------------------------------------
// Mapping engine, uploader and preview fakes
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderBehavior {
    Ok,
    Fail,
    WrongShape,
}

pub struct FakeMapper {
    pub behaviors: Vec<RenderBehavior>,
    pub calls: usize,
    pub cameras: Vec<ViewCamera>,
    pub poses: Vec<Isometry3<f32>>,
}

impl FakeMapper {
    pub fn new() -> Self {
        Self::with_behaviors(vec![RenderBehavior::Ok, RenderBehavior::Ok])
    }

    /// Behaviour per view index, repeated every cycle.
    pub fn with_behaviors(behaviors: Vec<RenderBehavior>) -> Self {
        Self {
            behaviors,
            calls: 0,
            cameras: Vec::new(),
            poses: Vec::new(),
        }
    }
}

impl MappingEngine for FakeMapper {
    fn register_view_camera(&mut self, camera: &ViewCamera) -> Result<()> {
        self.cameras.push(camera.clone());
        Ok(())
    }

    fn camera_to_world(&self) -> Isometry3<f32> {
        Isometry3::identity()
    }

    fn render_from_pose(
        &mut self,
        pose: &Isometry3<f32>,
        width: u32,
        height: u32,
        _high_quality: bool,
    ) -> Result<ColorBuffer> {
        let view = self.calls % self.behaviors.len().max(1);
        self.calls += 1;
        self.poses.push(*pose);
        match self.behaviors.get(view).copied().unwrap_or(RenderBehavior::Ok) {
            RenderBehavior::Ok => Ok(ColorBuffer::new(width, height)),
            RenderBehavior::Fail => Err(anyhow!("renderer out of memory")),
            RenderBehavior::WrongShape => Ok(ColorBuffer::new(width / 2, height)),
        }
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Vec<u32>,
    pub fail: bool,
}

impl ImageUploader for FakeUploader {
    fn upload(&mut self, target: SwapchainImage, _buffer: &ColorBuffer) -> Result<()> {
        if self.fail {
            return Err(anyhow!("texture upload failed"));
        }
        self.uploads.push(target.texture);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePreview {
    pub presented: Vec<(usize, MirrorRect)>,
    pub fail: bool,
}

impl PreviewSurface for FakePreview {
    fn present(&mut self, view_index: usize, _buffer: &ColorBuffer, dst: MirrorRect) -> Result<()> {
        if self.fail {
            return Err(anyhow!("preview window closed"));
        }
        self.presented.push((view_index, dst));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

/// Handles as they stand once bootstrap has finished, for driving frame
/// cycles without an `XrApp`.
pub fn ready_resources(views: usize) -> xr_mapping_bridge::xr::XrResources {
    use xr_mapping_bridge::xr::{ViewSwapchain, XrResources};

    let mut resources = XrResources::new();
    resources.instance = Some(InstanceHandle(1));
    resources.system = Some(SystemId(2));
    resources.session = Some(SessionHandle(3));
    resources.space = Some(SpaceHandle(4));
    for v in 0..views {
        let handle = SwapchainHandle(101 + v as u64);
        resources.swapchains.push(ViewSwapchain {
            handle,
            images: (0..3)
                .map(|index| SwapchainImage {
                    swapchain: handle,
                    index,
                    texture: handle.0 as u32 * 10 + index,
                })
                .collect(),
            width: VIEW_WIDTH,
            height: VIEW_HEIGHT,
        });
    }
    resources
}
