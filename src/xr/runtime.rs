//! Compositor runtime capability set.
//!
//! Every runtime entry point the session needs is a method on
//! `CompositorRuntime`. The object is constructed once and passed explicitly;
//! nothing is loaded into process-wide tables. Handles are small copyable
//! newtypes; their lifetimes are owned by `XrResources`.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::pose::DevicePose;
use crate::xr::state::SessionEvent;

/// Failure reported by a runtime call, with the runtime's own description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XrError {
    pub call: &'static str,
    pub description: String,
}

impl XrError {
    pub fn new(call: &'static str, description: impl Into<String>) -> Self {
        Self {
            call,
            description: description.into(),
        }
    }
}

impl fmt::Display for XrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.call, self.description)
    }
}

impl std::error::Error for XrError {}

pub type XrResult<T> = std::result::Result<T, XrError>;

macro_rules! handle_type {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                }
            }
        )*
    };
}

handle_type!(
    /// Runtime instance.
    InstanceHandle,
    /// System (device) selected for a form factor.
    SystemId,
    /// Rendering session.
    SessionHandle,
    /// Reference space poses are located in.
    SpaceHandle,
    /// Per-view rotating image set.
    SwapchainHandle,
);

/// Preferred swapchain format (GL_SRGB8_ALPHA8).
pub const PREFERRED_SWAPCHAIN_FORMAT: i64 = 0x8C43;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormFactor {
    HeadMountedDisplay,
    HandheldDisplay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewConfigurationType {
    PrimaryMono,
    PrimaryStereo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpaceType {
    View,
    Local,
    Stage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionProperties {
    pub name: String,
    pub version: u32,
}

/// Recommended and maximum per-view image configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewConfigView {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub format: i64,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

/// One image of a swapchain, identified by its graphics-API texture name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    pub swapchain: SwapchainHandle,
    pub index: u32,
    pub texture: u32,
}

/// Per-cycle frame timing. Never persisted across cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    pub predicted_display_time: i64,
    pub should_render: bool,
}

/// Field of view angles in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self {
            angle_left: -horizontal / 2.0,
            angle_right: horizontal / 2.0,
            angle_up: vertical / 2.0,
            angle_down: -vertical / 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct View {
    pub pose: DevicePose,
    pub fov: Fov,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewStateFlags {
    pub position_valid: bool,
    pub orientation_valid: bool,
}

impl ViewStateFlags {
    pub fn valid() -> Self {
        Self {
            position_valid: true,
            orientation_valid: true,
        }
    }

    pub fn pose_valid(&self) -> bool {
        self.position_valid && self.orientation_valid
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocatedViews {
    pub flags: ViewStateFlags,
    pub views: Vec<View>,
}

/// Sub-image of one view in a projection layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionView {
    pub pose: DevicePose,
    pub fov: Fov,
    pub swapchain: SwapchainHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

/// End-of-frame submission. `layers` holds zero or one projection layer.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameEndInfo {
    pub display_time: i64,
    pub layers: Vec<ProjectionLayer>,
}

/// The compositor runtime as seen by the session.
///
/// All calls are blocking. Implementations must report failures as `XrError`
/// rather than panicking.
pub trait CompositorRuntime {
    fn enumerate_extensions(&mut self) -> XrResult<Vec<ExtensionProperties>>;
    fn create_instance(&mut self, app_name: &str, extensions: &[String]) -> XrResult<InstanceHandle>;
    fn destroy_instance(&mut self, instance: InstanceHandle) -> XrResult<()>;
    fn get_system(&mut self, instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId>;
    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_type: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigView>>;

    fn create_session(&mut self, instance: InstanceHandle, system: SystemId) -> XrResult<SessionHandle>;
    fn destroy_session(&mut self, session: SessionHandle) -> XrResult<()>;
    fn begin_session(&mut self, session: SessionHandle, view_type: ViewConfigurationType) -> XrResult<()>;
    fn end_session(&mut self, session: SessionHandle) -> XrResult<()>;
    fn request_exit_session(&mut self, session: SessionHandle) -> XrResult<()>;

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
    ) -> XrResult<SpaceHandle>;
    fn destroy_space(&mut self, space: SpaceHandle) -> XrResult<()>;

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> XrResult<Vec<i64>>;
    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle>;
    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> XrResult<Vec<SwapchainImage>>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> XrResult<()>;

    /// Poll one event. `Ok(None)` means no event is available.
    fn poll_event(&mut self, instance: InstanceHandle) -> XrResult<Option<SessionEvent>>;

    fn wait_frame(&mut self, session: SessionHandle) -> XrResult<FrameState>;
    fn begin_frame(&mut self, session: SessionHandle) -> XrResult<()>;
    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_type: ViewConfigurationType,
        display_time: i64,
        space: SpaceHandle,
    ) -> XrResult<LocatedViews>;
    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo) -> XrResult<()>;

    /// Acquire the next image of `swapchain`, returning its index.
    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<u32>;
    /// Wait until the acquired image is writable. `None` waits indefinitely.
    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, timeout: Option<Duration>) -> XrResult<()>;
    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<()>;
}

/// Pick `preferred` if the runtime supports it, else fall back to the first format.
pub fn choose_swapchain_format(formats: &[i64], preferred: i64) -> Option<i64> {
    if formats.contains(&preferred) {
        return Some(preferred);
    }
    formats.first().copied()
}
