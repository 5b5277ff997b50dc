//! Compositor session: runtime capability set, lifecycle state machine,
//! event dispatch, frame cycle and ordered resource teardown.

pub mod app;
pub mod events;
pub mod frame_cycle;
pub mod resources;
pub mod runtime;
pub mod state;

pub use app::{RunSummary, XrApp, XrAppConfig};
pub use events::{ChannelInput, CtrlcInput, EventDispatcher, PlatformInput, PlatformSignal};
pub use frame_cycle::{CycleOutcome, CycleReport, FrameCycleConfig, FrameCycleController, RenderTargets};
pub use resources::{ViewSwapchain, XrResources};
pub use runtime::{
    CompositorRuntime, Fov, FrameState, LocatedViews, SwapchainImage, View, ViewStateFlags, XrError,
    XrResult,
};
pub use state::{SessionEvent, SessionState, SessionStateMachine};
