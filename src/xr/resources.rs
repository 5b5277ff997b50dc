//! Owned compositor handles and their ordered teardown.
//!
//! Handles are held in `Option`s and taken on destroy, so each one is
//! released at most once no matter how many shutdown paths run. Destruction
//! always follows the dependency order:
//!
//! 1. swapchains
//! 2. reference space
//! 3. session
//! 4. instance
//!
//! Destroy failures are logged and the sequence continues.

use crate::xr::runtime::{
    CompositorRuntime, InstanceHandle, SessionHandle, SpaceHandle, SwapchainHandle, SwapchainImage,
    SystemId, ViewConfigView,
};

/// One rendered view's swapchain and its target images.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewSwapchain {
    pub handle: SwapchainHandle,
    pub images: Vec<SwapchainImage>,
    pub width: u32,
    pub height: u32,
}

impl ViewSwapchain {
    pub fn image(&self, index: u32) -> Option<SwapchainImage> {
        self.images.get(index as usize).copied()
    }
}

#[derive(Debug, Default)]
pub struct XrResources {
    pub instance: Option<InstanceHandle>,
    pub system: Option<SystemId>,
    pub view_configs: Vec<ViewConfigView>,
    pub session: Option<SessionHandle>,
    pub space: Option<SpaceHandle>,
    pub swapchains: Vec<ViewSwapchain>,
}

impl XrResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view_count(&self) -> usize {
        self.swapchains.len()
    }

    /// True once every handle has been released.
    pub fn is_torn_down(&self) -> bool {
        self.instance.is_none()
            && self.session.is_none()
            && self.space.is_none()
            && self.swapchains.is_empty()
    }

    /// Destroy swapchains, the reference space and the session. The instance survives.
    pub fn destroy_session_resources(&mut self, runtime: &mut dyn CompositorRuntime) {
        for swapchain in self.swapchains.drain(..) {
            if let Err(err) = runtime.destroy_swapchain(swapchain.handle) {
                log::warn!("destroy swapchain {}: {}", swapchain.handle, err);
            }
        }
        if let Some(space) = self.space.take() {
            if let Err(err) = runtime.destroy_space(space) {
                log::warn!("destroy space {}: {}", space, err);
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(err) = runtime.destroy_session(session) {
                log::warn!("destroy session {}: {}", session, err);
            }
        }
    }

    /// Release every handle in dependency order. Safe to call repeatedly.
    pub fn teardown(&mut self, runtime: &mut dyn CompositorRuntime) {
        if self.is_torn_down() {
            return;
        }
        self.destroy_session_resources(runtime);
        self.system = None;
        if let Some(instance) = self.instance.take() {
            if let Err(err) = runtime.destroy_instance(instance) {
                log::warn!("destroy instance {}: {}", instance, err);
            }
        }
        log::info!("compositor resources released");
    }
}
