//! In-process collaborators for demos and tests.
//!
//! None of these talk to hardware: the compositor runtime, mapping engine and
//! tracking engine are all simulated so the full session loop can run
//! headless.

pub mod compositor;
pub mod mapper;
pub mod tracker;

pub use compositor::{CompositorStats, SyntheticCompositor, SyntheticCompositorConfig};
pub use mapper::{MemoryUploader, SyntheticMapper};
pub use tracker::{SyntheticTracker, TRAJECTORY_FILE};
