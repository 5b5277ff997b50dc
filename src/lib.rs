//! XR Mapping Bridge
//!
//! Streams live RGB-D frames into a tracking/mapping engine and presents the
//! engine's reconstruction on a stereo headset through a compositor runtime.
//!
//! # Architecture
//!
//! Two lines of execution run side by side:
//!
//! 1. **Ingest**: a producer thread receives color/depth messages, decodes
//!    them and pushes pairs into a bounded drop-oldest queue; a consumer
//!    thread pops pairs and feeds the tracking engine.
//! 2. **Session**: the main thread pumps compositor events through the
//!    session state machine and, while the session is renderable, runs one
//!    frame cycle per displayed frame.
//!
//! The compositor, mapping engine, tracking engine and transport are
//! collaborators behind traits; `synthetic` provides in-process versions.
//!
//! # Module Structure
//!
//! - `frame`: `SensorFramePair`, `FrameQueue`
//! - `ingest`: transports, decoding, producer/consumer pipeline
//! - `pose`: compositor-to-engine pose conversion
//! - `render`: mapping-engine interface and rendered-buffer handling
//! - `preview`: local side-by-side mirror surface
//! - `xr`: runtime capability trait, state machine, events, frame cycle, app
//! - `config`: JSON file + environment configuration
//! - `synthetic`: headless compositor, mapper and tracker

pub mod config;
pub mod frame;
pub mod ingest;
pub mod pose;
pub mod preview;
pub mod render;
pub mod synthetic;
pub mod xr;

pub use config::BridgeConfig;
pub use frame::{DepthImage, FrameQueue, QueueStats, SensorFramePair, DEFAULT_QUEUE_CAPACITY};
pub use ingest::{
    open_transport, FrameDecoder, FrameTransport, ImageDecoder, IngestConfig, IngestHandle,
    IngestPipeline, IngestReport, TrackingEngine,
};
pub use pose::{device_to_engine, render_pose, DevicePose};
pub use preview::MirrorCanvas;
pub use render::{ColorBuffer, ImageUploader, MappingEngine, PreviewSurface, ViewCamera};
pub use xr::{
    CompositorRuntime, EventDispatcher, FrameCycleController, RenderTargets, SessionState,
    SessionStateMachine, XrApp, XrAppConfig,
};
