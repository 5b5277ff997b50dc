//! RGB-D frame ingestion.
//!
//! This module moves color/depth frames from a network publisher to the
//! tracking engine:
//! - `transport`: message sources (ZeroMQ SUB, synthetic `stub://`)
//! - `decode`: bytes to rasters via the `image` crate
//! - `pipeline`: producer and consumer threads around `FrameQueue`
//! - `latency`: per-call tracking latency and its `TrackingTime.txt` export
//!
//! Ingest failures are local: a pair that fails to decode is dropped, and
//! queue overflow is steady-state behaviour rather than an error.

pub mod decode;
pub mod latency;
pub mod pipeline;
pub mod transport;
#[cfg(feature = "transport-zmq")]
pub mod zmq;

pub use decode::{FrameDecoder, ImageDecoder};
pub use latency::{LatencyLog, TRACKING_TIME_FILE};
pub use pipeline::{
    ImuSample, IngestConfig, IngestHandle, IngestPipeline, IngestReport, IngestStats, TrackingEngine,
};
pub use transport::{open_transport, recv_pair, FrameTransport, SyntheticTransport, TransportConfig};
#[cfg(feature = "transport-zmq")]
pub use zmq::ZmqTransport;
