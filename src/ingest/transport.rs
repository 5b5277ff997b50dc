//! Message transports for color/depth frames.
//!
//! A frame arrives as two discrete binary messages, color then depth, each an
//! encoded image. A transport only moves bytes; `recv_pair` groups them into
//! frames and decoding happens in the producer loop.
//!
//! Endpoints select the backend by scheme:
//! - `stub://<name>`: synthetic gradient frames, no network
//! - `tcp://`, `ipc://`: ZeroMQ SUB socket (feature: transport-zmq)

use std::io::Cursor;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::{ImageFormat, Luma, Rgb};

use crate::frame::DepthImage;

/// Receives one encoded image message at a time.
pub trait FrameTransport: Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout.
    fn recv_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    fn endpoint(&self) -> &str;
}

/// Receive one frame as its two messages, color then depth.
///
/// Pairing is positional: nothing on the wire identifies a frame, so the first
/// message after a completed pair is always taken as color. Timeouts are
/// retried while `keep_going` holds; `Ok(None)` means it stopped holding.
/// `on_message` runs once per received message, including a color message
/// whose depth never arrives. A transport error discards the partial pair.
pub fn recv_pair(
    transport: &mut dyn FrameTransport,
    timeout: Duration,
    mut keep_going: impl FnMut() -> bool,
    mut on_message: impl FnMut(),
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let Some(color) = recv_one(transport, timeout, &mut keep_going, &mut on_message)? else {
        return Ok(None);
    };
    let Some(depth) = recv_one(transport, timeout, &mut keep_going, &mut on_message)? else {
        return Ok(None);
    };
    Ok(Some((color, depth)))
}

fn recv_one(
    transport: &mut dyn FrameTransport,
    timeout: Duration,
    keep_going: &mut impl FnMut() -> bool,
    on_message: &mut impl FnMut(),
) -> Result<Option<Vec<u8>>> {
    while keep_going() {
        if let Some(bytes) = transport.recv_message(timeout)? {
            on_message();
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub endpoint: String,
    /// Frame rate of the synthetic backend.
    pub synthetic_fps: u32,
    /// Frame size of the synthetic backend.
    pub width: u32,
    pub height: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://localhost:5555".to_string(),
            synthetic_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Open the transport named by `config.endpoint`.
pub fn open_transport(config: &TransportConfig) -> Result<Box<dyn FrameTransport>> {
    if config.endpoint.starts_with("stub://") {
        return Ok(Box::new(SyntheticTransport::new(config.clone())));
    }
    #[cfg(feature = "transport-zmq")]
    {
        Ok(Box::new(crate::ingest::zmq::ZmqTransport::connect(&config.endpoint)?))
    }
    #[cfg(not(feature = "transport-zmq"))]
    {
        anyhow::bail!(
            "endpoint {} requires the transport-zmq feature",
            config.endpoint
        )
    }
}

// ----------------------------------------------------------------------------
// Synthetic transport (stub://)
// ----------------------------------------------------------------------------

/// Emits PNG-encoded gradient color and ramp depth frames at a fixed rate.
pub struct SyntheticTransport {
    config: TransportConfig,
    frame_count: u64,
    next_frame_at: Instant,
    pending_depth: Option<Vec<u8>>,
}

impl SyntheticTransport {
    pub fn new(config: TransportConfig) -> Self {
        log::info!("SyntheticTransport: streaming from {}", config.endpoint);
        Self {
            config,
            frame_count: 0,
            next_frame_at: Instant::now(),
            pending_depth: None,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frame_count
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.config.synthetic_fps.max(1)
    }

    fn encode_color(&self) -> Result<Vec<u8>> {
        let (w, h) = (self.config.width, self.config.height);
        let shift = (self.frame_count % 256) as u32;
        let img = image::RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                ((x * 255 / w.max(1) + shift) % 256) as u8,
                (y * 255 / h.max(1)) as u8,
                (shift * 3 % 256) as u8,
            ])
        });
        encode_png(|cursor| img.write_to(cursor, ImageFormat::Png))
    }

    fn encode_depth(&self) -> Result<Vec<u8>> {
        let (w, h) = (self.config.width, self.config.height);
        // Millimetres: a plane receding from 500 mm at the top to 4500 mm at the bottom.
        let img = DepthImage::from_fn(w, h, |_, y| Luma([(500 + y * 4000 / h.max(1)) as u16]));
        encode_png(|cursor| img.write_to(cursor, ImageFormat::Png))
    }
}

fn encode_png(
    write: impl FnOnce(&mut Cursor<Vec<u8>>) -> image::ImageResult<()>,
) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write(&mut cursor).context("encode synthetic frame")?;
    Ok(cursor.into_inner())
}

impl FrameTransport for SyntheticTransport {
    fn recv_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(depth) = self.pending_depth.take() {
            return Ok(Some(depth));
        }

        let now = Instant::now();
        if self.next_frame_at > now {
            let wait = self.next_frame_at - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        self.frame_count += 1;
        self.next_frame_at = Instant::now() + self.frame_interval();
        let color = self.encode_color()?;
        self.pending_depth = Some(self.encode_depth()?);
        Ok(Some(color))
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
