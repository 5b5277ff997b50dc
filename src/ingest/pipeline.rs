//! Producer/consumer loops around the frame queue.
//!
//! - producer thread: receive color then depth, decode both, push the pair
//! - consumer thread: pop, stamp the sequence index, scale, hand to the
//!   tracking engine, record latency
//!
//! The producer never sees consumer errors and is never blocked by the
//! consumer: a full queue evicts its oldest pair. Both threads observe a
//! shared cancellation flag and are joined by `IngestHandle::stop`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::frame::{DepthImage, FrameQueue, SensorFramePair, DEFAULT_QUEUE_CAPACITY};
use crate::ingest::decode::FrameDecoder;
use crate::ingest::latency::LatencyLog;
use crate::ingest::transport::{recv_pair, FrameTransport};

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Tracking engine collaborator
// ----------------------------------------------------------------------------

/// Inertial sample passed alongside frames. The RGB-D path always sends none.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    pub timestamp: f64,
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
}

/// Localization and mapping engine fed by the consumer thread.
///
/// Shared between the consumer and the owner, so methods take `&self`.
pub trait TrackingEngine: Send + Sync {
    /// Track one frame pair. `timestamp` is the pair's sequence index.
    fn track_rgbd(&self, color: &RgbImage, depth: &DepthImage, timestamp: f64, aux: &[ImuSample]);

    /// Factor frames are scaled by before tracking.
    fn image_scale(&self) -> f32 {
        1.0
    }

    /// Whether the engine has been asked to stop.
    fn is_shut_down(&self) -> bool;

    fn shutdown(&self);

    fn save_trajectories(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    /// Transport receive timeout; bounds how long cancellation takes to be seen.
    pub recv_timeout: Duration,
    pub pop_timeout: Duration,
    pub health_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            recv_timeout: Duration::from_millis(100),
            pop_timeout: Duration::from_millis(100),
            health_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    pairs_decoded: AtomicU64,
    decode_failures: AtomicU64,
    transport_errors: AtomicU64,
    tracked: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub messages_received: u64,
    pub pairs_decoded: u64,
    pub decode_failures: u64,
    pub transport_errors: u64,
    pub evicted: u64,
    pub tracked: u64,
    pub queued: usize,
}

struct Shared {
    queue: FrameQueue<SensorFramePair>,
    cancel: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn stats(&self) -> IngestStats {
        let queue = self.queue.stats();
        IngestStats {
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            pairs_decoded: self.counters.pairs_decoded.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            transport_errors: self.counters.transport_errors.load(Ordering::Relaxed),
            evicted: queue.evicted,
            tracked: self.counters.tracked.load(Ordering::Relaxed),
            queued: queue.len,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// What the pipeline did, returned once both threads have been joined.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestReport {
    pub stats: IngestStats,
    pub latency: LatencyLog,
}

pub struct IngestPipeline;

impl IngestPipeline {
    /// Start the producer and consumer threads.
    pub fn spawn(
        transport: Box<dyn FrameTransport>,
        decoder: Box<dyn FrameDecoder>,
        tracker: Arc<dyn TrackingEngine>,
        config: IngestConfig,
    ) -> Result<IngestHandle> {
        let shared = Arc::new(Shared {
            queue: FrameQueue::new(config.queue_capacity),
            cancel: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let producer = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("rgbd-producer".into())
                .spawn(move || run_producer(transport, decoder, &shared, &config))
                .context("spawn producer thread")?
        };

        let consumer = {
            let shared_consumer = shared.clone();
            let spawned = thread::Builder::new()
                .name("rgbd-consumer".into())
                .spawn(move || run_consumer(tracker, &shared_consumer, &config));
            match spawned {
                Ok(join) => join,
                Err(err) => {
                    shared.cancel.store(true, Ordering::SeqCst);
                    shared.queue.close();
                    let _ = producer.join();
                    return Err(anyhow!(err).context("spawn consumer thread"));
                }
            }
        };

        Ok(IngestHandle {
            shared,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }
}

/// Running pipeline. Dropping it cancels and joins both threads.
pub struct IngestHandle {
    shared: Arc<Shared>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<LatencyLog>>,
}

impl IngestHandle {
    pub fn stats(&self) -> IngestStats {
        self.shared.stats()
    }

    /// True once the consumer has exited (tracker shut down or cancelled).
    pub fn consumer_finished(&self) -> bool {
        self.consumer.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Cancel both threads, discard queued pairs and join.
    ///
    /// Consumes the handle, so a stopped pipeline cannot be queried again:
    ///
    /// ```compile_fail
    /// # fn check(handle: xr_mapping_bridge::IngestHandle) -> anyhow::Result<()> {
    /// let report = handle.stop()?;
    /// let _ = handle.stats();
    /// # Ok(())
    /// # }
    /// ```
    pub fn stop(mut self) -> Result<IngestReport> {
        self.cancel();
        if let Some(join) = self.producer.take() {
            join.join()
                .map_err(|_| anyhow!("ingest producer thread panicked"))?;
        }
        let latency = match self.consumer.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("ingest consumer thread panicked"))?,
            None => LatencyLog::new(),
        };
        let stats = self.shared.stats();
        log::info!(
            "ingest stopped: {} pairs decoded, {} tracked, {} evicted, {} decode failures",
            stats.pairs_decoded,
            stats.tracked,
            stats.evicted,
            stats.decode_failures
        );
        Ok(IngestReport { stats, latency })
    }

    fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.queue.close();
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        if self.producer.is_none() && self.consumer.is_none() {
            return;
        }
        self.cancel();
        if let Some(join) = self.producer.take() {
            let _ = join.join();
        }
        if let Some(join) = self.consumer.take() {
            let _ = join.join();
        }
    }
}

// ----------------------------------------------------------------------------
// Loops
// ----------------------------------------------------------------------------

fn run_producer(
    mut transport: Box<dyn FrameTransport>,
    decoder: Box<dyn FrameDecoder>,
    shared: &Shared,
    config: &IngestConfig,
) {
    log::info!(
        "producer: receiving from {}; color and depth are paired by arrival order",
        transport.endpoint()
    );

    while !shared.cancelled() {
        let received = recv_pair(
            transport.as_mut(),
            config.recv_timeout,
            || !shared.cancelled(),
            || {
                shared.counters.messages_received.fetch_add(1, Ordering::Relaxed);
            },
        );
        let (color, depth) = match received {
            Ok(Some(messages)) => messages,
            Ok(None) => break,
            Err(err) => {
                transport_error(shared, &err);
                continue;
            }
        };

        let pair = match (decoder.decode_color(&color), decoder.decode_depth(&depth)) {
            (Ok(color), Ok(depth)) => SensorFramePair::new(color, depth),
            (Err(err), _) | (_, Err(err)) => {
                shared.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping frame pair: {:#}", err);
                continue;
            }
        };
        shared.counters.pairs_decoded.fetch_add(1, Ordering::Relaxed);

        if shared.queue.push(pair).is_some() && shared.queue.is_closed() {
            break;
        }
    }
    log::debug!("producer: stopped");
}

fn transport_error(shared: &Shared, err: &anyhow::Error) {
    shared.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
    log::warn!("producer: receive failed: {:#}", err);
    thread::sleep(TRANSPORT_RETRY_DELAY);
}

fn run_consumer(tracker: Arc<dyn TrackingEngine>, shared: &Shared, config: &IngestConfig) -> LatencyLog {
    let mut latency = LatencyLog::new();
    let mut next_index: u64 = 0;
    let mut last_health = Instant::now();

    loop {
        if tracker.is_shut_down() {
            log::info!("consumer: tracking engine shut down");
            break;
        }
        if shared.cancelled() {
            break;
        }
        if last_health.elapsed() >= config.health_interval {
            last_health = Instant::now();
            let stats = shared.stats();
            log::info!(
                "ingest health: received={} decoded={} decode_failures={} evicted={} tracked={} queued={}",
                stats.messages_received,
                stats.pairs_decoded,
                stats.decode_failures,
                stats.evicted,
                stats.tracked,
                stats.queued
            );
        }

        let Some(mut pair) = shared.queue.pop_timeout(config.pop_timeout) else {
            if shared.queue.is_closed() {
                break;
            }
            continue;
        };
        pair.assign_sequence(next_index);
        let timestamp = next_index as f64;
        next_index += 1;
        log::trace!("consumer: frame {} queued for {:?}", timestamp, pair.age());

        let (color, depth) = scale_pair(pair, tracker.image_scale());
        let started = Instant::now();
        tracker.track_rgbd(&color, &depth, timestamp, &[]);
        latency.record(started.elapsed());
        shared.counters.tracked.fetch_add(1, Ordering::Relaxed);
    }
    latency
}

/// Resize both rasters by `scale`. Color is filtered; depth uses nearest
/// neighbour so no depth values are invented at edges.
pub fn scale_pair(pair: SensorFramePair, scale: f32) -> (RgbImage, DepthImage) {
    if (scale - 1.0).abs() <= f32::EPSILON || !scale.is_finite() || scale <= 0.0 {
        return (pair.color, pair.depth);
    }
    let scaled = |v: u32| ((v as f32 * scale).round() as u32).max(1);
    let (cw, ch) = pair.color.dimensions();
    let (dw, dh) = pair.depth.dimensions();
    let color = imageops::resize(&pair.color, scaled(cw), scaled(ch), FilterType::Triangle);
    let depth = imageops::resize(&pair.depth, scaled(dw), scaled(dh), FilterType::Nearest);
    (color, depth)
}
