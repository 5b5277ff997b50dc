//! Producer/consumer ingest against scripted transports and trackers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use image::{Rgb, RgbImage};

use xr_mapping_bridge::ingest::{
    open_transport, FrameDecoder, FrameTransport, ImageDecoder, ImuSample, IngestConfig, IngestHandle,
    IngestPipeline, IngestStats, TrackingEngine, TransportConfig, TRACKING_TIME_FILE,
};
use xr_mapping_bridge::synthetic::SyntheticTracker;
use xr_mapping_bridge::DepthImage;

fn fast_config(queue_capacity: usize) -> IngestConfig {
    IngestConfig {
        queue_capacity,
        recv_timeout: Duration::from_millis(5),
        pop_timeout: Duration::from_millis(5),
        ..IngestConfig::default()
    }
}

fn wait_for(handle: &IngestHandle, what: &str, done: impl Fn(&IngestStats) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stats = handle.stats();
        if done(&stats) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}: {stats:?}");
        thread::sleep(Duration::from_millis(2));
    }
}

// ----------------------------------------------------------------------------
// Scripted collaborators
// ----------------------------------------------------------------------------

/// Message `[b'c', id]` is a color frame, `[b'd', id]` a depth frame; anything
/// else fails to decode.
struct TaggedDecoder;

impl FrameDecoder for TaggedDecoder {
    fn decode_color(&self, bytes: &[u8]) -> Result<RgbImage> {
        match bytes {
            [b'c', id] => Ok(RgbImage::from_pixel(1, 1, Rgb([*id, 0, 0]))),
            _ => bail!("not a color frame: {:?}", bytes),
        }
    }

    fn decode_depth(&self, bytes: &[u8]) -> Result<DepthImage> {
        match bytes {
            [b'd', id] => Ok(DepthImage::from_pixel(1, 1, image::Luma([*id as u16 * 10]))),
            _ => bail!("not a depth frame: {:?}", bytes),
        }
    }
}

fn pair(id: u8) -> [Vec<u8>; 2] {
    [vec![b'c', id], vec![b'd', id]]
}

enum Step {
    Message(Vec<u8>),
    Error,
}

/// Plays back a script, then idles. After the first `hold_after` messages it
/// idles until `gate` opens.
struct ScriptedTransport {
    steps: VecDeque<Step>,
    delivered: usize,
    hold_after: Option<usize>,
    gate: Arc<AtomicBool>,
}

impl ScriptedTransport {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            delivered: 0,
            hold_after: None,
            gate: Arc::new(AtomicBool::new(true)),
        }
    }

    fn messages(ids: impl IntoIterator<Item = u8>) -> Self {
        Self::new(ids.into_iter().flat_map(pair).map(Step::Message))
    }
}

impl FrameTransport for ScriptedTransport {
    fn recv_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let held = self
            .hold_after
            .is_some_and(|n| self.delivered >= n && !self.gate.load(Ordering::SeqCst));
        if held || self.steps.is_empty() {
            thread::sleep(timeout);
            return Ok(None);
        }
        match self.steps.pop_front() {
            Some(Step::Message(bytes)) => {
                self.delivered += 1;
                Ok(Some(bytes))
            }
            Some(Step::Error) => Err(anyhow!("connection reset")),
            None => Ok(None),
        }
    }

    fn endpoint(&self) -> &str {
        "script://"
    }
}

/// Records what it was given. Optionally blocks inside the first call until
/// `release` opens, announcing through `entered` that it got there.
#[derive(Default)]
struct RecordingTracker {
    seen: Mutex<Vec<(u8, u16, f64)>>,
    calls: AtomicU64,
    shut_down: AtomicBool,
    shutdown_after: Option<u64>,
    entered: Option<Arc<AtomicBool>>,
    release: Option<Arc<AtomicBool>>,
}

impl RecordingTracker {
    fn ids(&self) -> Vec<u8> {
        self.seen.lock().unwrap().iter().map(|(id, _, _)| *id).collect()
    }

    fn timestamps(&self) -> Vec<f64> {
        self.seen.lock().unwrap().iter().map(|(_, _, t)| *t).collect()
    }
}

impl TrackingEngine for RecordingTracker {
    fn track_rgbd(&self, color: &RgbImage, depth: &DepthImage, timestamp: f64, aux: &[ImuSample]) {
        assert!(aux.is_empty());
        let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
        if first {
            if let (Some(entered), Some(release)) = (&self.entered, &self.release) {
                entered.store(true, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        self.seen
            .lock()
            .unwrap()
            .push((color.get_pixel(0, 0).0[0], depth.get_pixel(0, 0).0[0], timestamp));
        if self
            .shutdown_after
            .is_some_and(|n| self.calls.load(Ordering::SeqCst) >= n)
        {
            self.shutdown();
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[test]
fn pairs_reach_the_tracker_with_monotonic_indices() {
    let tracker = Arc::new(RecordingTracker::default());
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::messages(0..5)),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    wait_for(&handle, "five tracked pairs", |s| s.tracked == 5);
    let report = handle.stop().unwrap();

    assert_eq!(tracker.ids(), vec![0, 1, 2, 3, 4]);
    assert_eq!(tracker.timestamps(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(report.stats.messages_received, 10);
    assert_eq!(report.stats.pairs_decoded, 5);
    assert_eq!(report.stats.evicted, 0);
    assert_eq!(report.latency.len(), 5);
}

#[test]
fn color_and_depth_are_paired_by_arrival_order() {
    let tracker = Arc::new(RecordingTracker::default());
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::messages([7, 9])),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    wait_for(&handle, "two tracked pairs", |s| s.tracked == 2);
    handle.stop().unwrap();

    let seen = tracker.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(7, 70, 0.0), (9, 90, 1.0)]);
}

#[test]
fn undecodable_pair_is_dropped_and_indices_stay_dense() {
    let steps = pair(0)
        .into_iter()
        .chain([b"garbage".to_vec(), vec![b'd', 1]])
        .chain(pair(2))
        .map(Step::Message);
    let tracker = Arc::new(RecordingTracker::default());
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::new(steps)),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    wait_for(&handle, "two tracked pairs", |s| s.tracked == 2);
    let report = handle.stop().unwrap();

    assert_eq!(tracker.ids(), vec![0, 2]);
    assert_eq!(tracker.timestamps(), vec![0.0, 1.0]);
    assert_eq!(report.stats.decode_failures, 1);
    assert_eq!(report.stats.pairs_decoded, 2);
}

#[test]
fn transport_errors_are_counted_and_receiving_continues() {
    // The color of pair 3 is received, then the connection drops before depth.
    let [orphan_color, _] = pair(3);
    let steps = [Step::Error, Step::Message(orphan_color), Step::Error]
        .into_iter()
        .chain(pair(4).into_iter().map(Step::Message));
    let tracker = Arc::new(RecordingTracker::default());
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::new(steps)),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    wait_for(&handle, "one tracked pair", |s| s.tracked == 1);
    let report = handle.stop().unwrap();

    assert_eq!(report.stats.transport_errors, 2);
    assert_eq!(report.stats.messages_received, 3);
    assert_eq!(report.stats.pairs_decoded, 1);
    assert_eq!(tracker.ids(), vec![4]);
}

#[test]
fn slow_tracker_sees_only_the_freshest_pairs() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let tracker = Arc::new(RecordingTracker {
        entered: Some(entered.clone()),
        release: Some(release.clone()),
        ..RecordingTracker::default()
    });

    let mut transport = ScriptedTransport::messages(0..20);
    // Hold everything after pair 0 until the tracker is busy with it.
    transport.hold_after = Some(2);
    transport.gate = entered;

    let handle = IngestPipeline::spawn(
        Box::new(transport),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    wait_for(&handle, "all pairs decoded", |s| s.pairs_decoded == 20);
    assert_eq!(handle.stats().queued, 10);
    release.store(true, Ordering::SeqCst);
    wait_for(&handle, "queue drained", |s| s.tracked == 11);
    let report = handle.stop().unwrap();

    let expected_ids: Vec<u8> = std::iter::once(0).chain(10..20).collect();
    assert_eq!(tracker.ids(), expected_ids);
    let expected_times: Vec<f64> = (0..11).map(f64::from).collect();
    assert_eq!(tracker.timestamps(), expected_times);
    assert_eq!(report.stats.evicted, 9);
}

#[test]
fn tracker_shutdown_stops_the_consumer() {
    let tracker = Arc::new(RecordingTracker {
        shutdown_after: Some(3),
        ..RecordingTracker::default()
    });
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::messages(0..50)),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(64),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !handle.consumer_finished() {
        assert!(Instant::now() < deadline, "consumer still running");
        thread::sleep(Duration::from_millis(2));
    }
    let report = handle.stop().unwrap();

    assert_eq!(report.stats.tracked, 3);
    assert_eq!(tracker.ids(), vec![0, 1, 2]);
}

#[test]
fn stop_returns_promptly_on_an_idle_transport() {
    let tracker = Arc::new(RecordingTracker::default());
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::new([])),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    let report = handle.stop().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.stats.tracked, 0);
    assert!(report.latency.is_empty());
}

#[test]
fn dropping_the_handle_joins_both_threads() {
    let tracker = Arc::new(RecordingTracker::default());
    let handle = IngestPipeline::spawn(
        Box::new(ScriptedTransport::messages(0..3)),
        Box::new(TaggedDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();
    wait_for(&handle, "three tracked pairs", |s| s.tracked == 3);
    drop(handle);

    // The consumer held a clone; after the join only ours is left.
    assert_eq!(Arc::strong_count(&tracker), 1);
}

#[test]
fn synthetic_stream_end_to_end_writes_tracking_time() {
    let transport = open_transport(&TransportConfig {
        endpoint: "stub://end-to-end".to_string(),
        synthetic_fps: 200,
        width: 32,
        height: 24,
    })
    .unwrap();
    let tracker = Arc::new(SyntheticTracker::new(0.5).with_max_frames(4));
    let handle = IngestPipeline::spawn(
        transport,
        Box::new(ImageDecoder),
        tracker.clone(),
        fast_config(10),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !handle.consumer_finished() {
        assert!(Instant::now() < deadline, "consumer still running");
        thread::sleep(Duration::from_millis(2));
    }
    let report = handle.stop().unwrap();
    assert_eq!(report.stats.tracked, 4);
    assert_eq!(tracker.timestamps(), vec![0.0, 1.0, 2.0, 3.0]);

    let dir = tempfile::tempdir().unwrap();
    let path = report.latency.save(dir.path()).unwrap();
    assert_eq!(path, dir.path().join(TRACKING_TIME_FILE));
    let written = std::fs::read_to_string(path).unwrap();
    assert_eq!(written.lines().count(), 4);
    assert!(written.lines().all(|line| line.parse::<f64>().is_ok()));

    tracker.save_trajectories(dir.path()).unwrap();
    assert!(dir.path().join("CameraTrajectory.txt").exists());
}
