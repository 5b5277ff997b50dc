//! Sensor frame pairs and the bounded ingest queue.
//!
//! - `SensorFramePair`: one decoded color/depth pair from the transport.
//! - `FrameQueue`: bounded, drop-oldest buffer between the network receiver
//!   (producer) and the tracking loop (consumer).
//!
//! The queue never blocks the producer. When it is full, the oldest pair is
//! evicted before the new one is appended, so the consumer always sees the
//! freshest `capacity` pairs in FIFO order.

use anyhow::Result;
use image::{ImageBuffer, Luma, RgbImage};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default queue capacity. At 30 fps this is roughly a third of a second of backlog.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// 16-bit single channel depth raster (sensor units, usually millimetres).
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

// ----------------------------------------------------------------------------
// SensorFramePair
// ----------------------------------------------------------------------------

/// A decoded color/depth pair.
///
/// The pair is owned by its queue slot until dequeued; `pop_blocking` moves it
/// to the consumer. `sequence_index` stays `None` while queued and is assigned
/// by the consumer at dequeue time (monotonic, not wall-clock).
///
/// Only the ingest consumer may stamp a pair:
///
/// ```compile_fail
/// use xr_mapping_bridge::{DepthImage, SensorFramePair};
///
/// let mut pair = SensorFramePair::new(image::RgbImage::new(2, 2), DepthImage::new(2, 2));
/// pair.assign_sequence(7);
/// ```
pub struct SensorFramePair {
    pub color: RgbImage,
    pub depth: DepthImage,
    sequence_index: Option<u64>,
    received_at: Instant,
}

impl SensorFramePair {
    pub fn new(color: RgbImage, depth: DepthImage) -> Self {
        Self {
            color,
            depth,
            sequence_index: None,
            received_at: Instant::now(),
        }
    }

    pub fn sequence_index(&self) -> Option<u64> {
        self.sequence_index
    }

    /// Stamp the pair with its dequeue order. Called once by the consumer.
    pub(crate) fn assign_sequence(&mut self, index: u64) {
        self.sequence_index = Some(index);
    }

    /// Time spent between decode and now (queue residency when called at pop).
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Dump a depth raster as comma-separated rows of raw sensor values.
pub fn write_depth_csv(depth: &DepthImage, out: &mut impl Write) -> Result<()> {
    for row in depth.rows() {
        let line: Vec<String> = row.map(|px| px.0[0].to_string()).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// FrameQueue
// ----------------------------------------------------------------------------

/// Counters describing queue traffic since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub evicted: u64,
    pub popped: u64,
    pub len: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    pushed: u64,
    evicted: u64,
    popped: u64,
}

/// Bounded drop-oldest queue with mutex + condition variable discipline.
///
/// Invariants:
/// - `len() <= capacity()` at all times
/// - on overflow the front (oldest) entry is removed before the new entry is appended
/// - `push` never blocks and never fails
///
/// `close()` is the cancellation path: it wakes every blocked consumer and
/// makes further pops return `None`.
pub struct FrameQueue<T = SensorFramePair> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` entries (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                pushed: 0,
                evicted: 0,
                popped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    // Every critical section leaves the state consistent; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, evicting the oldest entry first when full.
    ///
    /// Returns the entry that did not survive: the evicted oldest entry, or
    /// `item` itself when the queue has been closed. The caller drops it
    /// outside the lock.
    pub fn push(&self, item: T) -> Option<T> {
        let mut state = self.lock();
        if state.closed {
            return Some(item);
        }
        let evicted = if state.items.len() >= self.capacity {
            state.evicted += 1;
            state.items.pop_front()
        } else {
            None
        };
        state.items.push_back(item);
        state.pushed += 1;
        drop(state);
        self.available.notify_one();
        evicted
    }

    /// Block until an entry is available, then remove and return the oldest one.
    ///
    /// Returns `None` once the queue is closed.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                state.popped += 1;
                return Some(item);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `pop_blocking`, but gives up after `timeout`.
    ///
    /// Lets a consumer re-check its own shutdown condition between waits.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                state.popped += 1;
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Close the queue, discarding resident entries and waking all waiters.
    pub fn close(&self) {
        let drained: Vec<T> = {
            let mut state = self.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.available.notify_all();
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pushed: state.pushed,
            evicted: state.evicted,
            popped: state.popped,
            len: state.items.len(),
        }
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
