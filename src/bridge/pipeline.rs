//! Frame bridge
//!
//! Moves frames from one capture source to every attached sink. The producer
//! thread consults the stream's [`FrameGate`] before doing any work on a
//! frame; when nobody is ready the frame is dropped on the spot.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::capture::CaptureSource;
use crate::error::{Error, Result};
use crate::gate::FrameGate;
use crate::media::{CapturedFrame, EncodedSample, FrameEncoder};
use crate::registry::StreamId;
use crate::stats::{BridgeCounters, BridgeStats};

use super::config::BridgeConfig;
use super::sink::{SampleSink, SinkError, SinkOwner};

/// Lifecycle of one capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeState {
    Idle = 0,
    Streaming = 1,
    Stopped = 2,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BridgeState::Idle,
            1 => BridgeState::Streaming,
            _ => BridgeState::Stopped,
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "idle",
            BridgeState::Streaming => "streaming",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Handle of an attached sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The bridge is not streaming
    Inactive,
    /// No consumer was ready; nothing was encoded
    Dropped,
    /// The encoder produced no output for this frame
    Skipped,
    /// Encoded and handed to this many sinks
    Delivered(usize),
}

#[derive(Clone)]
struct AttachedSink {
    id: SinkId,
    owner: SinkOwner,
    sink: Arc<dyn SampleSink>,
}

/// Producer side of one capture stream
pub struct FrameBridge {
    stream_id: StreamId,
    config: BridgeConfig,
    gate: FrameGate,
    state: AtomicU8,
    /// Copy-on-write so delivery never holds the lock
    sinks: RwLock<Arc<Vec<AttachedSink>>>,
    next_sink_id: AtomicU64,
    keyframe_requested: AtomicBool,
    counters: BridgeCounters,
    /// Capture timestamp of the last delivered sample
    last_sample_us: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl FrameBridge {
    pub fn new(stream_id: StreamId, config: BridgeConfig) -> Self {
        Self {
            stream_id,
            config,
            gate: FrameGate::new(),
            state: AtomicU8::new(BridgeState::Idle as u8),
            sinks: RwLock::new(Arc::new(Vec::new())),
            next_sink_id: AtomicU64::new(1),
            keyframe_requested: AtomicBool::new(false),
            counters: BridgeCounters::default(),
            last_sample_us: AtomicU64::new(0),
            failure: Mutex::new(None),
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// The readiness gate consumers of this stream register with
    pub fn gate(&self) -> &FrameGate {
        &self.gate
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == BridgeState::Streaming
    }

    /// Why the stream stopped on its own, if it did
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    /// Move from Idle to Streaming
    pub fn start(&self) -> Result<()> {
        self.state
            .compare_exchange(
                BridgeState::Idle as u8,
                BridgeState::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|current| {
                Error::StreamingFailed(format!(
                    "stream {} cannot start from state {}",
                    self.stream_id,
                    BridgeState::from_u8(current)
                ))
            })?;

        tracing::debug!(stream = %self.stream_id, "Frame bridge streaming");
        Ok(())
    }

    /// Stop the stream, drop every sink and revoke every gate listener.
    /// Returns false if it was already stopped.
    pub fn stop(&self) -> bool {
        let previous = self.state.swap(BridgeState::Stopped as u8, Ordering::AcqRel);
        if previous == BridgeState::Stopped as u8 {
            return false;
        }

        let released = {
            let mut sinks = self.sinks.write();
            let count = sinks.len();
            *sinks = Arc::new(Vec::new());
            count
        };
        let revoked = self.gate.revoke_all();

        tracing::info!(
            stream = %self.stream_id,
            sinks = released,
            listeners = revoked,
            "Frame bridge stopped"
        );
        true
    }

    /// Attach a sink. Fails once the stream has stopped.
    pub fn attach_sink(&self, owner: SinkOwner, sink: Arc<dyn SampleSink>) -> Result<SinkId> {
        let id = SinkId(self.next_sink_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut sinks = self.sinks.write();
            // Checked under the lock so a concurrent stop cannot miss this sink
            if self.state() == BridgeState::Stopped {
                return Err(Error::NoActiveStream(self.stream_id.to_string()));
            }
            let mut next = Vec::with_capacity(sinks.len() + 1);
            next.extend(sinks.iter().cloned());
            next.push(AttachedSink {
                id,
                owner: owner.clone(),
                sink,
            });
            *sinks = Arc::new(next);
        }

        // A new viewer cannot decode deltas against frames it never saw
        self.keyframe_requested.store(true, Ordering::Release);

        tracing::debug!(stream = %self.stream_id, sink = %id, owner = %owner, "Sink attached");
        Ok(id)
    }

    pub fn detach_sink(&self, id: SinkId) -> bool {
        self.retain_sinks(|attached| attached.id != id) > 0
    }

    /// Detach every sink belonging to `owner`
    pub fn detach_owner(&self, owner: &SinkOwner) -> usize {
        let removed = self.retain_sinks(|attached| &attached.owner != owner);
        if removed > 0 {
            tracing::debug!(
                stream = %self.stream_id,
                owner = %owner,
                removed = removed,
                "Sinks detached"
            );
        }
        removed
    }

    /// Sinks that can still take samples
    pub fn sink_count(&self) -> usize {
        self.sinks
            .read()
            .iter()
            .filter(|attached| !attached.sink.is_closed())
            .count()
    }

    pub fn has_owner(&self, owner: &SinkOwner) -> bool {
        self.sinks.read().iter().any(|attached| &attached.owner == owner)
    }

    /// Run one frame through the bridge
    ///
    /// The gate is consulted before the encoder is touched. An encoder error
    /// is counted and returned; delivery failures are counted and absorbed.
    pub fn process_frame(
        &self,
        frame: CapturedFrame,
        encoder: &mut dyn FrameEncoder,
    ) -> Result<FrameOutcome> {
        if !self.is_streaming() {
            return Ok(FrameOutcome::Inactive);
        }
        BridgeCounters::bump(&self.counters.frames_captured);

        if !self.gate.can_send() {
            let dropped = BridgeCounters::bump(&self.counters.frames_dropped);
            tracing::trace!(stream = %self.stream_id, sequence = frame.sequence, "No ready consumer, frame dropped");
            let interval = self.config.drop_log_interval;
            if interval > 0 && dropped % interval == 0 {
                tracing::debug!(
                    stream = %self.stream_id,
                    dropped = dropped,
                    gate = %self.gate.state(),
                    "Frames dropped while consumers were busy"
                );
            }
            return Ok(FrameOutcome::Dropped);
        }

        if self.keyframe_requested.swap(false, Ordering::AcqRel) {
            encoder.request_keyframe();
        }

        let data = match encoder.encode(&frame) {
            Ok(Some(data)) => data,
            Ok(None) => {
                BridgeCounters::bump(&self.counters.frames_skipped);
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => {
                BridgeCounters::bump(&self.counters.encode_errors);
                return Err(e);
            }
        };
        BridgeCounters::bump(&self.counters.frames_encoded);

        let duration = self.sample_duration(frame.timestamp_us);
        let sample = EncodedSample::from_frame(&frame, data, encoder.output_format(), duration);
        Ok(FrameOutcome::Delivered(self.deliver(&sample)))
    }

    /// Start the producer thread
    pub fn spawn(
        self: &Arc<Self>,
        source: Box<dyn CaptureSource>,
        encoder: Box<dyn FrameEncoder>,
    ) -> Result<JoinHandle<()>> {
        self.start()?;

        let bridge = Arc::clone(self);
        let name = format!("{}-{}", self.config.thread_name_prefix, self.stream_id.short());
        thread::Builder::new()
            .name(name)
            .spawn(move || bridge.run(source, encoder))
            .map_err(|e| {
                self.stop();
                Error::StreamingFailed(format!("failed to spawn producer thread: {}", e))
            })
    }

    fn run(&self, mut source: Box<dyn CaptureSource>, mut encoder: Box<dyn FrameEncoder>) {
        tracing::info!(
            stream = %self.stream_id,
            format = %source.format(),
            encoder = encoder.name(),
            "Frame bridge started"
        );

        let max_errors = self.config.max_consecutive_errors.max(1);
        let mut consecutive = 0u32;

        while self.is_streaming() {
            let result = match source.next_frame() {
                Ok(Some(frame)) => self.process_frame(frame, encoder.as_mut()).map(|_| ()),
                Ok(None) => {
                    tracing::info!(stream = %self.stream_id, "Capture source ended");
                    break;
                }
                Err(e) => {
                    BridgeCounters::bump(&self.counters.capture_errors);
                    Err(e)
                }
            };

            match result {
                Ok(()) => consecutive = 0,
                Err(e) => {
                    consecutive += 1;
                    tracing::warn!(
                        stream = %self.stream_id,
                        consecutive = consecutive,
                        error = %e,
                        "Frame processing failed"
                    );
                    if consecutive >= max_errors {
                        self.fail(format!("{} consecutive errors, last: {}", consecutive, e));
                        break;
                    }
                }
            }
        }

        source.close();
        self.stop();

        let stats = self.stats();
        tracing::info!(
            stream = %self.stream_id,
            captured = stats.frames_captured,
            dropped = stats.frames_dropped,
            encoded = stats.frames_encoded,
            delivered = stats.samples_delivered,
            "Frame bridge exited"
        );
    }

    fn fail(&self, reason: String) {
        tracing::error!(stream = %self.stream_id, reason = %reason, "Streaming failed");
        *self.failure.lock() = Some(reason);
        self.stop();
    }

    fn sample_duration(&self, timestamp_us: u64) -> Duration {
        let previous = self.last_sample_us.swap(timestamp_us, Ordering::Relaxed);
        if previous == 0 || timestamp_us <= previous {
            self.config.nominal_frame_duration
        } else {
            Duration::from_micros(timestamp_us - previous)
        }
    }

    fn deliver(&self, sample: &EncodedSample) -> usize {
        let sinks = Arc::clone(&*self.sinks.read());

        let mut delivered = 0;
        let mut failed = 0;
        let mut closed = Vec::new();
        for attached in sinks.iter() {
            match attached.sink.deliver(sample) {
                Ok(()) => delivered += 1,
                Err(SinkError::Closed) => {
                    failed += 1;
                    closed.push(attached.id);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        stream = %self.stream_id,
                        sink = %attached.id,
                        owner = %attached.owner,
                        error = %e,
                        "Sample delivery failed"
                    );
                }
            }
        }

        BridgeCounters::add(&self.counters.samples_delivered, delivered as u64);
        BridgeCounters::add(&self.counters.delivery_failures, failed);

        if !closed.is_empty() {
            let pruned = self.retain_sinks(|attached| !closed.contains(&attached.id));
            tracing::debug!(stream = %self.stream_id, pruned = pruned, "Closed sinks pruned");
        }
        delivered
    }

    /// Keep sinks matching `keep`, returning how many were removed
    fn retain_sinks(&self, keep: impl Fn(&AttachedSink) -> bool) -> usize {
        let mut sinks = self.sinks.write();
        let next: Vec<AttachedSink> = sinks.iter().filter(|a| keep(a)).cloned().collect();
        let removed = sinks.len() - next.len();
        if removed > 0 {
            *sinks = Arc::new(next);
        }
        removed
    }
}

impl fmt::Debug for FrameBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBridge")
            .field("stream_id", &self.stream_id)
            .field("state", &self.state())
            .field("sinks", &self.sinks.read().len())
            .field("gate", &self.gate.snapshot())
            .finish()
    }
}
