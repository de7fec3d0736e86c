//! Sample sinks
//!
//! A sink is where the bridge drops a finished sample. Delivery must never
//! block the producer thread, so the built-in sink is a single-slot
//! `watch` channel: each delivery overwrites whatever the consumer has not
//! picked up yet.

use std::fmt;

use tokio::sync::watch;

use crate::gate::{FrameGate, ReadinessListener};
use crate::media::{EncodedSample, FrameEvent};
use crate::registry::ConnectionId;

/// Why a delivery failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer is gone; the sink can be detached
    #[error("sink closed")]
    Closed,
    #[error("sink rejected sample: {0}")]
    Rejected(String),
}

/// Destination for encoded samples
pub trait SampleSink: Send + Sync {
    /// Hand over a sample without blocking
    fn deliver(&self, sample: &EncodedSample) -> Result<(), SinkError>;

    fn is_closed(&self) -> bool {
        false
    }
}

/// Who a sink belongs to, so related sinks can be detached together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SinkOwner {
    /// The video track of a peer connection
    Connection(ConnectionId),
    /// An in-process consumer such as a UI preview
    Local(String),
}

impl fmt::Display for SinkOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkOwner::Connection(id) => write!(f, "connection:{}", id),
            SinkOwner::Local(label) => write!(f, "local:{}", label),
        }
    }
}

/// Latest-value sink feeding one [`SampleReceiver`]
pub struct WatchSink {
    tx: watch::Sender<Option<EncodedSample>>,
}

impl SampleSink for WatchSink {
    fn deliver(&self, sample: &EncodedSample) -> Result<(), SinkError> {
        self.tx
            .send(Some(sample.clone()))
            .map_err(|_| SinkError::Closed)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a sink/receiver pair whose readiness is tracked by `gate`
pub fn sample_channel(gate: &FrameGate, initially_ready: bool) -> (WatchSink, SampleReceiver) {
    let (tx, rx) = watch::channel(None);
    let listener = gate.create_listener(initially_ready);
    (WatchSink { tx }, SampleReceiver { rx, listener })
}

/// Consumer end of a [`WatchSink`]
///
/// The receiver is ready exactly while a caller is waiting in
/// [`recv`](Self::recv); between calls it is busy and the bridge skips
/// encoding on its behalf. Dropping the receiver deregisters it.
pub struct SampleReceiver {
    rx: watch::Receiver<Option<EncodedSample>>,
    listener: ReadinessListener,
}

/// Clears readiness when a wait ends, including when the wait is cancelled
struct ReadyGuard<'a>(&'a ReadinessListener);

impl Drop for ReadyGuard<'_> {
    fn drop(&mut self) {
        self.0.set_ready(false);
    }
}

impl SampleReceiver {
    /// Wait for the next sample. Returns `None` once the stream has stopped.
    pub async fn recv(&mut self) -> Option<EncodedSample> {
        self.listener.set_ready(true);
        let _ready = ReadyGuard(&self.listener);

        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    /// The most recent sample without waiting or marking it seen
    pub fn latest(&self) -> Option<EncodedSample> {
        self.rx.borrow().clone()
    }

    pub fn listener(&self) -> &ReadinessListener {
        &self.listener
    }
}

/// UI-facing subscription yielding [`FrameEvent`]s
pub struct FrameSubscription {
    receiver: SampleReceiver,
}

impl std::fmt::Debug for FrameSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSubscription").finish_non_exhaustive()
    }
}

impl FrameSubscription {
    pub fn new(receiver: SampleReceiver) -> Self {
        Self { receiver }
    }

    /// Wait for the next frame. Returns `None` once the stream has stopped.
    pub async fn next_frame(&mut self) -> Option<FrameEvent> {
        self.receiver.recv().await.map(|sample| FrameEvent::from(&sample))
    }

    pub fn into_inner(self) -> SampleReceiver {
        self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CapturedFrame, PixelFormat, SampleFormat};
    use std::time::Duration;

    fn sample(sequence: u64) -> EncodedSample {
        let frame = CapturedFrame::new(vec![0u8; 4], 1, 1, PixelFormat::Rgba, sequence);
        EncodedSample::from_frame(
            &frame,
            frame.data.clone(),
            SampleFormat::Raw(PixelFormat::Rgba),
            Duration::from_millis(33),
        )
    }

    #[tokio::test]
    async fn test_receiver_ready_only_while_waiting() {
        let gate = FrameGate::new();
        let (sink, mut receiver) = sample_channel(&gate, false);
        assert!(!gate.can_send());

        let waiter = tokio::spawn(async move {
            let got = receiver.recv().await.map(|s| s.sequence);
            (got, receiver)
        });

        while !gate.can_send() {
            tokio::task::yield_now().await;
        }
        sink.deliver(&sample(5)).unwrap();

        let (got, receiver) = waiter.await.unwrap();
        assert_eq!(got, Some(5));
        assert!(!gate.can_send());
        assert!(!receiver.listener().is_ready());
    }

    #[tokio::test]
    async fn test_latest_value_overwrites() {
        let gate = FrameGate::new();
        let (sink, mut receiver) = sample_channel(&gate, true);
        sink.deliver(&sample(1)).unwrap();
        sink.deliver(&sample(2)).unwrap();
        assert_eq!(receiver.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_stream() {
        let gate = FrameGate::new();
        let (sink, mut receiver) = sample_channel(&gate, false);
        drop(sink);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes_sink() {
        let gate = FrameGate::new();
        let (sink, receiver) = sample_channel(&gate, true);
        assert_eq!(gate.listener_count(), 1);

        drop(receiver);
        assert!(sink.is_closed());
        assert_eq!(sink.deliver(&sample(1)), Err(SinkError::Closed));
        assert_eq!(gate.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_clears_readiness() {
        let gate = FrameGate::new();
        let (_sink, mut receiver) = sample_channel(&gate, false);

        let result = tokio::time::timeout(Duration::from_millis(10), receiver.recv()).await;
        assert!(result.is_err());
        assert!(!gate.can_send());
    }

    #[tokio::test]
    async fn test_frame_subscription() {
        let gate = FrameGate::new();
        let (sink, receiver) = sample_channel(&gate, true);
        let mut subscription = FrameSubscription::new(receiver);
        sink.deliver(&sample(9)).unwrap();

        let event = subscription.next_frame().await.unwrap();
        assert_eq!(event.frame_id, 9);
        assert_eq!(event.format, "rgba");
    }

    #[test]
    fn test_owner_display() {
        assert_eq!(
            SinkOwner::Connection(ConnectionId::from("c1")).to_string(),
            "connection:c1"
        );
        assert_eq!(SinkOwner::Local("ui".into()).to_string(), "local:ui");
    }
}
