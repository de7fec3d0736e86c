//! Capture-to-consumer bridge
//!
//! ```text
//!  CaptureSource ──► FrameBridge (producer thread) ──► sinks
//!                       │   ▲                           │
//!                can_send() │                           ▼
//!                       │   └── FrameGate ◄── set_ready SampleReceiver
//!                       ▼                               (track writer, UI)
//!                  drop / encode
//! ```
//!
//! Each stream owns one [`FrameBridge`] and one gate. Consumers hold a
//! [`SampleReceiver`] whose listener is ready while the consumer waits for
//! the next sample.

pub mod config;
pub mod pipeline;
pub mod sink;
pub mod table;

pub use config::BridgeConfig;
pub use pipeline::{BridgeState, FrameBridge, FrameOutcome, SinkId};
pub use sink::{
    sample_channel, FrameSubscription, SampleReceiver, SampleSink, SinkError, SinkOwner, WatchSink,
};
pub use table::{ActiveStream, StreamTable};
