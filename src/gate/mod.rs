//! Frame backpressure gate
//!
//! A capture stream owns one [`FrameGate`]. Every consumer that watches the
//! stream holds a [`ReadinessListener`] and flips it ready while it can take
//! another frame. The producer asks [`FrameGate::can_send`] before doing any
//! conversion or encoding work and drops the frame outright when nobody is
//! ready. Frames are never queued.
//!
//! # Counters
//!
//! ```text
//!   63                32 31                 0
//!  ┌────────────────────┬────────────────────┐
//!  │   listener_count   │    ready_count     │   AtomicU64
//!  └────────────────────┴────────────────────┘
//! ```
//!
//! Both counters live in one word and change together through a single
//! compare-and-swap, so `ready_count <= listener_count` holds for every
//! observer. `can_send` is a single atomic load.
//!
//! Dropping a listener deregisters it exactly once, whether or not the
//! consumer called [`ReadinessListener::deregister`] first and whether or not
//! the gate revoked it when the stream stopped.

mod listener;
mod sender;

pub use listener::{ListenerId, ReadinessListener};
pub use sender::{FrameGate, GateSnapshot, GateState};
