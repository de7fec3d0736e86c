//! camera-rtc: camera capture to peer-to-peer video, with backpressure
//!
//! A capture thread produces frames as fast as the camera delivers them.
//! Consumers (a peer connection's video track, a UI preview) take them at
//! their own pace. Between the two sits a [`FrameGate`]: before any
//! conversion or encoding, the producer asks whether anybody can accept a
//! frame right now, and drops it if not. Nothing is queued.
//!
//! # Architecture
//!
//! ```text
//!   CaptureBackend ──open──► CaptureSource
//!                                 │ next_frame()
//!                                 ▼
//!                     ┌───────────────────────┐      can_send()
//!                     │ FrameBridge (thread)  │◄──────────────── FrameGate
//!                     └───────────┬───────────┘                     ▲
//!                                 │ EncodedSample                   │ set_ready
//!                 ┌───────────────┴──────────────┐                  │
//!                 ▼                              ▼                  │
//!          WatchSink (owner=conn)        WatchSink (owner=ui) ──────┤
//!                 │                              │                  │
//!          track writer task             FrameSubscription ─────────┘
//!                 │
//!                 ▼
//!          PeerTransport ◄── Connection ◄── ConnectionRegistry ◄── SignalingController
//! ```
//!
//! [`CameraService`] ties these together behind the command surface an
//! application layer calls.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use camera_rtc::{CameraService, ServiceConfig, StartSessionRequest};
//! use camera_rtc::capture::SyntheticBackend;
//! use camera_rtc::transport::MemoryTransportFactory;
//!
//! # async fn run() -> camera_rtc::Result<()> {
//! let service = CameraService::new(
//!     ServiceConfig::default(),
//!     Arc::new(SyntheticBackend::default()),
//!     Arc::new(MemoryTransportFactory::new()),
//! );
//!
//! let session = service
//!     .start_camera_webrtc_session(StartSessionRequest::new("synthetic-0"))
//!     .await?;
//! println!("offer for {}: {}", session.connection_id, session.description.sdp);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod capture;
pub mod error;
pub mod gate;
pub mod media;
pub mod registry;
pub mod service;
pub mod signaling;
pub mod stats;
pub mod transport;

pub use bridge::{BridgeConfig, FrameBridge, FrameSubscription, SampleReceiver};
pub use error::{Error, Result};
pub use gate::{FrameGate, ReadinessListener};
pub use media::{CapturedFrame, EncodedSample, FrameEvent};
pub use registry::{ClosePolicy, ConnectionId, ConnectionRegistry, RegistryConfig, StreamId};
pub use service::{
    CameraService, CreatePeerConnectionRequest, ServiceConfig, SessionOffer, StartSessionRequest,
    StartStreamRequest, StartStreamResponse, VideoConfig,
};
pub use signaling::{
    ConnectionSnapshot, IceCandidate, IceServer, NegotiationState, SessionDescription,
    SignalingController,
};
pub use transport::{PeerTransport, TransportFactory, TransportState};
