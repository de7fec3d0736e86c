//! Peer transport boundary
//!
//! ICE, DTLS and SRTP live behind [`PeerTransport`]. The signaling layer
//! only needs offer/answer creation, remote description and candidate
//! application, a state feed, and a way to push samples onto the video
//! track. Every call may suspend for network round trips.

pub mod memory;
mod track;
#[cfg(feature = "webrtc")]
pub mod webrtc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::media::EncodedSample;
use crate::registry::ConnectionId;
use crate::signaling::{IceCandidate, OfferOptions, PeerConfig, SessionDescription};

pub use memory::{MemoryTransport, MemoryTransportFactory, TransportCall};
pub use track::spawn_track_writer;
#[cfg(feature = "webrtc")]
pub use self::webrtc::{WebRtcTransport, WebRtcTransportFactory};

/// Connectivity state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One peer connection's transport
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an offer and install it as the local description
    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer and install it locally
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Push one sample onto the outgoing video track
    async fn write_sample(&self, sample: &EncodedSample) -> Result<()>;

    /// Connectivity state feed
    fn state_changes(&self) -> watch::Receiver<TransportState>;

    async fn close(&self) -> Result<()>;
}

/// Creates one transport per connection
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, id: &ConnectionId, config: &PeerConfig) -> Result<Arc<dyn PeerTransport>>;
}
