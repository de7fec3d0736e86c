//! Peer connection signaling
//!
//! ```text
//!            create_offer              apply answer
//!   New ───────────────► HaveLocalOffer ──────────► HaveRemoteAnswer ─┐
//!    │                                                                 ├─► Connected ─► Failed
//!    │ apply offer               create_answer                         │
//!    └──────────► HaveRemoteOffer ──────────► HaveLocalAnswer ────────┘
//!
//!   any state ── close ──► Closed
//! ```
//!
//! Candidates may arrive in any non-terminal state. Until the remote
//! description is applied they are buffered per connection, in order.

pub mod connection;
pub mod controller;
pub mod description;
pub mod state;

pub use connection::{CandidateDisposition, Connection, ConnectionSnapshot};
pub use controller::SignalingController;
pub use description::{IceCandidate, IceServer, OfferOptions, PeerConfig, SdpType, SessionDescription};
pub use state::{NegotiationState, SignalingOp};
