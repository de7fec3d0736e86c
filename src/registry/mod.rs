//! Connection registry
//!
//! The registry owns every live peer connection and the binding between a
//! connection and the capture stream that feeds its video track.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ConnectionRegistry>
//!                  ┌────────────────────────────────┐
//!                  │ connections: HashMap<Id,       │
//!                  │   ConnectionEntry {            │
//!                  │     connection: Arc<..>,       │
//!                  │     stream: Option<StreamId>,  │
//!                  │   }>                           │
//!                  │ streams: HashMap<StreamId, Id> │
//!                  └───────────────┬────────────────┘
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!   SignalingController      CameraService           StreamTable
//!   get / remove             bind / unbind           StreamRelease on close
//! ```
//!
//! A stream feeds at most one connection. Removing a connection releases
//! its binding in the same critical section, so no reader ever sees a
//! binding that points at a closed connection.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use config::{ClosePolicy, RegistryConfig};
pub use entry::{NoopRelease, RemovedConnection, StreamRelease};
pub use error::RegistryError;
pub use key::{ConnectionId, StreamId};
pub use store::ConnectionRegistry;
