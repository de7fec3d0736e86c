//! Registry entry types
//!
//! This module defines the per-connection state stored in the registry and
//! the hook used to release a stream when its connection goes away.

use std::sync::Arc;
use std::time::Instant;

use crate::signaling::Connection;

use super::config::ClosePolicy;
use super::key::{ConnectionId, StreamId};

/// Entry for a single connection in the registry
pub(super) struct ConnectionEntry {
    pub connection: Arc<Connection>,

    /// Stream currently feeding this connection's track
    pub stream: Option<StreamId>,

    pub registered_at: Instant,
}

impl ConnectionEntry {
    pub(super) fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            stream: None,
            registered_at: Instant::now(),
        }
    }
}

/// What a removal took out of the registry
pub struct RemovedConnection {
    pub connection: Arc<Connection>,
    /// The stream binding released together with the entry
    pub stream: Option<StreamId>,
}

/// Releases a stream binding when its connection closes
///
/// Implementations must not block; they run inside `close`.
pub trait StreamRelease: Send + Sync {
    fn release(&self, stream: &StreamId, connection: &ConnectionId, policy: ClosePolicy);
}

/// Release hook for setups without capture streams
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRelease;

impl StreamRelease for NoopRelease {
    fn release(&self, stream: &StreamId, connection: &ConnectionId, _policy: ClosePolicy) {
        tracing::debug!(
            stream = %stream,
            connection = %connection,
            "Binding released, no stream table attached"
        );
    }
}
