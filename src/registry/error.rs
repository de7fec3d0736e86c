//! Registry error types
//!
//! Error types for connection registry operations.

use super::key::{ConnectionId, StreamId};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Unknown or already closed connection
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// A connection with this id is already registered
    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// The stream already feeds another connection
    #[error("Stream {stream} is already bound to connection {connection}")]
    StreamAlreadyBound {
        stream: StreamId,
        connection: ConnectionId,
    },
}
