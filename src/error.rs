//! Error types for camera-rtc
//!
//! Transient conditions (a dropped frame, a failed sink delivery, a buffered
//! candidate the transport rejected) are logged and counted, never returned.
//! Everything here is a structural failure the caller has to act on.

use serde::{Serialize, Serializer};

use crate::registry::{ConnectionId, RegistryError};
use crate::signaling::NegotiationState;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for camera-rtc
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to initialize camera: {0}")]
    InitializationFailed(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Format not supported: {0}")]
    FormatNotSupported(String),

    /// An operation was attempted in a negotiation state that does not allow it
    #[error("Cannot {operation} in signaling state {state}")]
    InvalidState {
        operation: &'static str,
        state: NegotiationState,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Streaming failed: {0}")]
    StreamingFailed(String),

    #[error("Streaming already active for device: {0}")]
    StreamingAlreadyActive(String),

    #[error("No active stream: {0}")]
    NoActiveStream(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    /// The connection was closed while the operation was in flight
    #[error("Operation cancelled: connection {0} was closed")]
    Cancelled(ConnectionId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code for command responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::InitializationFailed(_) => "INITIALIZATION_FAILED",
            Error::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::FormatNotSupported(_) => "FORMAT_NOT_SUPPORTED",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::Registry(RegistryError::ConnectionNotFound(_)) => "CONNECTION_NOT_FOUND",
            Error::Registry(RegistryError::DuplicateConnection(_)) => "DUPLICATE_CONNECTION",
            Error::Registry(RegistryError::StreamAlreadyBound { .. }) => "STREAM_ALREADY_BOUND",
            Error::StreamingFailed(_) => "STREAMING_FAILED",
            Error::StreamingAlreadyActive(_) => "STREAMING_ALREADY_ACTIVE",
            Error::NoActiveStream(_) => "NO_ACTIVE_STREAM",
            Error::InvalidDescription(_) => "INVALID_DESCRIPTION",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Encoder(_) => "ENCODER_ERROR",
            Error::Cancelled(_) => "CANCELLED",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }

    /// Whether this error reports an unknown or already-closed connection
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Registry(RegistryError::ConnectionNotFound(_)))
    }

    pub(crate) fn invalid_state(operation: &'static str, state: NegotiationState) -> Self {
        Error::InvalidState { operation, state }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_to_message() {
        let err = Error::DeviceNotFound("cam-9".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Device not found: cam-9\"");
    }

    #[test]
    fn test_error_codes() {
        let id = ConnectionId::from("abc");
        assert_eq!(
            Error::from(RegistryError::ConnectionNotFound(id.clone())).code(),
            "CONNECTION_NOT_FOUND"
        );
        assert_eq!(Error::Cancelled(id).code(), "CANCELLED");
        assert_eq!(
            Error::invalid_state("create offer", NegotiationState::HaveLocalOffer).code(),
            "INVALID_STATE"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::invalid_state("create offer", NegotiationState::HaveLocalOffer);
        assert_eq!(
            err.to_string(),
            "Cannot create offer in signaling state have-local-offer"
        );
    }

    #[test]
    fn test_not_found_predicate() {
        let err = Error::from(RegistryError::ConnectionNotFound(ConnectionId::from("x")));
        assert!(err.is_not_found());
        assert!(!Error::NoActiveStream("s".into()).is_not_found());
    }
}
