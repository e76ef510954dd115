use thiserror::Error;

use crate::registry::ConnectionId;

/// Outcome of a relay decision that could not be carried out.
///
/// Pass-through commands treat [`RelayError::ControllerUnavailable`] as a
/// silent drop; audio arbitration reports it back to the requester.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no controller is registered")]
    ControllerUnavailable,
    #[error("audio session is owned by connection {owner}")]
    SessionBusy { owner: ConnectionId },
    #[error("connection {0} does not own the audio session")]
    NotSessionOwner(ConnectionId),
    #[error("no cached transponder list for satellite {satellite}")]
    CatalogMiss { satellite: String },
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("outbound queue for connection {0} is full")]
    Backpressure(ConnectionId),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("failed to encode outbound event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Code sent to observers in `audio_error` replies.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::ControllerUnavailable => "controller_unavailable",
            RelayError::SessionBusy { .. } => "session_busy",
            RelayError::NotSessionOwner(_) => "not_session_owner",
            RelayError::CatalogMiss { .. } => "catalog_miss",
            RelayError::UnknownConnection(_) => "unknown_connection",
            RelayError::Backpressure(_) => "backpressure",
            RelayError::ConnectionClosed(_) => "connection_closed",
            RelayError::Encode(_) => "encode",
        }
    }
}

/// Failure to turn an inbound frame into a [`crate::protocol::ClientEvent`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not a valid event envelope: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ProtocolError::Json(_) => "invalid_json",
            ProtocolError::UnknownEvent(_) => "unknown_event",
            ProtocolError::InvalidPayload { .. } => "invalid_payload",
        }
    }
}
