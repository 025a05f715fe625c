//! Error types for transports and the scan engine.

use thiserror::Error;

/// Text providers and ABI-aware backends use when a filter names an event the contract lacks.
pub const EVENT_NOT_DEFINED_MARKER: &str = "doesn't exist in this contract";

/// Failures of a single request on a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    /// Socket is closed and auto-reconnect is off.
    #[error("web socket is not connected")]
    NotConnected,

    #[error("web socket closed before a response arrived")]
    Disconnected,

    #[error("request timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("web socket error: {0}")]
    WebSocket(String),

    #[error("response ends with bad status code: {0}")]
    Status(u16),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("external process failed: {0}")]
    Process(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Errors surfaced by the resilient call layer and the scanners.
///
/// Absence of events is never an error: scanners return an empty `Vec` instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The liveness probe could not reach the endpoint between attempts.
    #[error("cannot {operation} via {url} because server is off-line")]
    EndpointOffline { url: String, operation: String },

    #[error("Event \"{event}\" {}", EVENT_NOT_DEFINED_MARKER)]
    EventNotDefined { event: String },

    /// Every attempt failed while the endpoint stayed reachable.
    #[error("failed call to {operation} via {url} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        url: String,
        operation: String,
        attempts: usize,
        last_error: String,
    },

    #[error("topic index {index} out of range, logs carry at most 4 topics")]
    InvalidTopic { index: usize },

    #[error("cannot resolve block range: {0}")]
    RangeResolution(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl ScanError {
    /// True when retrying cannot help because the contract has no such event.
    pub fn is_event_not_defined(&self) -> bool {
        match self {
            ScanError::EventNotDefined { .. } => true,
            ScanError::Transport(TransportError::Rpc { message, .. })
            | ScanError::Transport(TransportError::Process(message)) => {
                message.contains(EVENT_NOT_DEFINED_MARKER)
            }
            _ => false,
        }
    }

    /// Errors that abort a scan outright instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Transport(TransportError::InvalidUrl(_)) | ScanError::RangeResolution(_)
        )
    }

    /// False when another attempt would fail the same way: fatal errors and undecodable responses.
    pub fn is_retryable(&self) -> bool {
        !(self.is_fatal() || matches!(self, ScanError::Decode(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_not_defined_message_matches_marker() {
        let err = ScanError::EventNotDefined { event: "OutgoingMessage".into() };
        assert_eq!(err.to_string(), "Event \"OutgoingMessage\" doesn't exist in this contract");
        assert!(err.is_event_not_defined());
    }

    #[test]
    fn rpc_message_with_marker_is_event_not_defined() {
        let err: ScanError = TransportError::Rpc {
            code: -32000,
            message: "Event \"Foo\" doesn't exist in this contract".into(),
        }
        .into();
        assert!(err.is_event_not_defined());

        let other: ScanError = TransportError::Rpc { code: -32000, message: "boom".into() }.into();
        assert!(!other.is_event_not_defined());
    }

    #[test]
    fn fatal_errors() {
        assert!(ScanError::from(TransportError::InvalidUrl("nope".into())).is_fatal());
        assert!(ScanError::RangeResolution("bad".into()).is_fatal());
        assert!(!ScanError::from(TransportError::Timeout).is_fatal());
        assert!(!ScanError::EndpointOffline { url: "u".into(), operation: "op".into() }.is_fatal());
    }

    #[test]
    fn decode_errors_are_not_retried() {
        assert!(!ScanError::Decode("missing transactionHash".into()).is_retryable());
        assert!(!ScanError::Decode("x".into()).is_fatal());
        assert!(!ScanError::RangeResolution("bad".into()).is_retryable());
        assert!(ScanError::from(TransportError::Timeout).is_retryable());
    }
}
