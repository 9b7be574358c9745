//! Bridge error types.

use std::io;

use thiserror::Error;
use warpgrid_host_api::HostError;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the bridge to blocking callers.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A host payload did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The host rejected an operation or errored a stream.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// A socket operation outlived the deadline captured when it started.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{0} must register before invoking")]
    NotRegistered(&'static str),

    #[error("ready has already been signalled")]
    AlreadyReady,

    #[error("no handler registered; ready would leave the host with nothing to invoke")]
    NoHandlers,

    /// The host dropped a pending operation without settling it.
    #[error("host abandoned the pending operation")]
    Abandoned,

    #[error("connection closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Whether this error is a deadline expiry, including one carried
    /// inside an `io::Error`.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded => true,
            Self::Io(err) => is_deadline_exceeded(err),
            _ => false,
        }
    }

    /// Render for the host as an `Error` object.
    pub fn to_host_error(&self) -> HostError {
        match self {
            Self::Host(err) => err.clone(),
            other => HostError::new(other.to_string()),
        }
    }
}

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        let kind = match err {
            BridgeError::Io(inner) => return inner,
            BridgeError::DeadlineExceeded => io::ErrorKind::TimedOut,
            BridgeError::Closed => io::ErrorKind::NotConnected,
            BridgeError::Decode(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Whether an `io::Error` came from a bridge deadline expiry.
pub fn is_deadline_exceeded(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
        && err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<BridgeError>())
            .is_some_and(BridgeError::is_deadline_exceeded)
}
