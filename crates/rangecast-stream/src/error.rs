#![forbid(unsafe_code)]

use rangecast_net::NetError;
use thiserror::Error;

/// Failure to learn the content length of a source. Fatal to the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("source did not report a definite content length")]
    LengthUnknown,
}

impl From<NetError> for ProbeError {
    fn from(error: NetError) -> Self {
        Self::Unreachable(error.to_string())
    }
}

/// Failure of a single chunk read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("transport error: {0}")]
    Transport(String),
    /// The fetch batch was invalidated (seek or disposal).
    #[error("fetch cancelled")]
    Cancelled,
    #[error("expected {expected} bytes, received {actual}")]
    UnexpectedLength { expected: u64, actual: u64 },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<NetError> for FetchError {
    fn from(error: NetError) -> Self {
        match error.status_code() {
            Some(status) => Self::Http(status),
            None => Self::Transport(error.to_string()),
        }
    }
}

/// Failure reported by a [`MediaSink`](crate::MediaSink).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("append rejected: {0}")]
    AppendRejected(String),
    #[error("end of stream already signalled")]
    AlreadyEnded,
    #[error("sink is not open")]
    NotOpen,
}

/// Errors surfaced to the owner of a [`StreamSession`](crate::StreamSession).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session disposed")]
    Disposed,
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
