//! Relay-wide error type

use std::io;

use thiserror::Error;

/// Top-level relay error
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error(transparent)]
    IO(#[from] io::Error),
    /// WebSocket protocol error
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Storage error
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    /// Malformed event, filter or wire frame
    #[error("{0}")]
    Protocol(String),
    /// No port available when one was requested automatically
    #[error("no port available")]
    NoPortAvailable,
    /// Channel send failed because the receiving side went away
    #[error("channel closed")]
    ChannelClosed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

/// Convenience alias
pub type Result<T, E = Error> = std::result::Result<T, E>;
