use std::net::SocketAddr;
use thiserror::Error;

use super::capture::CaptureError;
use super::protocol::FormatError;

#[derive(Debug, Error)]
pub enum VbanError {
    /// Captured format cannot be expressed in a VBAN header
    #[error("Unsupported audio format: {0}")]
    Format(#[from] FormatError),

    #[error("Audio capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Failed to bind VBAN socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("VBAN emitter task failed: {0}")]
    TaskFailed(String),
}
