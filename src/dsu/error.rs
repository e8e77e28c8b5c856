use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DsuError {
    #[error("Failed to bind DSU socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The motion queue is full; the sample was dropped
    #[error("DSU event queue is full")]
    QueueFull,

    #[error("DSU server is not running")]
    Stopped,

    #[error("DSU server task failed: {0}")]
    TaskFailed(String),
}
