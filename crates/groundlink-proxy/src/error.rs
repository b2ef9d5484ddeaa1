use std::net::SocketAddr;

use groundlink_link::LinkError;

/// Errors that can occur setting up or driving the proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The TCP fan-out listener could not be bound.
    #[error("failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// A link socket could not be opened.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// The readiness wait itself failed.
    #[error("poll failed: {0}")]
    Poll(std::io::Error),

    /// An I/O error occurred outside the per-descriptor paths.
    #[error("proxy I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The proxy has already shut down.
    #[error("proxy is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
