//! Newline-delimited JSON transport over a Unix domain socket.

mod client;
mod dispatch;
mod message;
mod server;

pub use client::RpcClient;
pub use dispatch::CsiDriver;
pub use message::{CsiRequest, CsiResponse};
pub use server::RpcServer;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Largest request line the server accepts, newline included. Longer
/// requests are answered with an error and the connection is closed.
pub const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Errors raised by the socket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Raised when the socket cannot be bound, connected, read or written.
    #[error("{action} {path}: {source}")]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Raised when a message cannot be encoded or decoded.
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    /// Raised when the peer closes the connection before answering.
    #[error("connection closed by peer")]
    Closed,
}
