//! Error types for tether-client.

use thiserror::Error;

/// All errors that can arise talking to the registry / config center.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached (DNS, connect, timeout).
    #[error("transport error talking to {server}: {message}")]
    Transport { server: String, message: String },

    /// The server answered with a non-success status.
    #[error("{server} answered HTTP {code}: {body}")]
    Status {
        server: String,
        code: u16,
        body: String,
    },

    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error reading response: {0}")]
    Io(#[from] std::io::Error),

    /// `server_addresses` contained no usable entry.
    #[error("no server addresses configured")]
    NoServers,

    /// The backend refused the operation.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}
