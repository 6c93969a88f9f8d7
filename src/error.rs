//! Error types for the driver core.

use thiserror::Error;

/// Class of a server-reported query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// The server could not make sense of the client message (`t` = 16).
    Client,
    /// The query failed to compile (`t` = 17).
    Compile,
    /// The query failed while running (`t` = 18).
    Runtime,
}

impl ServerErrorKind {
    pub(crate) fn from_code(code: i32) -> Option<Self> {
        match code {
            16 => Some(ServerErrorKind::Client),
            17 => Some(ServerErrorKind::Compile),
            18 => Some(ServerErrorKind::Runtime),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerErrorKind::Client => write!(f, "client error"),
            ServerErrorKind::Compile => write!(f, "compile error"),
            ServerErrorKind::Runtime => write!(f, "runtime error"),
        }
    }
}

/// Main error type for all driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level read/write failure. Fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize an outgoing query.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server refused the version/auth handshake.
    #[error("handshake with {host}:{port} failed: {banner}")]
    Handshake {
        banner: String,
        host: String,
        port: u16,
    },

    /// The TCP connection could not be established in time.
    #[error("timed out connecting to {host}:{port}")]
    ConnectTimeout { host: String, port: u16 },

    /// Malformed frame, unknown response type, or other wire violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered the query with an error response.
    #[error("{kind}: {message}")]
    Server {
        kind: ServerErrorKind,
        message: String,
        /// The `b` field of the response, when present.
        backtrace: Option<serde_json::Value>,
        /// The wire envelope that triggered the failure.
        query: serde_json::Value,
    },

    /// CONTINUE was issued for a token that already saw its terminal response.
    #[error("cursor exhausted")]
    CursorExhausted,

    /// The connection reached its terminal closed state while the call was
    /// still waiting on the server.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_kind_codes() {
        assert_eq!(ServerErrorKind::from_code(16), Some(ServerErrorKind::Client));
        assert_eq!(ServerErrorKind::from_code(17), Some(ServerErrorKind::Compile));
        assert_eq!(ServerErrorKind::from_code(18), Some(ServerErrorKind::Runtime));
        assert_eq!(ServerErrorKind::from_code(1), None);
    }

    #[test]
    fn server_error_display_carries_message() {
        let err = Error::Server {
            kind: ServerErrorKind::Runtime,
            message: "No such table".into(),
            backtrace: None,
            query: serde_json::Value::Null,
        };
        assert_eq!(err.to_string(), "runtime error: No such table");
    }
}
