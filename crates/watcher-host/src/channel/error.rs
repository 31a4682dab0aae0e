//! Error types for control channels.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use super::ControlCall;

/// Errors raised while dialling or talking to a plugin.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No connection could be established before the dial budget ran out.
    #[error("failed to connect to port {port} after {attempts} attempt(s): {source}")]
    Connect {
        /// Port that was dialled.
        port: u16,
        /// Number of dial attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: Arc<io::Error>,
    },

    /// The call did not complete before its deadline.
    #[error("{call} timed out after {timeout_ms}ms")]
    Timeout {
        /// Call that timed out.
        call: ControlCall,
        /// Budget the call was given.
        timeout_ms: u64,
    },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialisation or deserialisation failed.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The plugin answered with a JSON-RPC error object.
    #[error("plugin returned error: {message} (code: {code})")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the plugin.
        message: String,
    },

    /// The plugin answered with something other than the expected response.
    #[error("unexpected response to {call}: {message}")]
    UnexpectedResponse {
        /// Call that was in flight.
        call: ControlCall,
        /// Description of the protocol violation.
        message: String,
    },

    /// The channel was closed or left unusable by an earlier failure.
    #[error("control channel is closed")]
    Closed,
}

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Invalid header format.
    #[error("invalid header format")]
    InvalidHeader,

    /// The peer announced a frame larger than the transport accepts.
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced payload length.
        length: usize,
        /// Largest accepted payload.
        limit: usize,
    },
}

impl TransportError {
    /// Returns `true` when the error is a socket read or write timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(error)
                if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }

    /// Returns `true` when the peer closed the stream.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                )
        )
    }
}
