// ABOUTME: RPC error types shared by the client multiplexer, server dispatcher, and facade
// ABOUTME: Structured error reporting with automatic conversion from framing and I/O failures

use crate::frame::FrameError;
use std::io;
use thiserror::Error;

/// Error kinds surfaced to RPC callers (spec.md section 7).
#[derive(Debug, Error)]
pub enum RpcError {
    /// Method name absent from the learned method table.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The client facade has no reachable instance.
    #[error("no reachable instance")]
    NoInstance,

    /// The pending map is full or the send queue is saturated.
    #[error("connection overloaded")]
    Overloaded,

    /// The call deadline or the I/O deadline expired.
    #[error("call timed out")]
    Timeout,

    /// The `Conn` or server is shutting down.
    #[error("connection shut down")]
    Shutdown,

    /// The application payload codec failed to encode the request.
    #[error("encode error: {0}")]
    Encode(String),

    /// The application payload codec failed to decode the response.
    #[error("decode error: {0}")]
    Decode(String),

    /// The peer's dispatcher caught a handler error and replied with the
    /// `ERROR_CMD` control frame instead of tearing down the connection
    /// (spec.md section 9 REDESIGN FLAG "error replies shouldn't kill the
    /// connection"). Carries the handler's UTF-8 error message verbatim.
    #[error("remote handler error: {0}")]
    Application(String),

    /// A socket-level error occurred.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Malformed framing; fatal to the connection.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl RpcError {
    /// Transport errors are the only ones `invoke`'s retry loop re-tries
    /// (spec.md section 4.4 "Retries"): `IoError`, `Timeout`, `Overloaded`.
    /// Codec errors and `UnknownMethod` short-circuit without retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_) | RpcError::Timeout | RpcError::Overloaded
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
