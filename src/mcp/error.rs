//! Error taxonomy for the MCP client and the tool-calling engine.
//!
//! Transport and session errors during discovery are recovered locally into
//! partial results; errors during an actual tool invocation become tool-role
//! conversation turns. Model backend failures terminate the chat request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("initialize handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("transport is closed")]
    Closed,
    #[error("transport is not connected")]
    NotConnected,
    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode),
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed server message: {0}")]
    Decode(String),
    #[error("event stream ended unexpectedly: {0}")]
    Stream(String),
}

/// Wraps a transport failure with session-state context.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("server {server}: {source}")]
    Transport {
        server: String,
        #[source]
        source: TransportError,
    },
    #[error("server {0} is disabled")]
    Disabled(String),
    #[error("session to {0} is shut down")]
    Closed(String),
}

impl SessionError {
    pub fn server(&self) -> &str {
        match self {
            SessionError::Transport { server, .. } => server,
            SessionError::Disabled(server) | SessionError::Closed(server) => server,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no enabled server advertises tool {0:?}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum ModelBackendError {
    #[error("model backend unreachable: {0}")]
    Unreachable(String),
    #[error("model backend returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed model response: {0}")]
    Malformed(String),
}

/// Caller-facing error type for [`crate::core::engine::ChatEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelBackendError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error("unknown server {0:?}")]
    UnknownServer(String),
    #[error("failed to initialize HTTP client: {0}")]
    Init(String),
    #[error("operation cancelled")]
    Cancelled,
}
