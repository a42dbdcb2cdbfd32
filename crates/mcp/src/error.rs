//! MCP error types.

use thiserror::Error;

/// Errors raised while talking to a single tool server.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// The channel to the server could not be established or was lost.
    ///
    /// Covers spawn failures (missing binary, permission denied), HTTP
    /// connection failures (DNS, refused, TLS), a closed transport and
    /// request timeouts.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server configuration is missing a field its transport needs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server reported a failure while executing a tool.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
}

impl Error {
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }

    pub fn protocol(cause: impl std::fmt::Display) -> Self {
        Self::Protocol(cause.to_string())
    }

    pub fn configuration(cause: impl Into<String>) -> Self {
        Self::Configuration(cause.into())
    }

    /// Whether this error was raised before any I/O happened.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
