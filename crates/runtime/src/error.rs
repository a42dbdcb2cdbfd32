use thiserror::Error;

use crate::model::ModelError;

/// Errors raised by the registry and chat runtime.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("server not connected: {0}")]
    NotConnected(String),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Per-call failures from the tool dispatcher.
///
/// The chat loop folds these into the transcript instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// No connected server exposes a tool with this name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The owning server failed while running the tool.
    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
