//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No catalog record has the given id.
    #[error("no server '{id}' in the catalog. Run 'toolbridge servers' to list them")]
    ServerNotFound { id: String },

    /// A command-line argument could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An execute request against a server failed.
    #[error("{0}")]
    Execution(String),

    /// Configuration is invalid or missing required fields.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An error occurred talking to a tool server.
    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    /// An error occurred in the server catalog.
    #[error(transparent)]
    Catalog(#[from] catalog::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
