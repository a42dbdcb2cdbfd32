use thiserror::Error;

/// Errors raised while reading, writing or importing a catalog.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed as JSON but is not an export bundle.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
}

pub type Result<T> = std::result::Result<T, Error>;
