//! Model provider adapters.
//!
//! Each provider implements the backend trait for its specific API.

pub mod gemini;

pub use gemini::{GeminiBackend, GeminiBackendBuilder};
