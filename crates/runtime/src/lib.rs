//! Toolbridge runtime: the connection registry and the tool-calling chat loop.
//!
//! # Overview
//!
//! - **ConnectionRegistry**: process-wide table of tool-server connections
//!   and their lifecycle states. Also discovers capabilities, builds the
//!   model-facing declarations and dispatches tool calls by name.
//! - **Orchestrator** / **ChatSession**: drive bounded model rounds,
//!   executing requested tool calls in order and streaming [`ChatEvent`]s.
//! - **Backend**: trait abstracting model providers ([`GeminiBackend`]).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp::{McpConnector, ServerConfig};
//! use runtime::{ChatSession, ConnectionRegistry, GeminiBackend, OrchestratorConfig};
//!
//! # async fn example() -> runtime::Result<()> {
//! let registry = Arc::new(ConnectionRegistry::new(McpConnector::new()));
//! registry
//!     .connect(&ServerConfig::stdio("fs", "Filesystem", "mcp-server-filesystem"))
//!     .await?;
//!
//! let backend = GeminiBackend::from_env("gemini-2.5-flash")?.build();
//! let mut session = ChatSession::new(backend, Arc::clone(&registry), OrchestratorConfig::default());
//! # let (tx, _rx) = tokio::sync::mpsc::channel(16);
//! session.run_turn("What is in my workspace?", &tx, &Default::default()).await?;
//!
//! registry.disconnect_all().await;
//! # Ok(())
//! # }
//! ```

mod capabilities;
mod dispatch;
mod error;
pub mod model;
mod orchestrator;
pub mod providers;
mod registry;

#[cfg(test)]
mod test_support;

pub use capabilities::discover;
pub use dispatch::{ExecuteRequest, ExecuteResult, ToolHost, ToolOutput};
pub use error::{DispatchError, Error, Result};
pub use model::{
    Backend, FunctionDeclaration, Message, ModelError, ModelRequest, ModelResponse, Part, Role,
    ToolCall, ToolChoice, ToolOutcome, ToolResult, Usage,
};
pub use orchestrator::{
    CallStatus, ChatEvent, ChatSession, FunctionCallRecord, MAX_ROUNDS, Orchestrator,
    OrchestratorConfig, ROUND_LIMIT_NOTICE, TurnEnd, TurnOutcome,
};
pub use providers::{GeminiBackend, GeminiBackendBuilder};
pub use registry::{ConnectionRegistry, ConnectionStatus, ServerState, ServerSummary};
