//! Tool-server client library.
//!
//! Connects to Model Context Protocol servers over a spawned subprocess
//! (stdio) or a streaming HTTP endpoint, discovers what they offer and
//! executes tools, prompts and resources on them.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{ServerConfig, ServerConnection, normalize_text};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::stdio("fs", "Filesystem", "mcp-server-filesystem")
//!     .with_args(["./workspace"]);
//!
//! let connection = ServerConnection::open(&config, None).await?;
//! for tool in connection.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut arguments = mcp::JsonObject::new();
//! arguments.insert("path".into(), "./README.md".into());
//! let parts = connection.call_tool("read_file", Some(arguments)).await?;
//! println!("{}", normalize_text(&parts));
//!
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

mod capability;
mod config;
mod connection;
mod content;
mod error;
mod session;
mod transport;

pub use capability::{CapabilitySet, PromptArgumentInfo, PromptInfo, ResourceInfo, ToolInfo};
pub use config::{ServerConfig, TransportKind, TransportSpec};
pub use connection::ServerConnection;
pub use content::{ContentPart, normalize_text};
pub use error::{Error, Result};
pub use rmcp::model::JsonObject;
pub use session::{Connector, McpConnector, ServerSession};
