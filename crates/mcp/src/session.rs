//! Abstractions over an open server session and how one is opened.
//!
//! The registry and dispatcher only see these traits, so tests can swap in
//! in-memory servers without spawning processes.

use std::future::Future;
use std::time::Duration;

use rmcp::model::JsonObject;

use crate::capability::{PromptInfo, ResourceInfo, ToolInfo};
use crate::config::ServerConfig;
use crate::connection::ServerConnection;
use crate::content::ContentPart;
use crate::error::Result;

/// Operations available on an initialized server session.
pub trait ServerSession: Send + Sync + 'static {
    fn list_tools(&self) -> impl Future<Output = Result<Vec<ToolInfo>>> + Send;

    fn list_prompts(&self) -> impl Future<Output = Result<Vec<PromptInfo>>> + Send;

    fn list_resources(&self) -> impl Future<Output = Result<Vec<ResourceInfo>>> + Send;

    fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> impl Future<Output = Result<Vec<ContentPart>>> + Send;

    fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> impl Future<Output = Result<Vec<ContentPart>>> + Send;

    fn read_resource(&self, uri: &str) -> impl Future<Output = Result<Vec<ContentPart>>> + Send;

    /// Release the session. Must be idempotent.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens sessions from configuration records.
pub trait Connector: Send + Sync + 'static {
    type Session: ServerSession;

    fn open(&self, config: &ServerConfig) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Connector that opens real MCP sessions over stdio or streaming HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnector {
    request_timeout: Option<Duration>,
}

impl McpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the handshake and every request on sessions opened by this connector.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Connector for McpConnector {
    type Session = ServerConnection;

    async fn open(&self, config: &ServerConfig) -> Result<ServerConnection> {
        ServerConnection::open(config, self.request_timeout).await
    }
}

impl ServerSession for ServerConnection {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        ServerConnection::list_tools(self).await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>> {
        ServerConnection::list_prompts(self).await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>> {
        ServerConnection::list_resources(self).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<Vec<ContentPart>> {
        ServerConnection::call_tool(self, name, arguments).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<Vec<ContentPart>> {
        ServerConnection::get_prompt(self, name, arguments).await
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ContentPart>> {
        ServerConnection::read_resource(self, uri).await
    }

    async fn close(&self) -> Result<()> {
        ServerConnection::close(self).await
    }
}
