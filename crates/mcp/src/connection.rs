//! A live session with one tool server, built on the rmcp client.
//!
//! # Example
//!
//! ```ignore
//! use mcp::{ServerConfig, ServerConnection};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::stdio("fs", "Filesystem", "mcp-server-filesystem")
//!     .with_args(["./workspace"]);
//! let connection = ServerConnection::open(&config, None).await?;
//!
//! for tool in connection.list_tools().await? {
//!     println!("tool: {}", tool.name);
//! }
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, GetPromptRequestParams, Implementation,
    JsonObject, ReadResourceRequestParams,
};
use rmcp::service::{ClientInitializeError, Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::IntoTransport;
use rmcp::ServiceExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capability::{PromptInfo, ResourceInfo, ToolInfo};
use crate::config::{ServerConfig, TransportSpec};
use crate::content::{ContentPart, normalize_text};
use crate::error::{Error, Result};
use crate::transport;

type Service = RunningService<RoleClient, ClientInfo>;

/// An open, initialized session with a tool server.
///
/// Requests may be issued concurrently from shared references. Closing is
/// idempotent; requests after close fail with [`Error::Transport`].
pub struct ServerConnection {
    id: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<Service>>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ServerConnection {
    /// Validate `config`, open its transport and run the initialize handshake.
    ///
    /// `request_timeout` bounds the handshake and every later request.
    pub async fn open(config: &ServerConfig, request_timeout: Option<Duration>) -> Result<Self> {
        let spec = config.validate()?;
        let info = client_info();

        info!(server = %config.id, transport = %config.transport, "connecting to tool server");

        let connect = async {
            match spec {
                TransportSpec::Subprocess { command, args, env } => {
                    handshake(info, transport::spawn_process(&command, &args, &env)?).await
                }
                TransportSpec::HttpStream { url, headers } => {
                    handshake(info, transport::http_stream(&url, &headers)?).await
                }
            }
        };

        let service = match request_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                Error::transport(format!("handshake with {} timed out after {limit:?}", config.id))
            })??,
            None => connect.await?,
        };

        let connection = Self {
            id: config.id.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            request_timeout,
        };
        debug!(server = %connection.id, peer = ?connection.server_name(), "handshake complete");
        Ok(connection)
    }

    /// Identifier of the configuration this connection was opened from.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name the server reported during the handshake.
    pub fn server_name(&self) -> Option<String> {
        self.peer
            .peer_info()
            .map(|info| info.server_info.name.clone())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let tools = self
            .round_trip("tools/list", self.peer.list_all_tools(), Error::Protocol)
            .await?;
        Ok(tools.into_iter().map(ToolInfo::from).collect())
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>> {
        let prompts = self
            .round_trip("prompts/list", self.peer.list_all_prompts(), Error::Protocol)
            .await?;
        Ok(prompts.into_iter().map(PromptInfo::from).collect())
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>> {
        let resources = self
            .round_trip(
                "resources/list",
                self.peer.list_all_resources(),
                Error::Protocol,
            )
            .await?;
        Ok(resources.into_iter().map(ResourceInfo::from).collect())
    }

    /// Invoke a tool and return its content parts.
    ///
    /// A server-side failure, either a JSON-RPC error or a result flagged
    /// `isError`, is reported as [`Error::ToolExecution`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<Vec<ContentPart>> {
        debug!(server = %self.id, tool = name, "calling tool");

        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments,
            task: None,
        };
        let result = self
            .round_trip("tools/call", self.peer.call_tool(params), Error::ToolExecution)
            .await?;

        let parts: Vec<ContentPart> = result.content.into_iter().map(ContentPart::from).collect();
        if result.is_error == Some(true) {
            let message = normalize_text(&parts);
            warn!(server = %self.id, tool = name, %message, "tool reported an error");
            return Err(Error::ToolExecution(if message.is_empty() {
                format!("tool {name} failed")
            } else {
                message
            }));
        }
        Ok(parts)
    }

    /// Render a prompt; every message's content becomes one part.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<Vec<ContentPart>> {
        let params = GetPromptRequestParams {
            meta: None,
            name: name.to_string(),
            arguments,
        };
        let result = self
            .round_trip("prompts/get", self.peer.get_prompt(params), Error::Protocol)
            .await?;
        Ok(result
            .messages
            .into_iter()
            .map(|message| ContentPart::from(message.content))
            .collect())
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ContentPart>> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let result = self
            .round_trip("resources/read", self.peer.read_resource(params), Error::Protocol)
            .await?;
        Ok(result.contents.into_iter().map(ContentPart::from).collect())
    }

    /// Whether [`close`](Self::close) ran or the server went away.
    pub fn is_closed(&self) -> bool {
        self.peer.is_transport_closed()
    }

    /// Shut the session down and release the transport.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let Some(mut service) = self.service.lock().await.take() else {
            return Ok(());
        };

        match service.close().await {
            Ok(reason) => {
                debug!(server = %self.id, ?reason, "connection closed");
                Ok(())
            }
            Err(e) => Err(Error::transport(format!(
                "failed to close connection to {}: {e}",
                self.id
            ))),
        }
    }

    async fn round_trip<T>(
        &self,
        method: &str,
        request: impl Future<Output = std::result::Result<T, ServiceError>>,
        on_rpc_error: fn(String) -> Error,
    ) -> Result<T> {
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                Error::transport(format!("{method} to {} timed out after {limit:?}", self.id))
            })?,
            None => request.await,
        };
        outcome.map_err(|e| classify(method, e, on_rpc_error))
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        },
    }
}

async fn handshake<T, E, A>(info: ClientInfo, transport: T) -> Result<Service>
where
    T: IntoTransport<RoleClient, E, A>,
    E: std::error::Error + Send + Sync + 'static,
{
    info.serve(transport).await.map_err(|e| match &e {
        ClientInitializeError::TransportError { .. }
        | ClientInitializeError::ConnectionClosed(_)
        | ClientInitializeError::Cancelled => Error::transport(&e),
        _ => Error::protocol(&e),
    })
}

fn classify(method: &str, err: ServiceError, on_rpc_error: fn(String) -> Error) -> Error {
    match &err {
        ServiceError::McpError(data) => on_rpc_error(data.message.to_string()),
        ServiceError::TransportSend(_)
        | ServiceError::TransportClosed
        | ServiceError::Cancelled { .. }
        | ServiceError::Timeout { .. } => Error::transport(format!("{method}: {err}")),
        _ => Error::protocol(format!("{method}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorData;

    #[test]
    fn rpc_errors_follow_the_request_kind() {
        let err = ServiceError::McpError(ErrorData::invalid_params("bad path", None));
        assert_eq!(
            classify("tools/call", err, Error::ToolExecution),
            Error::ToolExecution("bad path".into())
        );

        let err = ServiceError::McpError(ErrorData::method_not_found::<
            rmcp::model::ListPromptsRequestMethod,
        >());
        assert!(matches!(
            classify("prompts/list", err, Error::Protocol),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn closed_transport_is_transport_error() {
        let err = classify("tools/list", ServiceError::TransportClosed, Error::Protocol);
        match err {
            Error::Transport(message) => assert!(message.starts_with("tools/list")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn client_identifies_itself() {
        let info = client_info();
        assert_eq!(info.client_info.name, "toolbridge");
        assert!(!info.client_info.version.is_empty());
    }

    #[tokio::test]
    async fn open_rejects_invalid_config_before_io() {
        let mut config = ServerConfig::stdio("fs", "Filesystem", "unused");
        config.command = None;
        let err = ServerConnection::open(&config, None).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn open_missing_binary_is_transport_error() {
        let config = ServerConfig::stdio("ghost", "Ghost", "/nonexistent/toolbridge-server");
        let err = ServerConnection::open(&config, None).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {err:?}");
    }
}
