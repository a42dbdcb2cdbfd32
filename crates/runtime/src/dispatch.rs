//! Routing tool calls and execution requests to connected servers.

use std::future::Future;
use std::sync::Arc;

use mcp::{Connector, ContentPart, JsonObject, ServerSession, normalize_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::model::FunctionDeclaration;
use crate::registry::ConnectionRegistry;

/// Raw output of a dispatched tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Server that handled the call.
    pub server_id: String,
    pub content: Vec<ContentPart>,
}

impl ToolOutput {
    pub fn text(&self) -> String {
        normalize_text(&self.content)
    }
}

/// A tagged request against one specific server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ExecuteRequest {
    Tool {
        server_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<JsonObject>,
    },
    Prompt {
        server_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<JsonObject>,
    },
    Resource {
        server_id: String,
        uri: String,
    },
}

impl ExecuteRequest {
    pub fn server_id(&self) -> &str {
        match self {
            Self::Tool { server_id, .. }
            | Self::Prompt { server_id, .. }
            | Self::Resource { server_id, .. } => server_id,
        }
    }
}

/// Outcome of an [`ExecuteRequest`]: content on success, a message otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteResult {
    pub fn success(content: Vec<ContentPart>) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    /// Run `name` on the first connected server, in registry order, that
    /// exposes it, and return its raw content.
    pub async fn call_tool_by_name(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolOutput, DispatchError> {
        let Some((server_id, session)) = self.tool_owner(name) else {
            debug!(tool = name, "no connected server exposes tool");
            return Err(DispatchError::ToolNotFound(name.to_string()));
        };
        let arguments = object_arguments(name, arguments)?;

        debug!(server_id = %server_id, tool = name, "dispatching tool call");
        match session.call_tool(name, arguments).await {
            Ok(content) => Ok(ToolOutput { server_id, content }),
            Err(e) => {
                warn!(server_id = %server_id, tool = name, error = %e, "tool call failed");
                Err(DispatchError::ToolExecution {
                    tool: name.to_string(),
                    message: failure_message(e),
                })
            }
        }
    }

    /// Like [`call_tool_by_name`](Self::call_tool_by_name) with the result
    /// normalized to newline-joined text.
    pub async fn call_by_name(&self, name: &str, arguments: Value) -> Result<String, DispatchError> {
        self.call_tool_by_name(name, arguments)
            .await
            .map(|output| output.text())
    }

    /// Run a tagged request against the server it names.
    ///
    /// Never fails outright; problems come back as an unsuccessful result.
    pub async fn execute(&self, request: ExecuteRequest) -> ExecuteResult {
        let Some(session) = self.live_session(request.server_id()) else {
            return ExecuteResult::failure(format!(
                "server {} is not connected",
                request.server_id()
            ));
        };

        let outcome = match &request {
            ExecuteRequest::Tool {
                name, arguments, ..
            } => session.call_tool(name, arguments.clone()).await,
            ExecuteRequest::Prompt {
                name, arguments, ..
            } => session.get_prompt(name, arguments.clone()).await,
            ExecuteRequest::Resource { uri, .. } => session.read_resource(uri).await,
        };

        match outcome {
            Ok(content) => ExecuteResult::success(content),
            Err(e) => {
                warn!(server_id = request.server_id(), error = %e, "execute request failed");
                ExecuteResult::failure(e.to_string())
            }
        }
    }
}

fn object_arguments(tool: &str, arguments: Value) -> Result<Option<JsonObject>, DispatchError> {
    match arguments {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(DispatchError::ToolExecution {
            tool: tool.to_string(),
            message: format!("arguments must be a JSON object, got {other}"),
        }),
    }
}

fn failure_message(error: mcp::Error) -> String {
    match error {
        mcp::Error::ToolExecution(message) => message,
        other => other.to_string(),
    }
}

/// Where the chat loop gets its tools from.
pub trait ToolHost: Send + Sync {
    /// Declarations offered to the model this turn.
    fn function_declarations(&self) -> Vec<FunctionDeclaration>;

    /// Execute a tool by name and return normalized text.
    fn call_by_name(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<String, DispatchError>> + Send;
}

impl<C: Connector> ToolHost for ConnectionRegistry<C> {
    fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.all_function_declarations()
    }

    async fn call_by_name(&self, name: &str, arguments: Value) -> Result<String, DispatchError> {
        ConnectionRegistry::call_by_name(self, name, arguments).await
    }
}

impl<T: ToolHost> ToolHost for Arc<T> {
    fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        T::function_declarations(self)
    }

    fn call_by_name(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<String, DispatchError>> + Send {
        T::call_by_name(self, name, arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeConnector, FakeServer};
    use mcp::ServerConfig;
    use serde_json::json;

    async fn registry(servers: &[(&str, FakeServer)]) -> ConnectionRegistry<FakeConnector> {
        let connector = servers
            .iter()
            .fold(FakeConnector::new(), |connector, (id, server)| {
                connector.with_server(*id, server.clone())
            });
        let registry = ConnectionRegistry::new(connector);
        for (id, _) in servers {
            registry
                .connect(&ServerConfig::stdio(*id, *id, "fake"))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn first_connected_server_wins() {
        let registry = registry(&[
            ("a", FakeServer::with_tools(&["read"])),
            ("b", FakeServer::with_tools(&["read"])),
        ])
        .await;

        for _ in 0..3 {
            let output = registry.call_tool_by_name("read", json!({})).await.unwrap();
            assert_eq!(output.server_id, "a");
            assert_eq!(output.text(), "a:read");
        }

        registry.disconnect("a").await;
        let output = registry.call_tool_by_name("read", json!({})).await.unwrap();
        assert_eq!(output.server_id, "b");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = registry(&[("a", FakeServer::with_tools(&["read"]))]).await;
        let err = registry.call_by_name("unknown-tool", json!({})).await.unwrap_err();
        assert_eq!(err, DispatchError::ToolNotFound("unknown-tool".into()));
    }

    #[tokio::test]
    async fn execution_failure_keeps_server_message() {
        let server = FakeServer::with_tools(&["explode"])
            .with_reply("explode", Err(mcp::Error::ToolExecution("boom".into())));
        let registry = registry(&[("a", server)]).await;

        let err = registry.call_by_name("explode", Value::Null).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::ToolExecution {
                tool: "explode".into(),
                message: "boom".into(),
            }
        );
    }

    #[tokio::test]
    async fn result_is_normalized_to_text() {
        let server = FakeServer::with_tools(&["mixed"]).with_reply(
            "mixed",
            Ok(vec![
                ContentPart::text("line one"),
                ContentPart::Image {
                    data: "AAAA".into(),
                    mime_type: "image/png".into(),
                },
                ContentPart::text("line two"),
            ]),
        );
        let registry = registry(&[("a", server)]).await;

        let text = registry.call_by_name("mixed", json!({})).await.unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[tokio::test]
    async fn non_object_arguments_are_rejected() {
        let registry = registry(&[("a", FakeServer::with_tools(&["read"]))]).await;
        let err = registry.call_by_name("read", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, DispatchError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn execute_covers_every_kind() {
        let server = FakeServer::with_tools(&["ping"])
            .with_prompt_reply(vec![ContentPart::text("Summarize this")])
            .with_resource_reply(vec![ContentPart::Resource {
                uri: "file:///notes.md".into(),
                mime_type: Some("text/markdown".into()),
                text: Some("# notes".into()),
            }]);
        let registry = registry(&[("a", server)]).await;

        let result = registry
            .execute(ExecuteRequest::Tool {
                server_id: "a".into(),
                name: "ping".into(),
                arguments: None,
            })
            .await;
        assert!(result.success);
        assert_eq!(result.content.unwrap(), vec![ContentPart::text("a:ping")]);

        let result = registry
            .execute(ExecuteRequest::Prompt {
                server_id: "a".into(),
                name: "summarize".into(),
                arguments: None,
            })
            .await;
        assert_eq!(
            result.content.unwrap(),
            vec![ContentPart::text("Summarize this")]
        );

        let result = registry
            .execute(ExecuteRequest::Resource {
                server_id: "a".into(),
                uri: "file:///notes.md".into(),
            })
            .await;
        assert!(result.success);
        assert!(matches!(
            result.content.unwrap()[0],
            ContentPart::Resource { .. }
        ));
    }

    #[tokio::test]
    async fn execute_against_disconnected_server_fails_softly() {
        let registry = registry(&[]).await;
        let result = registry
            .execute(ExecuteRequest::Resource {
                server_id: "missing".into(),
                uri: "file:///x".into(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("server missing is not connected"));
    }

    #[test]
    fn execute_request_wire_shape() {
        let request: ExecuteRequest = serde_json::from_value(json!({
            "kind": "tool",
            "serverId": "fs",
            "name": "read",
            "arguments": {"path": "/tmp/a"}
        }))
        .unwrap();
        assert_eq!(request.server_id(), "fs");

        let result = serde_json::to_value(ExecuteResult::failure("nope")).unwrap();
        assert_eq!(result, json!({"success": false, "error": "nope"}));
    }
}
