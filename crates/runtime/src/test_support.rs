//! In-memory servers and scripted models for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcp::{
    Connector, ContentPart, JsonObject, PromptInfo, ResourceInfo, ServerConfig, ServerSession,
    ToolInfo,
};
use serde_json::Value;

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolChoice,
    Usage,
};

/// Behavior of one fake tool server.
#[derive(Debug, Clone)]
pub struct FakeServer {
    tools: mcp::Result<Vec<ToolInfo>>,
    prompts: mcp::Result<Vec<PromptInfo>>,
    resources: mcp::Result<Vec<ResourceInfo>>,
    replies: HashMap<String, mcp::Result<Vec<ContentPart>>>,
    prompt_reply: Vec<ContentPart>,
    resource_reply: Vec<ContentPart>,
    open_error: Option<mcp::Error>,
    close_error: Option<mcp::Error>,
}

impl FakeServer {
    /// Server exposing tools that answer `"<server id>:<tool>"`.
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: Ok(names
                .iter()
                .map(|name| ToolInfo {
                    name: name.to_string(),
                    description: None,
                    input_schema: None,
                })
                .collect()),
            prompts: Ok(Vec::new()),
            resources: Ok(Vec::new()),
            replies: HashMap::new(),
            prompt_reply: Vec::new(),
            resource_reply: Vec::new(),
            open_error: None,
            close_error: None,
        }
    }

    pub fn with_tools_result(mut self, tools: mcp::Result<Vec<ToolInfo>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_prompts(mut self, prompts: mcp::Result<Vec<PromptInfo>>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_resources(mut self, resources: mcp::Result<Vec<ResourceInfo>>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_reply(mut self, tool: &str, reply: mcp::Result<Vec<ContentPart>>) -> Self {
        self.replies.insert(tool.to_string(), reply);
        self
    }

    pub fn with_prompt_reply(mut self, content: Vec<ContentPart>) -> Self {
        self.prompt_reply = content;
        self
    }

    pub fn with_resource_reply(mut self, content: Vec<ContentPart>) -> Self {
        self.resource_reply = content;
        self
    }

    pub fn failing_open(mut self, error: mcp::Error) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn failing_close(mut self, error: mcp::Error) -> Self {
        self.close_error = Some(error);
        self
    }

    pub fn into_session(self, id: &str) -> FakeSession {
        FakeSession {
            id: id.to_string(),
            server: self,
            closes: Arc::default(),
        }
    }
}

pub struct FakeSession {
    id: String,
    server: FakeServer,
    closes: Arc<Mutex<HashMap<String, usize>>>,
}

impl ServerSession for FakeSession {
    async fn list_tools(&self) -> mcp::Result<Vec<ToolInfo>> {
        self.server.tools.clone()
    }

    async fn list_prompts(&self) -> mcp::Result<Vec<PromptInfo>> {
        self.server.prompts.clone()
    }

    async fn list_resources(&self) -> mcp::Result<Vec<ResourceInfo>> {
        self.server.resources.clone()
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Option<JsonObject>,
    ) -> mcp::Result<Vec<ContentPart>> {
        if let Some(reply) = self.server.replies.get(name) {
            return reply.clone();
        }
        Ok(vec![ContentPart::text(format!("{}:{name}", self.id))])
    }

    async fn get_prompt(
        &self,
        _name: &str,
        _arguments: Option<JsonObject>,
    ) -> mcp::Result<Vec<ContentPart>> {
        Ok(self.server.prompt_reply.clone())
    }

    async fn read_resource(&self, _uri: &str) -> mcp::Result<Vec<ContentPart>> {
        Ok(self.server.resource_reply.clone())
    }

    async fn close(&self) -> mcp::Result<()> {
        *self.closes.lock().unwrap().entry(self.id.clone()).or_default() += 1;
        match &self.server.close_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Connector resolving config ids to [`FakeServer`]s.
#[derive(Default)]
pub struct FakeConnector {
    servers: Mutex<HashMap<String, FakeServer>>,
    opens: AtomicUsize,
    closes: Arc<Mutex<HashMap<String, usize>>>,
    open_delay: Option<Duration>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, id: impl Into<String>, server: FakeServer) -> Self {
        self.servers.lock().unwrap().insert(id.into(), server);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Let a server that failed to open succeed next time.
    pub fn heal(&self, id: &str) {
        if let Some(server) = self.servers.lock().unwrap().get_mut(id) {
            server.open_error = None;
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self, id: &str) -> usize {
        self.closes.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self, config: &ServerConfig) -> mcp::Result<FakeSession> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let server = self
            .servers
            .lock()
            .unwrap()
            .get(&config.id)
            .cloned()
            .ok_or_else(|| mcp::Error::Transport(format!("no route to {}", config.id)))?;
        if let Some(e) = &server.open_error {
            return Err(e.clone());
        }

        Ok(FakeSession {
            id: config.id.clone(),
            server,
            closes: Arc::clone(&self.closes),
        })
    }
}

/// What a backend saw in one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub tool_choice: ToolChoice,
}

/// Backend replaying a fixed list of responses, then failing.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Backend for ScriptedBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|d| d.name.clone()).collect(),
            tool_choice: request.tool_choice,
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::InvalidResponse("script exhausted".into())))
    }
}

/// Backend that asks for the same tool call forever.
#[derive(Default)]
pub struct LoopingBackend {
    calls: AtomicUsize,
}

impl LoopingBackend {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for LoopingBackend {
    async fn call(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tool_calls(&[("ping", Value::Null)]))
    }
}

pub fn text(reply: &str) -> ModelResponse {
    ModelResponse {
        message: Message::assistant(reply),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

pub fn tool_calls(calls: &[(&str, Value)]) -> ModelResponse {
    ModelResponse {
        message: Message::from_parts(
            Role::Assistant,
            calls
                .iter()
                .map(|(name, input)| {
                    Part::ToolCall(ToolCall {
                        id: String::new(),
                        name: name.to_string(),
                        input: input.clone(),
                        signature: None,
                    })
                })
                .collect(),
        ),
        usage: Usage::default(),
    }
}
