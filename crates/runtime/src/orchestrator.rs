//! The tool-calling chat loop.
//!
//! One user turn runs as a bounded series of rounds. Each round asks the
//! model for a completion; tool calls it requests are executed one after
//! another through a [`ToolHost`] and their results fed back, until the
//! model answers in plain text or the round cap is hit.
//!
//! # Example
//!
//! ```ignore
//! use runtime::{ChatSession, ConnectionRegistry, GeminiBackend, OrchestratorConfig};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(registry: std::sync::Arc<ConnectionRegistry<mcp::McpConnector>>) -> runtime::Result<()> {
//! let backend = GeminiBackend::builder("api-key", "gemini-2.5-flash").build();
//! let mut session = ChatSession::new(backend, registry, OrchestratorConfig::default());
//!
//! let (tx, mut rx) = mpsc::channel(64);
//! let outcome = session.run_turn("List my files", &tx, &CancellationToken::new()).await?;
//! drop(tx);
//! while let Some(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//! println!("{}", outcome.text);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::ToolHost;
use crate::model::{
    Backend, FunctionDeclaration, Message, ModelError, ModelRequest, Part, Role, ToolCall,
    ToolChoice, ToolOutcome, ToolResult, Usage,
};

/// Default cap on model rounds per user turn.
pub const MAX_ROUNDS: usize = 10;

/// Final answer used when the round cap runs out.
pub const ROUND_LIMIT_NOTICE: &str = "(Reached the maximum number of function call rounds)";

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_rounds: usize,
    /// When false the model is offered no tools.
    pub tools_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: MAX_ROUNDS,
            tools_enabled: true,
        }
    }
}

/// Progress of one tool invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// One tool invocation attempt as surfaced to the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionCallRecord {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
            status: CallStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = CallStatus::Running;
    }

    pub fn succeed(&mut self, result: impl Into<String>) {
        self.status = CallStatus::Success;
        self.result = Some(result.into());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = CallStatus::Error;
        self.error = Some(error.into());
    }

    fn outcome(&self) -> ToolOutcome {
        match (&self.status, &self.error) {
            (CallStatus::Error, Some(message)) => ToolOutcome::Error {
                message: message.clone(),
            },
            _ => ToolOutcome::Success {
                output: self.result.clone().unwrap_or_default(),
            },
        }
    }
}

/// Incremental output of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Text { content: String },
    FunctionCallStart { call: FunctionCallRecord },
    FunctionCallEnd { call: FunctionCallRecord },
    Error { message: String },
    Done,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    /// The model answered in text.
    Answered,
    /// The round cap ran out; the text is [`ROUND_LIMIT_NOTICE`].
    RoundLimit,
    /// The cancellation token fired between rounds.
    Cancelled,
}

/// Summary of a finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    pub end: TurnEnd,
    pub rounds: usize,
    /// Every call made during the turn, in execution order.
    pub calls: Vec<FunctionCallRecord>,
    pub usage: Usage,
}

/// Drives model rounds for one turn at a time.
pub struct Orchestrator<B, H> {
    backend: B,
    host: H,
    config: OrchestratorConfig,
}

impl<B: Backend, H: ToolHost> Orchestrator<B, H> {
    pub fn new(backend: B, host: H, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            host,
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one user turn.
    ///
    /// Emits `text`, `function_call_start` and `function_call_end` events;
    /// the terminal `done`/`error` event is left to the caller. Tool
    /// failures are folded into the transcript. Only a model failure
    /// returns `Err`. Cancellation is checked before each round, so a
    /// dispatched call always runs to completion.
    pub async fn run(
        &self,
        history: &[Message],
        user_message: &str,
        declarations: &[FunctionDeclaration],
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ModelError> {
        let mut transcript: Vec<Message> = history
            .iter()
            .filter(|message| !message.is_blank())
            .cloned()
            .collect();
        transcript.push(Message::user(user_message));

        let tool_choice = if declarations.is_empty() {
            ToolChoice::None
        } else {
            ToolChoice::Auto
        };

        let mut calls = Vec::new();
        let mut usage = Usage::default();

        for round in 1..=self.config.max_rounds {
            if cancel.is_cancelled() {
                info!(round, "turn cancelled");
                return Ok(TurnOutcome {
                    text: String::new(),
                    end: TurnEnd::Cancelled,
                    rounds: round - 1,
                    calls,
                    usage,
                });
            }

            debug!(round, messages = transcript.len(), "requesting completion");
            let response = self
                .backend
                .call(ModelRequest {
                    messages: &transcript,
                    tools: declarations,
                    tool_choice,
                })
                .await?;
            usage += response.usage;

            let requested: Vec<ToolCall> =
                response.message.tool_calls().into_iter().cloned().collect();
            if requested.is_empty() {
                let text = response.message.text();
                emit(events, ChatEvent::Text {
                    content: text.clone(),
                })
                .await;
                return Ok(TurnOutcome {
                    text,
                    end: TurnEnd::Answered,
                    rounds: round,
                    calls,
                    usage,
                });
            }

            debug!(round, count = requested.len(), "executing tool calls");
            let mut call_parts = Vec::with_capacity(requested.len());
            let mut result_parts = Vec::with_capacity(requested.len());

            for call in requested {
                let signature = call.signature.clone();
                let record = self.execute(call, events).await;
                call_parts.push(Part::ToolCall(ToolCall {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    input: record.arguments.clone(),
                    signature,
                }));
                result_parts.push(Part::ToolResult(ToolResult {
                    tool_call_id: record.id.clone(),
                    name: record.name.clone(),
                    outcome: record.outcome(),
                }));
                calls.push(record);
            }

            transcript.push(Message::from_parts(Role::Assistant, call_parts));
            transcript.push(Message::from_parts(Role::User, result_parts));
        }

        warn!(
            max_rounds = self.config.max_rounds,
            "round limit reached without a final answer"
        );
        emit(events, ChatEvent::Text {
            content: ROUND_LIMIT_NOTICE.to_string(),
        })
        .await;
        Ok(TurnOutcome {
            text: ROUND_LIMIT_NOTICE.to_string(),
            end: TurnEnd::RoundLimit,
            rounds: self.config.max_rounds,
            calls,
            usage,
        })
    }

    async fn execute(&self, call: ToolCall, events: &mpsc::Sender<ChatEvent>) -> FunctionCallRecord {
        let mut record = FunctionCallRecord::new(call.name, call.input);
        record.start();
        emit(events, ChatEvent::FunctionCallStart {
            call: record.clone(),
        })
        .await;

        match self
            .host
            .call_by_name(&record.name, record.arguments.clone())
            .await
        {
            Ok(output) => record.succeed(output),
            Err(e) => {
                warn!(tool = %record.name, call_id = %record.id, error = %e, "tool call failed");
                record.fail(e.to_string());
            }
        }

        emit(events, ChatEvent::FunctionCallEnd {
            call: record.clone(),
        })
        .await;
        record
    }
}

async fn emit(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    if events.send(event).await.is_err() {
        debug!("event receiver dropped");
    }
}

/// A conversation: history plus an orchestrator.
pub struct ChatSession<B, H> {
    orchestrator: Orchestrator<B, H>,
    history: Vec<Message>,
}

impl<B: Backend, H: ToolHost> ChatSession<B, H> {
    pub fn new(backend: B, host: H, config: OrchestratorConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(backend, host, config),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Run one turn and terminate the event stream.
    ///
    /// On success exactly one `done` event follows the turn's events and the
    /// user message and answer join the history. A model failure emits one
    /// `error` event instead and leaves the history untouched.
    pub async fn run_turn(
        &mut self,
        user_message: &str,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ModelError> {
        let declarations = if self.orchestrator.config().tools_enabled {
            self.orchestrator.host().function_declarations()
        } else {
            Vec::new()
        };

        match self
            .orchestrator
            .run(&self.history, user_message, &declarations, events, cancel)
            .await
        {
            Ok(outcome) => {
                self.history.push(Message::user(user_message));
                if !outcome.text.is_empty() {
                    self.history.push(Message::assistant(outcome.text.clone()));
                }
                info!(
                    rounds = outcome.rounds,
                    calls = outcome.calls.len(),
                    end = ?outcome.end,
                    "turn finished"
                );
                emit(events, ChatEvent::Done).await;
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "model call failed; ending turn");
                emit(events, ChatEvent::Error {
                    message: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }
}
