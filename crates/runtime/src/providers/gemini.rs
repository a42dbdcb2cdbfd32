//! Google Gemini `generateContent` backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    Backend, FunctionDeclaration, Message, ModelError, ModelRequest, ModelResponse, Part, Role,
    ToolCall, ToolChoice, ToolOutcome, Usage,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable consulted by [`GeminiBackend::from_env`].
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ApiToolConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTool {
    function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiToolConfig {
    function_calling_config: ApiFunctionCallingConfig,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCallingConfig {
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a Gemini backend.
#[derive(Debug, Clone)]
pub struct GeminiBackendBuilder {
    api_key: String,
    model: String,
    base_url: String,
    system: Option<String>,
}

impl GeminiBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
            system: None,
        }
    }

    /// Point at a different API root, e.g. a proxy.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn build(self) -> GeminiBackend {
        GeminiBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            system: self.system,
        }
    }
}

/// Gemini API backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system: Option<String>,
}

impl GeminiBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> GeminiBackendBuilder {
        GeminiBackendBuilder::new(api_key, model)
    }

    /// Builder using the key from `GEMINI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<GeminiBackendBuilder> {
        let key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("{API_KEY_ENV} is not set")))?;
        Ok(GeminiBackendBuilder::new(key, model))
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(&self, request: &ModelRequest<'_>) -> ApiRequest {
        let mut system: Vec<String> = self.system.iter().cloned().collect();
        let mut contents = Vec::with_capacity(request.messages.len());

        for message in request.messages {
            if message.role == Role::System {
                system.push(message.text());
                continue;
            }
            contents.push(Self::message_to_api(message));
        }

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![ApiTool {
                function_declarations: request.tools.iter().map(Self::declaration_to_api).collect(),
            }]
        };

        let tool_config = (!request.tools.is_empty()).then(|| ApiToolConfig {
            function_calling_config: ApiFunctionCallingConfig {
                mode: match request.tool_choice {
                    ToolChoice::Auto => "AUTO",
                    ToolChoice::None => "NONE",
                },
            },
        });

        ApiRequest {
            contents,
            system_instruction: (!system.is_empty()).then(|| ApiContent {
                role: None,
                parts: vec![ApiPart {
                    text: Some(system.join("\n\n")),
                    ..Default::default()
                }],
            }),
            tools,
            tool_config,
        }
    }

    fn message_to_api(message: &Message) -> ApiContent {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        };

        let parts = message
            .parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => ApiPart {
                    text: Some(text.clone()),
                    ..Default::default()
                },
                Part::ToolCall(call) => ApiPart {
                    function_call: Some(ApiFunctionCall {
                        id: None,
                        name: call.name.clone(),
                        args: call.input.clone(),
                    }),
                    thought_signature: call.signature.clone(),
                    ..Default::default()
                },
                Part::ToolResult(result) => {
                    let response = match &result.outcome {
                        ToolOutcome::Success { output } => serde_json::json!({ "result": output }),
                        ToolOutcome::Error { message } => serde_json::json!({ "error": message }),
                    };
                    ApiPart {
                        function_response: Some(ApiFunctionResponse {
                            id: None,
                            name: result.name.clone(),
                            response,
                        }),
                        ..Default::default()
                    }
                }
            })
            .collect();

        ApiContent {
            role: Some(role.to_string()),
            parts,
        }
    }

    fn declaration_to_api(declaration: &FunctionDeclaration) -> ApiFunctionDeclaration {
        ApiFunctionDeclaration {
            name: declaration.name.clone(),
            description: declaration.description.clone(),
            parameters: sanitize_schema(declaration.parameters.clone()),
        }
    }

    fn response_to_message(response: ApiResponse) -> std::result::Result<Message, ModelError> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("response has no candidates".into()))?;

        debug!(finish_reason = ?candidate.finish_reason, "gemini candidate");

        let parts = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| {
                if let Some(call) = part.function_call {
                    return Some(Part::ToolCall(ToolCall {
                        id: call.id.unwrap_or_default(),
                        name: call.name,
                        input: call.args,
                        signature: part.thought_signature,
                    }));
                }
                part.text.map(Part::text)
            })
            .collect();

        Ok(Message::from_parts(Role::Assistant, parts))
    }
}

/// Drop JSON Schema keywords the Gemini API rejects.
fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| key != "$schema" && key != "additionalProperties")
                .map(|(key, value)| (key, sanitize_schema(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_schema).collect()),
        other => other,
    }
}

impl std::fmt::Display for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gemini({})", self.model)
    }
}

impl Backend for GeminiBackend {
    async fn call(&self, request: ModelRequest<'_>) -> std::result::Result<ModelResponse, ModelError> {
        let api_request = self.build_request(&request);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = api_response
            .usage_metadata
            .as_ref()
            .map(|usage| Usage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            })
            .unwrap_or_default();
        let message = Self::response_to_message(api_response)?;

        Ok(ModelResponse { message, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolResult;
    use serde_json::json;

    fn backend() -> GeminiBackend {
        GeminiBackend::builder("key", DEFAULT_MODEL)
            .system("Be brief.")
            .build()
    }

    #[test]
    fn endpoint_includes_model() {
        let backend = GeminiBackend::builder("key", "gemini-2.5-pro")
            .base_url("http://localhost:8080/v1beta/")
            .build();
        assert_eq!(
            backend.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(backend.to_string(), "gemini(gemini-2.5-pro)");
    }

    #[test]
    fn request_maps_roles_tools_and_results() {
        let messages = vec![
            Message::system("Use tools when useful."),
            Message::user("ping a"),
            Message::from_parts(
                Role::Assistant,
                vec![Part::ToolCall(ToolCall {
                    id: "c1".into(),
                    name: "ping".into(),
                    input: json!({"host": "a"}),
                    signature: None,
                })],
            ),
            Message::from_parts(
                Role::User,
                vec![Part::ToolResult(ToolResult {
                    tool_call_id: "c1".into(),
                    name: "ping".into(),
                    outcome: ToolOutcome::Error {
                        message: "unreachable".into(),
                    },
                })],
            ),
        ];
        let tools = vec![FunctionDeclaration {
            name: "ping".into(),
            description: String::new(),
            parameters: json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "additionalProperties": false,
                "properties": {"host": {"type": "string"}}
            }),
        }];

        let request = backend().build_request(&ModelRequest {
            messages: &messages,
            tools: &tools,
            tool_choice: ToolChoice::Auto,
        });
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "Be brief.\n\nUse tools when useful."
        );
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["args"]["host"], "a");
        assert_eq!(
            json["contents"][2]["parts"][0]["functionResponse"]["response"]["error"],
            "unreachable"
        );
        assert_eq!(json["toolConfig"]["functionCallingConfig"]["mode"], "AUTO");

        let parameters = &json["tools"][0]["functionDeclarations"][0]["parameters"];
        assert!(parameters.get("$schema").is_none());
        assert!(parameters.get("additionalProperties").is_none());
        assert_eq!(parameters["properties"]["host"]["type"], "string");
    }

    #[test]
    fn request_without_tools_omits_tool_config() {
        let messages = vec![Message::user("hi")];
        let request = backend().build_request(&ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::None,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("toolConfig").is_none());
    }

    #[test]
    fn response_with_function_calls() {
        let response: ApiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Checking."},
                        {"functionCall": {"name": "ping", "args": {"host": "a"}}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }))
        .unwrap();

        let message = GeminiBackend::response_to_message(response).unwrap();
        assert_eq!(message.text(), "Checking.");
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ping");
        assert_eq!(calls[0].input["host"], "a");
    }

    #[test]
    fn thought_signature_round_trips() {
        let response: ApiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": {"name": "ping", "args": {}},
                        "thoughtSignature": "sig-123"
                    }]
                }
            }]
        }))
        .unwrap();

        let message = GeminiBackend::response_to_message(response).unwrap();
        assert_eq!(message.tool_calls()[0].signature.as_deref(), Some("sig-123"));

        let api = GeminiBackend::message_to_api(&message);
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["parts"][0]["thoughtSignature"], "sig-123");
        assert_eq!(json["parts"][0]["functionCall"]["name"], "ping");
    }

    #[test]
    fn response_without_candidates_is_invalid() {
        let response: ApiResponse = serde_json::from_value(json!({})).unwrap();
        let err = GeminiBackend::response_to_message(response).unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }
}
