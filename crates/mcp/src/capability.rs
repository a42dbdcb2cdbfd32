//! Capabilities declared by a tool server.

use rmcp::model::{Prompt, Resource, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// A named argument accepted by a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgumentInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A parameterized prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgumentInfo>,
}

/// A URI-addressable piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Everything one connected server declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub tools: Vec<ToolInfo>,
    pub prompts: Vec<PromptInfo>,
    pub resources: Vec<ResourceInfo>,
}

impl CapabilitySet {
    pub fn tool(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tool(name).is_some()
    }
}

impl From<Tool> for ToolInfo {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(|d| d.into_owned()),
            input_schema: Some(Value::Object((*tool.input_schema).clone())),
        }
    }
}

impl From<Prompt> for PromptInfo {
    fn from(prompt: Prompt) -> Self {
        Self {
            name: prompt.name,
            description: prompt.description,
            arguments: prompt
                .arguments
                .unwrap_or_default()
                .into_iter()
                .map(|arg| PromptArgumentInfo {
                    name: arg.name,
                    description: arg.description,
                    required: arg.required.unwrap_or(false),
                })
                .collect(),
        }
    }
}

impl From<Resource> for ResourceInfo {
    fn from(resource: Resource) -> Self {
        Self {
            uri: resource.raw.uri,
            name: resource.raw.name,
            description: resource.raw.description,
            mime_type: resource.raw.mime_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_conversion_keeps_schema() {
        let tool: Tool = serde_json::from_value(json!({
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
        }))
        .unwrap();
        let info = ToolInfo::from(tool);
        assert_eq!(info.name, "read_file");
        assert_eq!(info.description.as_deref(), Some("Read a file"));
        assert_eq!(info.input_schema.unwrap()["properties"]["path"]["type"], "string");
    }

    #[test]
    fn prompt_arguments_default_to_optional() {
        let prompt: Prompt = serde_json::from_value(json!({
            "name": "summarize",
            "arguments": [
                {"name": "text", "required": true},
                {"name": "tone"}
            ]
        }))
        .unwrap();
        let info = PromptInfo::from(prompt);
        assert_eq!(info.arguments.len(), 2);
        assert!(info.arguments[0].required);
        assert!(!info.arguments[1].required);
    }

    #[test]
    fn capability_lookup_is_exact() {
        let set = CapabilitySet {
            tools: vec![ToolInfo {
                name: "ping".into(),
                description: None,
                input_schema: None,
            }],
            ..Default::default()
        };
        assert!(set.has_tool("ping"));
        assert!(!set.has_tool("Ping"));
        assert!(!set.has_tool("pin"));
    }
}
