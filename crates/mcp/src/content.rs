//! Content returned by tool servers.

use rmcp::model::{Content, PromptMessageContent, RawContent, ResourceContents};
use serde::{Deserialize, Serialize};

/// One piece of content returned by a tool, prompt or resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Binary payload, base64 encoded.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } | Self::Resource { .. } => None,
        }
    }
}

impl From<RawContent> for ContentPart {
    fn from(raw: RawContent) -> Self {
        match raw {
            RawContent::Text(text) => Self::Text { text: text.text },
            RawContent::Image(image) => Self::Image {
                data: image.data,
                mime_type: image.mime_type,
            },
            RawContent::Audio(audio) => Self::Image {
                data: audio.data,
                mime_type: audio.mime_type,
            },
            RawContent::Resource(embedded) => Self::from(embedded.resource),
            RawContent::ResourceLink(link) => Self::Resource {
                uri: link.uri,
                mime_type: link.mime_type,
                text: None,
            },
        }
    }
}

impl From<Content> for ContentPart {
    fn from(content: Content) -> Self {
        Self::from(content.raw)
    }
}

impl From<ResourceContents> for ContentPart {
    fn from(contents: ResourceContents) -> Self {
        match contents {
            ResourceContents::TextResourceContents {
                uri,
                mime_type,
                text,
                ..
            } => Self::Resource {
                uri,
                mime_type,
                text: Some(text),
            },
            ResourceContents::BlobResourceContents { uri, mime_type, .. } => Self::Resource {
                uri,
                mime_type,
                text: None,
            },
        }
    }
}

impl From<PromptMessageContent> for ContentPart {
    fn from(content: PromptMessageContent) -> Self {
        match content {
            PromptMessageContent::Text { text } => Self::Text { text },
            PromptMessageContent::Image { image } => Self::Image {
                data: image.raw.data,
                mime_type: image.raw.mime_type,
            },
            PromptMessageContent::Resource { resource } => Self::from(resource.raw.resource),
            PromptMessageContent::ResourceLink { link } => Self::Resource {
                uri: link.raw.uri,
                mime_type: link.raw.mime_type,
                text: None,
            },
        }
    }
}

/// Join every text part with newlines; other parts are dropped.
pub fn normalize_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(ContentPart::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}
