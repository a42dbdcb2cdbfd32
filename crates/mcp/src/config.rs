//! Server configuration records and their validation.

use std::collections::HashMap;

use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the host reaches a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Spawn a local process and speak over its stdin/stdout.
    #[serde(rename = "stdio", alias = "subprocess")]
    Subprocess,
    /// Open a streaming HTTP connection to a URL.
    #[serde(rename = "streamable-http", alias = "http-stream")]
    HttpStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subprocess => write!(f, "stdio"),
            Self::HttpStream => write!(f, "streamable-http"),
        }
    }
}

/// Identity and connection parameters for one tool server.
///
/// Only the fields required by `transport` are mandatory; the rest stay
/// empty. Call [`ServerConfig::validate`] to get the typed view the
/// transport adapter consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Validated, transport-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Subprocess {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    HttpStream {
        url: Url,
        headers: HashMap<HeaderName, HeaderValue>,
    },
}

impl ServerConfig {
    /// Configuration for a server spawned as a subprocess.
    pub fn stdio(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport: TransportKind::Subprocess,
            command: Some(command.into()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
        }
    }

    /// Configuration for a server reached over streaming HTTP.
    pub fn http(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport: TransportKind::HttpStream,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check the fields the chosen transport needs and build its typed view.
    ///
    /// Never performs I/O.
    pub fn validate(&self) -> Result<TransportSpec> {
        if self.id.trim().is_empty() {
            return Err(Error::configuration("server id is required"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::configuration(format!(
                "server {} has no name",
                self.id
            )));
        }

        match self.transport {
            TransportKind::Subprocess => {
                let command = non_blank(self.command.as_deref()).ok_or_else(|| {
                    Error::configuration(format!(
                        "server {} uses the stdio transport but has no command",
                        self.id
                    ))
                })?;
                Ok(TransportSpec::Subprocess {
                    command: command.to_string(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                })
            }
            TransportKind::HttpStream => {
                let raw = non_blank(self.url.as_deref()).ok_or_else(|| {
                    Error::configuration(format!(
                        "server {} uses the streamable-http transport but has no url",
                        self.id
                    ))
                })?;
                let url = Url::parse(raw).map_err(|e| {
                    Error::configuration(format!("server {} has an invalid url {raw}: {e}", self.id))
                })?;
                let headers = self
                    .headers
                    .iter()
                    .map(|(name, value)| parse_header(name, value))
                    .collect::<Result<_>>()?;
                Ok(TransportSpec::HttpStream { url, headers })
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::configuration(format!("invalid header name {name}: {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::configuration(format!("invalid value for header {name}: {e}")))?;
    Ok((header_name, header_value))
}
