//! Transport adapters: subprocess stdio and streaming HTTP.
//!
//! Each adapter only builds the byte channel. The protocol handshake runs
//! on top of it in [`crate::ServerConnection::open`]. No retries happen
//! here; every failure is reported once as [`Error::Transport`].

use std::collections::HashMap;

use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Spawn `command` with `args` and an environment overlay.
///
/// The child inherits the host environment; `env` entries override it.
pub fn spawn_process(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<TokioChildProcess> {
    debug!(command, ?args, "spawning tool server process");

    TokioChildProcess::new(Command::new(command).configure(|cmd| {
        cmd.args(args).envs(env);
    }))
    .map_err(|e| Error::transport(format!("failed to spawn {command}: {e}")))
}

/// Open a streaming HTTP channel to `url`, sending `headers` on every request.
pub fn http_stream(
    url: &Url,
    headers: &HashMap<HeaderName, HeaderValue>,
) -> Result<StreamableHttpClientTransport<reqwest::Client>> {
    debug!(%url, header_count = headers.len(), "opening streamable http transport");

    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| Error::transport(format!("failed to build http client: {e}")))?;

    let config = StreamableHttpClientTransportConfig::with_uri(url.as_str())
        .custom_headers(headers.clone());

    Ok(StreamableHttpClientTransport::with_client(client, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_transport_error() {
        let err = spawn_process(
            "/nonexistent/toolbridge-test-binary",
            &[],
            &HashMap::new(),
        )
        .err().expect("spawn should fail");
        match err {
            Error::Transport(cause) => assert!(cause.contains("failed to spawn")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_stream_builds_without_io() {
        let url = Url::parse("http://127.0.0.1:9/mcp").unwrap();
        let mut headers = HashMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("secret"),
        );
        assert!(http_stream(&url, &headers).is_ok());
    }
}
