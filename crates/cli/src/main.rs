mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog::{ImportMode, ServerCatalog, ServerRecord};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use mcp::{CapabilitySet, ContentPart, JsonObject, McpConnector, ServerConfig, TransportKind};
use runtime::{
    CallStatus, ChatEvent, ChatSession, ConnectionRegistry, ExecuteRequest, FunctionCallRecord,
    TurnEnd,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when they help \
                             answer the user. Be concise and direct.";

type Registry = ConnectionRegistry<McpConnector>;

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Chat with a language model that can call MCP tool servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session with every catalog server connected
    Chat,
    /// List the servers in the catalog
    Servers,
    /// Add or update a server launched as a local process
    AddStdio {
        /// Server ID
        id: String,
        /// Command to run
        command: String,
        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Display name (defaults to the ID)
        #[arg(short, long)]
        name: Option<String>,
        /// Environment variable for the process, as KEY=VALUE
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
    },
    /// Add or update a server reached over streamable HTTP
    AddHttp {
        /// Server ID
        id: String,
        /// Endpoint URL
        url: String,
        /// Display name (defaults to the ID)
        #[arg(short, long)]
        name: Option<String>,
        /// Request header, as NAME=VALUE
        #[arg(long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
    },
    /// Remove a server from the catalog
    Remove {
        /// Server ID
        id: String,
    },
    /// Write the catalog as an export bundle
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import servers from an export bundle
    Import {
        /// Bundle file
        file: PathBuf,
        /// Replace the whole catalog instead of merging
        #[arg(long)]
        replace: bool,
    },
    /// Connect to a server and show its tools, prompts and resources
    Inspect {
        /// Server ID
        id: String,
    },
    /// Run one tool, prompt or resource request against a server
    Exec {
        #[command(subcommand)]
        target: ExecTarget,
    },
}

#[derive(Subcommand)]
enum ExecTarget {
    /// Call a tool
    Tool {
        /// Server ID
        server: String,
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Resolve a prompt
    Prompt {
        /// Server ID
        server: String,
        /// Prompt name
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Read a resource
    Resource {
        /// Server ID
        server: String,
        /// Resource URI
        uri: String,
    },
}

impl ExecTarget {
    fn into_request(self) -> Result<ExecuteRequest> {
        Ok(match self {
            Self::Tool {
                server,
                name,
                arguments,
            } => ExecuteRequest::Tool {
                server_id: server,
                name,
                arguments: parse_arguments(&arguments)?,
            },
            Self::Prompt {
                server,
                name,
                arguments,
            } => ExecuteRequest::Prompt {
                server_id: server,
                name,
                arguments: parse_arguments(&arguments)?,
            },
            Self::Resource { server, uri } => ExecuteRequest::Resource {
                server_id: server,
                uri,
            },
        })
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::Chat) | None => cmd_chat(&config).await,
        Some(Commands::Servers) => cmd_servers(&config),
        Some(Commands::AddStdio {
            id,
            command,
            args,
            name,
            env,
        }) => {
            let name = name.unwrap_or_else(|| id.clone());
            let server = env
                .into_iter()
                .fold(ServerConfig::stdio(id, name, command).with_args(args), |c, (k, v)| {
                    c.with_env(k, v)
                });
            cmd_add(&config, server)
        }
        Some(Commands::AddHttp {
            id,
            url,
            name,
            headers,
        }) => {
            let name = name.unwrap_or_else(|| id.clone());
            let server = headers
                .into_iter()
                .fold(ServerConfig::http(id, name, url), |c, (k, v)| c.with_header(k, v));
            cmd_add(&config, server)
        }
        Some(Commands::Remove { id }) => cmd_remove(&config, &id),
        Some(Commands::Export { output }) => cmd_export(&config, output.as_deref()),
        Some(Commands::Import { file, replace }) => cmd_import(&config, &file, replace),
        Some(Commands::Inspect { id }) => cmd_inspect(&config, &id).await,
        Some(Commands::Exec { target }) => cmd_exec(&config, target.into_request()?).await,
    }
}

async fn cmd_chat(config: &Config) -> Result<()> {
    println!("toolbridge v{}", env!("CARGO_PKG_VERSION"));
    let mut interrupts = listen_for_interrupts();

    let mut backend = config.backend()?;
    if config.backend.system.is_none() {
        backend = backend.system(SYSTEM_PROMPT);
    }
    let backend = backend.build();
    let catalog = ServerCatalog::load(&config.catalog)?;
    let registry = Arc::new(ConnectionRegistry::new(config.connector()));

    for server in catalog.configs() {
        match registry.connect(server).await {
            Ok(state) => println!(
                "Connected {} ({} tools)",
                server.id,
                state.capabilities.tools.len()
            ),
            Err(e) => eprintln!("Could not connect {}: {e}", server.id),
        }
    }
    println!(
        "Servers: {} connected, {} tools available",
        registry.connected_ids().len(),
        registry.total_tool_count()
    );
    println!("Model: {}", config.backend.model);
    println!("Type 'quit' or Ctrl+D to exit, 'clear' to reset the conversation.\n");

    let mut session = ChatSession::new(backend, Arc::clone(&registry), config.orchestrator());
    let mut lines = spawn_stdin_reader();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let line = match next_prompt(&mut lines, &mut interrupts).await? {
            Prompt::Line(line) => line,
            Prompt::Eof => break,
            Prompt::Interrupted => {
                println!();
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        if input == "clear" {
            session.clear();
            println!("Conversation cleared.\n");
            continue;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(32);
        let turn = async {
            tokio::join!(session.run_turn(input, &tx, &cancel), print_events(rx)).0
        };

        if let Ok(outcome) = until_done(turn, &cancel, &mut interrupts).await {
            if outcome.end == TurnEnd::Cancelled {
                println!("(turn cancelled)\n");
            }
            info!(rounds = outcome.rounds, calls = outcome.calls.len(), "turn complete");
        }
    }

    registry.disconnect_all().await;
    println!("\nSession ended.");
    Ok(())
}

/// What the prompt produced.
#[derive(Debug, PartialEq)]
enum Prompt {
    Line(String),
    Eof,
    Interrupted,
}

/// Forward every Ctrl-C for the lifetime of the process.
fn listen_for_interrupts() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_prompt(
    lines: &mut mpsc::Receiver<io::Result<String>>,
    interrupts: &mut mpsc::Receiver<()>,
) -> io::Result<Prompt> {
    tokio::select! {
        line = lines.recv() => match line {
            Some(line) => line.map(Prompt::Line),
            None => Ok(Prompt::Eof),
        },
        Some(()) = interrupts.recv() => Ok(Prompt::Interrupted),
    }
}

/// Drive `turn` to completion. The first interrupt cancels it at the next
/// round boundary; later ones stay queued for the prompt.
async fn until_done<F: Future>(
    turn: F,
    cancel: &CancellationToken,
    interrupts: &mut mpsc::Receiver<()>,
) -> F::Output {
    tokio::pin!(turn);
    loop {
        tokio::select! {
            output = &mut turn => return output,
            Some(()) = interrupts.recv(), if !cancel.is_cancelled() => {
                eprintln!("\nInterrupted; stopping after the current round.");
                cancel.cancel();
            }
        }
    }
}

/// Print events until the turn's terminal event.
async fn print_events(mut rx: mpsc::Receiver<ChatEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::Text { content } => println!("\n{content}\n"),
            ChatEvent::FunctionCallStart { call } => {
                println!("  -> {} {}", call.name, call.arguments);
            }
            ChatEvent::FunctionCallEnd { call } => println!("  <- {}", describe_call(&call)),
            ChatEvent::Error { message } => {
                eprintln!("Error: {message}\n");
                break;
            }
            ChatEvent::Done => break,
        }
    }
}

fn describe_call(call: &FunctionCallRecord) -> String {
    match call.status {
        CallStatus::Success => format!(
            "{}: {}",
            call.name,
            truncate(call.result.as_deref().unwrap_or_default(), 200)
        ),
        CallStatus::Error => format!(
            "{} failed: {}",
            call.name,
            call.error.as_deref().unwrap_or_default()
        ),
        CallStatus::Pending | CallStatus::Running => format!("{} ({:?})", call.name, call.status),
    }
}

fn cmd_servers(config: &Config) -> Result<()> {
    let catalog = ServerCatalog::load(&config.catalog)?;

    if catalog.is_empty() {
        println!("No servers configured. Add one with 'toolbridge add-stdio' or 'toolbridge add-http'.");
        return Ok(());
    }

    println!(
        "{:<16}  {:<20}  {:<15}  {:<16}  TARGET",
        "ID", "NAME", "TYPE", "UPDATED"
    );
    println!("{}", "-".repeat(90));

    for record in catalog.list() {
        let server = &record.config;
        println!(
            "{:<16}  {:<20}  {:<15}  {:<16}  {}",
            server.id,
            server.name,
            server.transport,
            format_millis(record.updated_at),
            target(server)
        );
    }

    Ok(())
}

fn cmd_add(config: &Config, server: ServerConfig) -> Result<()> {
    server.validate()?;

    let mut catalog = ServerCatalog::load(&config.catalog)?;
    let existed = catalog.get(&server.id).is_some();
    let record = catalog.upsert(server);
    let id = record.config.id.clone();
    catalog.save(&config.catalog)?;

    println!("{} server '{id}'", if existed { "Updated" } else { "Added" });
    Ok(())
}

fn cmd_remove(config: &Config, id: &str) -> Result<()> {
    let mut catalog = ServerCatalog::load(&config.catalog)?;
    if !catalog.remove(id) {
        return Err(Error::ServerNotFound { id: id.to_string() });
    }
    catalog.save(&config.catalog)?;

    println!("Removed server '{id}'");
    Ok(())
}

fn cmd_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let catalog = ServerCatalog::load(&config.catalog)?;
    let json = catalog.export_json()?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Exported {} servers to {}", catalog.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_import(config: &Config, file: &Path, replace: bool) -> Result<()> {
    let bundle = std::fs::read_to_string(file)?;
    let mode = if replace {
        ImportMode::Replace
    } else {
        ImportMode::Merge
    };

    let mut catalog = ServerCatalog::load(&config.catalog)?;
    let summary = catalog.import(&bundle, mode)?;
    catalog.save(&config.catalog)?;

    println!(
        "Imported {} servers, skipped {}",
        summary.imported, summary.skipped
    );
    Ok(())
}

async fn cmd_inspect(config: &Config, id: &str) -> Result<()> {
    let server = find_server(config, id)?;
    let registry = Registry::new(config.connector());

    let state = registry.connect(&server.config).await;
    registry.disconnect_all().await;
    let state = state?;

    println!("Server: {} ({})", server.config.name, state.id);
    println!("Status: {}", state.status);
    print_capabilities(&state.capabilities);
    Ok(())
}

fn print_capabilities(capabilities: &CapabilitySet) {
    println!("\nTools ({}):", capabilities.tools.len());
    for tool in &capabilities.tools {
        println!(
            "  {:<24}  {}",
            tool.name,
            tool.description.as_deref().unwrap_or_default()
        );
    }

    println!("\nPrompts ({}):", capabilities.prompts.len());
    for prompt in &capabilities.prompts {
        let arguments: Vec<String> = prompt
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    a.name.clone()
                } else {
                    format!("{}?", a.name)
                }
            })
            .collect();
        println!("  {:<24}  ({})", prompt.name, arguments.join(", "));
    }

    println!("\nResources ({}):", capabilities.resources.len());
    for resource in &capabilities.resources {
        println!(
            "  {:<24}  {}",
            resource.uri,
            resource.mime_type.as_deref().unwrap_or_default()
        );
    }
}

async fn cmd_exec(config: &Config, request: ExecuteRequest) -> Result<()> {
    let server = find_server(config, request.server_id())?;
    let registry = Registry::new(config.connector());

    registry.connect(&server.config).await?;
    let result = registry.execute(request).await;
    registry.disconnect_all().await;

    if !result.success {
        return Err(Error::Execution(result.error.unwrap_or_default()));
    }
    for part in result.content.unwrap_or_default() {
        print_part(&part)?;
    }
    Ok(())
}

fn print_part(part: &ContentPart) -> Result<()> {
    match part {
        ContentPart::Text { text } => println!("{text}"),
        ContentPart::Resource {
            uri,
            text: Some(text),
            ..
        } => println!("[{uri}]\n{text}"),
        other => println!("{}", serde_json::to_string(other)?),
    }
    Ok(())
}

fn find_server(config: &Config, id: &str) -> Result<ServerRecord> {
    ServerCatalog::load(&config.catalog)?
        .get(id)
        .cloned()
        .ok_or_else(|| Error::ServerNotFound { id: id.to_string() })
}

fn target(server: &ServerConfig) -> String {
    match server.transport {
        TransportKind::Subprocess => std::iter::once(server.command.as_deref().unwrap_or_default())
            .chain(server.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        TransportKind::HttpStream => server.url.clone().unwrap_or_default(),
    }
}

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn parse_arguments(s: &str) -> Result<Option<JsonObject>> {
    match serde_json::from_str::<serde_json::Value>(s)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => Err(Error::InvalidArgument(format!(
            "arguments must be a JSON object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_pairs() {
        assert_eq!(
            parse_key_value("TOKEN=a=b").unwrap(),
            ("TOKEN".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn arguments_must_be_an_object() {
        assert_eq!(parse_arguments("null").unwrap(), None);
        assert_eq!(parse_arguments(r#"{"path": "/tmp"}"#).unwrap().unwrap()["path"], "/tmp");
        assert!(matches!(
            parse_arguments("[1, 2]"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(parse_arguments("{"), Err(Error::Json(_))));
    }

    #[test]
    fn add_stdio_keeps_hyphenated_trailing_args() {
        let cli = Cli::try_parse_from([
            "toolbridge",
            "add-stdio",
            "--env",
            "ROOT=/srv",
            "fs",
            "npx",
            "-y",
            "@modelcontextprotocol/server-filesystem",
        ])
        .unwrap();

        let Some(Commands::AddStdio {
            id, command, args, env, ..
        }) = cli.command
        else {
            panic!("expected add-stdio");
        };
        assert_eq!(id, "fs");
        assert_eq!(command, "npx");
        assert_eq!(args, ["-y", "@modelcontextprotocol/server-filesystem"]);
        assert_eq!(env, [("ROOT".to_string(), "/srv".to_string())]);
    }

    #[test]
    fn exec_tool_builds_a_tagged_request() {
        let cli = Cli::try_parse_from([
            "toolbridge",
            "--config",
            "other.toml",
            "exec",
            "tool",
            "fs",
            "read_file",
            r#"{"path": "notes.md"}"#,
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("other.toml"));

        let Some(Commands::Exec { target }) = cli.command else {
            panic!("expected exec");
        };
        let request = target.into_request().unwrap();
        assert_eq!(request.server_id(), "fs");
        assert!(matches!(
            request,
            ExecuteRequest::Tool { ref name, arguments: Some(ref args), .. }
                if name == "read_file" && args["path"] == "notes.md"
        ));
    }

    #[test]
    fn subprocess_target_joins_command_and_args() {
        let server = ServerConfig::stdio("fs", "Filesystem", "npx").with_args(["-y", "server"]);
        assert_eq!(target(&server), "npx -y server");
        let server = ServerConfig::http("web", "Web", "http://localhost:8080/mcp");
        assert_eq!(target(&server), "http://localhost:8080/mcp");
    }

    #[tokio::test]
    async fn interrupt_at_the_prompt_ends_input() {
        let (_line_tx, mut lines) = mpsc::channel(1);
        let (interrupt_tx, mut interrupts) = mpsc::channel(1);
        interrupt_tx.send(()).await.unwrap();

        let prompt = next_prompt(&mut lines, &mut interrupts).await.unwrap();
        assert_eq!(prompt, Prompt::Interrupted);
    }

    #[tokio::test]
    async fn prompt_yields_lines_then_eof() {
        let (line_tx, mut lines) = mpsc::channel(2);
        let (_interrupt_tx, mut interrupts) = mpsc::channel::<()>(1);
        line_tx.send(Ok("hello".to_string())).await.unwrap();
        drop(line_tx);

        assert_eq!(
            next_prompt(&mut lines, &mut interrupts).await.unwrap(),
            Prompt::Line("hello".into())
        );
        assert_eq!(
            next_prompt(&mut lines, &mut interrupts).await.unwrap(),
            Prompt::Eof
        );
    }

    #[tokio::test]
    async fn interrupt_during_a_turn_cancels_and_waits() {
        let cancel = CancellationToken::new();
        let (interrupt_tx, mut interrupts) = mpsc::channel(2);
        interrupt_tx.send(()).await.unwrap();

        let turn = async {
            cancel.cancelled().await;
            "finished"
        };
        assert_eq!(until_done(turn, &cancel, &mut interrupts).await, "finished");
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn second_interrupt_stays_queued_for_the_prompt() {
        let cancel = CancellationToken::new();
        let (interrupt_tx, mut interrupts) = mpsc::channel(2);
        interrupt_tx.send(()).await.unwrap();
        interrupt_tx.send(()).await.unwrap();

        let turn = async {
            cancel.cancelled().await;
            tokio::task::yield_now().await;
        };
        until_done(turn, &cancel, &mut interrupts).await;

        let (_line_tx, mut lines) = mpsc::channel(1);
        assert_eq!(
            next_prompt(&mut lines, &mut interrupts).await.unwrap(),
            Prompt::Interrupted
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
