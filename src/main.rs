//! CLI Entry Point for opcda-write
//!
//! Provides a command-line interface for:
//! - Driving a write coordinator against the built-in mock server
//! - Listing and translating OPC status codes
//!
//! # Usage
//!
//! Write a request (a JSON array of `{itemID, value, type}`) three times:
//! ```bash
//! opcda-write write request.json --repeat 3 --reject badTag=0xC0040008
//! ```
//!
//! Emit JSON logs:
//! ```bash
//! opcda-write --log-format json write request.json
//! ```
//!
//! Translate a status code:
//! ```bash
//! opcda-write translate 0xC0040007
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use opcda_write::codes::{self, STATUS_MESSAGES};
use opcda_write::config::WriterConfig;
use opcda_write::coordinator::{WriteCoordinator, WriteOutcome};
use opcda_write::item::WriteRequest;
use opcda_write::logging::{self, OutputFormat, TracingConfig};
use opcda_write::status::CoordinatorStatus;
use opcda_write::transport::{MockServer, ServerRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

struct LogOptions {
    format: OutputFormat,
    span_events: bool,
    ansi: bool,
}

#[derive(Parser)]
#[command(name = "opcda-write")]
#[command(about = "OPC DA group write coordinator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    /// Log span open/close events
    #[arg(long, global = true)]
    log_spans: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a request through a coordinator backed by the mock server
    Write {
        /// Path to a JSON write request
        request: PathBuf,

        /// Number of times to send the request
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Server connection name (overrides configuration)
        #[arg(long)]
        server: Option<String>,

        /// Make the mock server reject an item: ITEM=CODE (CODE may be hex)
        #[arg(long, value_parser = parse_rejection)]
        reject: Vec<(String, u32)>,
    },

    /// List known status codes
    Codes,

    /// Translate a status code (decimal or 0x-prefixed hex)
    Translate {
        /// Status code
        #[arg(value_parser = parse_code)]
        code: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_options = LogOptions {
        format: cli.log_format,
        span_events: cli.log_spans,
        ansi: !cli.no_color,
    };

    match cli.command {
        Commands::Write {
            request,
            repeat,
            config,
            server,
            reject,
        } => run_write(request, repeat, config, server, reject, log_options).await,
        Commands::Codes => {
            for (code, message) in STATUS_MESSAGES {
                println!("0x{code:08X}  {message}");
            }
            Ok(())
        }
        Commands::Translate { code } => {
            println!("{}", codes::describe_code(code));
            Ok(())
        }
    }
}

async fn run_write(
    request_path: PathBuf,
    repeat: u32,
    config_path: Option<PathBuf>,
    server_name: Option<String>,
    rejections: Vec<(String, u32)>,
    log_options: LogOptions,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => WriterConfig::load_from(path)?,
        None => WriterConfig::load()?,
    };
    if let Some(name) = server_name {
        config.node.server = name;
    }
    config.validate()?;
    let tracing_config = TracingConfig::from_config(&config)
        .map_err(|e| anyhow!(e))?
        .with_format(log_options.format)
        .with_span_events(log_options.span_events)
        .with_ansi(log_options.ansi);
    logging::init(tracing_config).map_err(|e| anyhow!(e))?;

    let json = std::fs::read_to_string(&request_path)
        .with_context(|| format!("reading {}", request_path.display()))?;
    let request = WriteRequest::from_json(&json)?;

    let server = MockServer::new();
    for (item, code) in rejections {
        server.reject_item(item, code).await;
    }
    let mut registry = ServerRegistry::new();
    registry.register(config.node.server.clone(), Arc::new(server));

    let coordinator = Arc::new(WriteCoordinator::from_config(&config.node, &registry));
    let mut events = coordinator.subscribe_events();
    let listener = coordinator.start();

    let mut status = coordinator.subscribe_status();
    let settled = tokio::time::timeout(
        READY_TIMEOUT,
        status.wait_for(|s| matches!(s, CoordinatorStatus::Ready | CoordinatorStatus::Error)),
    )
    .await
    .map(|changed| changed.map(|s| *s));
    if !matches!(settled, Ok(Ok(CoordinatorStatus::Ready))) {
        anyhow::bail!("group session did not become ready ({})", coordinator.status());
    }
    info!(group = coordinator.group_id(), items = request.len(), "session ready");

    for _ in 0..repeat {
        match coordinator.write(&request).await {
            WriteOutcome::Completed(result) => println!("{}", serde_json::to_string(&result)?),
            WriteOutcome::Dropped(reason) => println!("dropped: {reason:?}"),
        }
        while let Ok(event) = events.try_recv() {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    coordinator.close().await?;
    if let Some(listener) = listener {
        listener.await?;
    }
    Ok(())
}

fn parse_code(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid status code '{s}': {e}"))
}

fn parse_rejection(s: &str) -> Result<(String, u32), String> {
    let (item, code) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected ITEM=CODE, got '{s}'"))?;
    Ok((item.to_string(), parse_code(code)?))
}
