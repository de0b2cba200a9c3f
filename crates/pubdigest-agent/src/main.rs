//! pubdigest: PubMed digest pipeline.
//! Entry point for the task runner binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pubdigest_agent::config::Config;
use pubdigest_agent::context::TaskContext;
use pubdigest_agent::tasks::{build_default_registry, run_task};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pubdigest", version, about = "Daily PubMed digests with model-driven selection")]
struct Cli {
    /// Config file (defaults to PUBDIGEST_CONFIG, then ./pubdigest.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task and print its response.
    Run {
        task: String,
        /// Read the event from a JSON file.
        #[arg(long, conflicts_with = "event_json")]
        event: Option<PathBuf>,
        /// Pass the event inline.
        #[arg(long)]
        event_json: Option<String>,
    },
    /// List the registered tasks.
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pubdigest=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = Arc::new(build_default_registry());

    match cli.command {
        Command::Tasks => {
            println!("{}", serde_json::to_string_pretty(&registry.manifest())?);
            Ok(())
        }
        Command::Run { task, event, event_json } => {
            let event = read_event(event, event_json)?;
            info!(task = %task, version = env!("CARGO_PKG_VERSION"), "pubdigest starting");

            let needs_model = registry.get(&task).map_or(false, |t| t.needs_model());
            let ctx = Config::load_from(cli.config.as_deref())
                .and_then(|config| {
                    config.validate(needs_model)?;
                    TaskContext::from_config(config)
                });
            let response = match ctx {
                Ok(ctx) => run_task(registry, &task, ctx, event).await,
                Err(e) => {
                    tracing::error!(kind = e.kind(), error = %e, "Startup failed");
                    json!({ "statusCode": 500, "error": e.kind(), "message": e.to_string() })
                }
            };

            println!("{}", serde_json::to_string_pretty(&response)?);
            if response["statusCode"] != 200 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn read_event(file: Option<PathBuf>, inline: Option<String>) -> anyhow::Result<Value> {
    let text = match (file, inline) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read event file {}", path.display()))?,
        (None, Some(text)) => text,
        (None, None) => return Ok(json!({})),
    };
    serde_json::from_str(&text).context("event is not valid JSON")
}
