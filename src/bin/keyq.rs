//! keyq CLI: run the chat relay over a stream of inbound events.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keyq::config::{Config, EngineSettings};
use keyq::engine::{Dispatcher, SubmitResult, TaskProcessor};
use keyq::llm::{AssistantCompletion, anthropic_client};
use keyq::model::NewWorkItem;
use keyq::relay::{Completion, ConsoleSink, EchoCompletion, Inbound, ReplyProcessor};
use keyq::telemetry::{TelemetryConfig, init_telemetry};
use rig::client::CompletionClient;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keyq", about = "Per-key serialized chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay JSON-lines inbound events; replies are printed to stdout
    Run {
        /// Read events from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
        /// Engine settings TOML file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Echo messages back instead of calling the assistant
        #[arg(long)]
        echo: bool,
    },
}

/// One inbound event, as a JSON line.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    from: String,
    body: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            input,
            config,
            echo,
        } => cmd_run(input, config, echo).await,
    }
}

async fn cmd_run(
    input: Option<PathBuf>,
    settings_path: Option<PathBuf>,
    echo: bool,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "keyq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let settings = match settings_path {
        Some(path) => EngineSettings::load(&path)?,
        None => EngineSettings::default(),
    };

    if echo {
        let processor = reply_processor(EchoCompletion, &settings);
        return relay(processor, &settings, input).await;
    }

    let client = anthropic_client(config.require_api_key()?)?;
    let mut builder = client.agent(&config.assistant_model).max_tokens(1024);
    if let Some(ref preamble) = config.assistant_preamble {
        builder = builder.preamble(preamble);
    }
    let completion = AssistantCompletion::new(builder.build(), config.assistant_model.clone())
        .history_turns(config.assistant_history_turns);
    relay(reply_processor(completion, &settings), &settings, input).await
}

fn reply_processor<C: Completion>(
    completion: C,
    settings: &EngineSettings,
) -> ReplyProcessor<C, ConsoleSink> {
    let processor = ReplyProcessor::new(completion, ConsoleSink::new());
    match settings.failure_notice {
        Some(ref notice) => processor.with_failure_notice(notice),
        None => processor,
    }
}

async fn relay<P>(
    processor: P,
    settings: &EngineSettings,
    input: Option<PathBuf>,
) -> anyhow::Result<()>
where
    P: TaskProcessor<Payload = Inbound>,
{
    let dispatcher = Dispatcher::new(processor, settings.engine_config());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(&path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    tokio::select! {
        result = feed(&dispatcher, reader) => result?,
        _ = tokio::signal::ctrl_c() => {
            dispatcher.close();
            let discarded = dispatcher.discard_pending();
            warn!(discarded, "interrupted, waiting for in-flight items");
            dispatcher.wait_idle().await;
            return Ok(());
        }
    }

    dispatcher.close();
    info!(active_keys = dispatcher.active_keys(), "input exhausted, draining");

    tokio::select! {
        _ = dispatcher.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            let discarded = dispatcher.discard_pending();
            warn!(discarded, "interrupted, waiting for in-flight items");
            dispatcher.wait_idle().await;
        }
    }

    info!("all keys drained");
    Ok(())
}

/// Submit every event line; return at end of input.
async fn feed<P>(
    dispatcher: &Dispatcher<P>,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
) -> anyhow::Result<()>
where
    P: TaskProcessor<Payload = Inbound>,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let (mut queued, mut duplicates) = (0usize, 0usize);

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                continue;
            }
        };

        let item = NewWorkItem::new(Inbound { body: event.body }).maybe_fingerprint(event.message_id);
        match dispatcher.submit(event.from, item) {
            SubmitResult::Queued { .. } => queued += 1,
            SubmitResult::Duplicate => duplicates += 1,
            SubmitResult::Closed => break,
        }
    }

    info!(lines = line_no, queued, duplicates, "input read");
    Ok(())
}
