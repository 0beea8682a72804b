//! threadrelay CLI entry point.

use threadrelay::api::{ApiState, start_http_server};
use threadrelay::config::Config;
use threadrelay::messaging::SlackAdapter;
use threadrelay::reference;
use threadrelay::trigger::TriggerPayload;
use threadrelay::worker::{RelayWorker, report_failure};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "threadrelay")]
#[command(about = "Relay Slack messages to a conversational AI backend and post the reply")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP ingress
    Serve,
    /// Run one relay cycle from a JSON trigger payload
    Relay {
        /// Payload file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        payload: PathBuf,
    },
    /// Print the message reference parsed from a permalink
    Resolve {
        url: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `resolve` is offline; no config, logging or runtime needed.
    if let Command::Resolve { url } = &cli.command {
        let reference = reference::resolve(url)?;
        println!("{}", serde_json::to_string_pretty(&reference)?);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let tracer_provider = threadrelay::telemetry::init_tracing(cli.debug, &config.telemetry);

        let result = match cli.command {
            Command::Serve => cmd_serve(&config).await,
            Command::Relay { payload } => cmd_relay(&config, &payload).await,
            Command::Resolve { .. } => Ok(()),
        };

        if let Some(provider) = tracer_provider
            && let Err(error) = provider.shutdown()
        {
            eprintln!("failed to flush OTLP spans: {error}");
        }
        result
    })
}

fn build_worker(config: &Config) -> anyhow::Result<RelayWorker<SlackAdapter>> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let adapter = SlackAdapter::new(config.slack_bot_token()?)?;
    Ok(RelayWorker::new(Arc::new(adapter))?)
}

async fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let worker = Arc::new(build_worker(config)?);
    let state = Arc::new(ApiState::new(
        worker,
        config.defaults.clone(),
        config.user_id_pattern()?,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = start_http_server(config.api.bind, state, shutdown_rx)
        .await
        .with_context(|| format!("failed to bind {}", config.api.bind))?;

    tracing::info!("threadrelay started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    server.await.context("HTTP server task panicked")?;

    tracing::info!("threadrelay stopped");
    Ok(())
}

async fn cmd_relay(config: &Config, payload: &Path) -> anyhow::Result<()> {
    let json = if payload == Path::new("-") {
        let mut json = String::new();
        std::io::stdin()
            .read_to_string(&mut json)
            .context("failed to read payload from stdin")?;
        json
    } else {
        std::fs::read_to_string(payload)
            .with_context(|| format!("failed to read payload {}", payload.display()))?
    };

    let request = TriggerPayload::from_json(&json)?.validate(&config.user_id_pattern()?)?;
    let worker = build_worker(config)?;

    match worker.run(request).await {
        Ok(delivery) => {
            println!(
                "{}",
                serde_json::json!({
                    "conversation_id": delivery.outcome.conversation_id,
                    "attempts": delivery.outcome.attempts,
                    "channel": delivery.posted.channel,
                    "thread_ts": delivery.posted.thread_ts,
                    "ts": delivery.posted.ts,
                })
            );
            Ok(())
        }
        Err(error) => {
            report_failure(&error);
            Err(error.into())
        }
    }
}
