//! nltrace: headless live viewer for native allocation traces
//!
//! Runs the trace engine, polls its event queue on an interval, and prints
//! allocation traffic from the connected client.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nltrace_engine::{config, EngineConfig, TraceServer};
use nltrace_protocol::TraceEvent;

mod view;

use view::TraceView;

#[derive(Parser)]
#[command(name = "nltrace")]
#[command(author, version, about = "Live native allocation trace viewer")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for the trace endpoint (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Event poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut engine_config = if let Some(config_path) = &cli.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        EngineConfig::default()
    };

    if let Some(bind) = cli.bind {
        engine_config.bind_address = bind;
    }

    let server = TraceServer::bind(engine_config)
        .await
        .context("Failed to start trace endpoint")?;
    tracing::info!("Waiting for a traced process on {}", server.local_addr());

    // The handler runs inline with the drain, so it only collects; symbol
    // resolution needs the async query path and happens afterwards.
    let batch: Arc<Mutex<Vec<TraceEvent>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let batch = Arc::clone(&batch);
        server.set_event_handler(Box::new(move |event| {
            batch.lock().expect("event batch lock poisoned").push(event);
        }));
    }

    let mut view = TraceView::new();
    let mut poll = tokio::time::interval(Duration::from_millis(cli.poll_interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }

            _ = poll.tick() => {
                server.dispatch_events().context("Event dispatch failed")?;

                let events: Vec<TraceEvent> = {
                    let mut batch = batch.lock().expect("event batch lock poisoned");
                    batch.drain(..).collect()
                };
                for event in events {
                    view.handle_event(&server, event).await;
                }
            }
        }
    }

    server.shutdown().await;

    // Events that raced shutdown, including the final Disconnected
    server.dispatch_events().context("Event dispatch failed")?;
    let events: Vec<TraceEvent> = {
        let mut batch = batch.lock().expect("event batch lock poisoned");
        batch.drain(..).collect()
    };
    for event in events {
        view.handle_event(&server, event).await;
    }

    Ok(())
}
