//! MIDIRouter - rule-based MIDI relay
//!
//! Starts one router per configuration file and runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midirouter::config::RouterConfig;
use midirouter::transport::{discovery, MidirInput, MidirOutput};
use midirouter::Router;

/// MIDIRouter - filter, transform and re-generate MIDI between devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Router configuration files (YAML or JSON), one router each
    configs: Vec<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

/// A started router with its open source port
struct Running {
    router: Arc<Router>,
    input: MidirInput,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports || args.configs.is_empty() {
        println!("MIDIRouter v{}", env!("CARGO_PKG_VERSION"));
        if args.configs.is_empty() {
            println!("Usage: midirouter <config file 1> [config file 2] ...");
        }
        discovery::print_ports();
        return Ok(());
    }

    info!("Starting MIDIRouter v{}...", env!("CARGO_PKG_VERSION"));

    let mut running = Vec::new();
    for path in &args.configs {
        match start_router(path).await {
            Ok(router) => running.push(router),
            Err(e) => error!("Error loading config {}: {:#}", path.display(), e),
        }
    }

    if running.is_empty() {
        anyhow::bail!("No router could be started");
    }
    info!("{} router(s) running", running.len());

    shutdown_signal().await;

    for Running { router, input } in running {
        // Close the source first so no new messages race the reset
        drop(input);
        router.cleanup();
    }

    info!("MIDIRouter shutdown complete");
    Ok(())
}

async fn start_router(path: &Path) -> Result<Running> {
    let (config, rules) = RouterConfig::load(path).await?;

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let output = MidirOutput::open(&format!("MIDIRouter-{}-out", name), &config.destination_device)
        .with_context(|| format!("Cannot open destination '{}'", config.destination_device))?;

    let router = Arc::new(Router::new(
        config.router_settings(name.clone()),
        rules,
        Arc::new(output),
    )?);

    let input = {
        let router = router.clone();
        MidirInput::open(
            &format!("MIDIRouter-{}-in", name),
            &config.source_device,
            move |packet| {
                router.on_packet(&packet);
            },
        )
        .with_context(|| format!("Cannot open source '{}'", config.source_device))?
    };
    info!("Router '{}' listening on '{}'", name, input.name());

    Ok(Running {
        router,
        input,
    })
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
