//! Command-line interface for the mqtt-sim device simulator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use mqttsim_core::config::env_vars;
use mqttsim_core::{EventBus, SimConfig};
use mqttsim_devices::{
    DeviceService, EngineOptions, FileTemplateSource, ImportPayload, MemoryTransport,
    MqttTransport, SharedTransport,
};
use mqttsim_storage::RedbDeviceStore;

/// mqtt-sim - Simulated smart-home devices on an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "mqtt-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file (default: ./config.toml if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and simulate all stored devices until Ctrl-C.
    Serve,
    /// List the supported device kinds.
    Kinds,
    /// Write a snapshot of every device and its state.
    Export {
        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upsert devices from a snapshot file.
    Import {
        /// Snapshot or import payload (JSON).
        #[arg(required = true)]
        file: PathBuf,
        /// Delete stored devices that are not in the file.
        #[arg(long)]
        replace_all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Kinds => print_kinds(),
        Command::Serve => {
            let config = SimConfig::load(args.config.as_deref())?;
            run_server(config).await
        }
        Command::Export { output } => {
            let config = SimConfig::load(args.config.as_deref())?;
            run_export(config, output.as_deref())
        }
        Command::Import { file, replace_all } => {
            let config = SimConfig::load(args.config.as_deref())?;
            run_import(config, &file, replace_all).await
        }
    }
}

fn init_logging(verbose: bool) {
    // JSON format for container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "mqttsim=debug" } else { "mqttsim=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so export output on stdout stays clean.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_service(config: &SimConfig, transport: SharedTransport) -> Result<DeviceService> {
    let store = RedbDeviceStore::open(&config.storage_path).with_context(|| {
        format!("Failed to open device store {}", config.storage_path.display())
    })?;
    Ok(DeviceService::new(
        Arc::new(store),
        transport,
        Arc::new(EventBus::new()),
        Arc::new(FileTemplateSource::new(&config.templates_path)),
        EngineOptions::from(config),
    ))
}

fn print_kinds() -> Result<()> {
    let kinds = mqttsim_devices::list_kinds();
    println!("{}", serde_json::to_string_pretty(&kinds)?);
    Ok(())
}

async fn run_server(config: SimConfig) -> Result<()> {
    let topics = mqttsim_devices::Topics::new(config.mqtt.namespace.clone());
    let mqtt = Arc::new(MqttTransport::connect(&config.mqtt, &topics)?);
    let service = build_service(&config, mqtt.clone())?;

    let mut events = service.events().subscribe();
    let armed = service.start()?;
    info!(
        "Simulator running on namespace '{}' ({} telemetry timers)",
        config.mqtt.namespace, armed
    );

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
        _ = async {
            while let Some((event, _)) = events.recv().await {
                debug!(event = event.type_name(), device_id = ?event.device_id(), "Live update");
            }
        } => {}
    }

    service.shutdown();
    mqtt.disconnect().await;
    Ok(())
}

fn run_export(config: SimConfig, output: Option<&Path>) -> Result<()> {
    // Export is a pure read; nothing is published.
    let service = build_service(&config, Arc::new(MemoryTransport::new()))?;
    let snapshot = service.export_all()?;
    let json = serde_json::to_string_pretty(&snapshot)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Exported {} devices to {}", snapshot.count, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn run_import(config: SimConfig, file: &Path, replace_all: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut payload: ImportPayload = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid import file {}", file.display()))?;
    payload.replace_all |= replace_all;

    let topics = mqttsim_devices::Topics::new(config.mqtt.namespace.clone());
    let mqtt = Arc::new(MqttTransport::connect(&config.mqtt, &topics)?);
    let service = build_service(&config, mqtt.clone())?;

    let report = service.import_all(payload).await;
    service.shutdown();
    mqtt.disconnect().await;

    let report = report?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    report.check()?;
    Ok(())
}
