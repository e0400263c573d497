//! Stockbox kiosk binary.
//!
//! Loads the configuration, brings up the hardware, storage and purchase
//! server client, runs the purchase flow and accepts operator commands on
//! stdin until Ctrl+C, SIGTERM or `quit`.

mod console;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use stockbox_core::config::{KioskConfig, load_config};
use stockbox_flow::{Dispatcher, Statistics, TelemetrySink, TracingSink};
use stockbox_hardware::simulated::SimulatedDoorSensor;
use stockbox_hardware::{AnyDoorSensor, HardwareManager};
use stockbox_network::{AnyAuthorizer, HttpPurchaseClient, ScriptedAuthorizer};
use stockbox_storage::{
    Database, DatabaseConfig, RECORDER_QUEUE_SIZE, SqliteRecorder, SqliteTelemetryRepository,
    TelemetryRepository,
};
use tracing::{error, info, warn};

use crate::console::{Console, Simulation, spawn_stdin_reader};

#[derive(Parser, Debug)]
#[command(name = "stockbox", version, about = "Unattended retail kiosk", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./stockbox.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run every device and the purchase server simulated
    #[arg(long)]
    simulate: bool,

    /// Do not open the telemetry database
    #[arg(long)]
    no_storage: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.simulate {
        config.hardware.simulate = true;
    }
    if cli.no_storage {
        config.storage.enabled = false;
    }
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging.level);
    info!(
        "Stockbox {} starting as {} with {} levels",
        stockbox_core::VERSION,
        config.kiosk.machine_id,
        config.kiosk.levels
    );

    run(config).await
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stockbox={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(config: KioskConfig) -> anyhow::Result<()> {
    let simulate = config.hardware.simulate;

    let storage = if config.storage.enabled {
        let db = Database::new(DatabaseConfig::from_config(&config.storage))
            .await
            .context("failed to open telemetry database")?;
        Some(db)
    } else {
        info!("Telemetry storage disabled");
        None
    };

    let statistics = match &storage {
        Some(db) => SqliteTelemetryRepository::new(db.pool().clone())
            .load_statistics()
            .await
            .context("failed to load statistics")?,
        None => Statistics::default(),
    };

    let mut builder = HardwareManager::builder(&config);
    let mut door = None;
    if simulate {
        let (sensor, handle) = SimulatedDoorSensor::new();
        builder = builder.door(AnyDoorSensor::Simulated(sensor));
        door = Some(handle);
    }
    let (hardware, mut monitors) = builder.build();

    let report = hardware.connect_all().await;
    if report.all_real() {
        info!("All devices connected");
    }
    monitors.start_monitors(&hardware);
    let hardware_events = monitors
        .take_events()
        .context("hardware event stream already taken")?;

    let (authorizer, simulation) = match door {
        Some(door) => {
            let script = ScriptedAuthorizer::new();
            let simulation = Simulation {
                door,
                script: script.clone(),
            };
            (AnyAuthorizer::Scripted(script), Some(simulation))
        }
        None => {
            let client =
                HttpPurchaseClient::new(&config.authorization, config.kiosk.machine_id.clone())
                    .context("failed to build purchase server client")?;
            (AnyAuthorizer::Http(client), None)
        }
    };

    let (sink, writer) = match &storage {
        Some(db) => {
            let (recorder, writer) = SqliteRecorder::spawn(db, RECORDER_QUEUE_SIZE);
            (Box::new(recorder) as Box<dyn TelemetrySink>, Some(writer))
        }
        None => (Box::new(TracingSink) as Box<dyn TelemetrySink>, None),
    };

    let (dispatcher, handle) = Dispatcher::new(hardware.clone(), authorizer, sink, &config);
    let dispatcher = dispatcher
        .with_statistics(statistics)
        .with_hardware_events(hardware_events);
    let flow = tokio::spawn(dispatcher.run());

    let console = Console {
        handle: handle.clone(),
        hardware: hardware.clone(),
        storage: storage.clone(),
        simulation,
    };

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        result = console.run(spawn_stdin_reader()) => {
            if let Err(e) = result {
                error!("Console failed: {:#}", e);
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = handle.shutdown().await {
        warn!("Dispatcher already stopped: {}", e);
    }
    drop(console);
    drop(handle);
    if let Err(e) = flow.await {
        error!("Purchase flow task failed: {}", e);
    }

    monitors.shutdown().await;
    hardware.shutdown().await;

    if let Some(writer) = writer
        && let Err(e) = writer.await
    {
        error!("Telemetry writer failed: {}", e);
    }
    if let Some(db) = storage {
        db.close().await;
    }

    info!("Stockbox stopped");
    Ok(())
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
