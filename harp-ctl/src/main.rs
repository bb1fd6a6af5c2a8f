//! Laser harp controller - main entry point
//!
//! Runs the control loop against the simulated beam bank, logging tones and
//! display frames. A scripted performer plays the configured target sequence
//! (or `--play`) on the simulated beams.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use harp_common::config::ConfigResolver;
use harp_common::HarpConfig;
use harp_ctl::display::DisplayGeometry;
use harp_ctl::hardware::{LogDisplay, LogToneOutput, SimulatedIo};
use harp_ctl::melody::{spawn_attract_melody, MARY_HAD_A_LITTLE_LAMB};
use harp_ctl::performer::BeamPerformer;
use harp_ctl::HarpController;
use tokio::signal;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for laser-harp
#[derive(Parser, Debug)]
#[command(name = "laser-harp")]
#[command(about = "Laser harp installation controller")]
#[command(version)]
struct Args {
    /// Configuration file (overrides LASER_HARP_CONFIG and default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Comma-separated note symbols for the simulated performer
    /// (defaults to the target sequence)
    #[arg(long, value_delimiter = ',')]
    play: Vec<String>,

    /// Do not run the simulated performer
    #[arg(long)]
    no_perform: bool,

    /// Loop the attract melody (same as attract_mode = true)
    #[arg(long)]
    attract: bool,

    /// Exit once the performance is finished instead of waiting for Ctrl+C
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration before logging so logging.level can apply
    let loaded = HarpConfig::resolve_and_load(&ConfigResolver::new(), args.config.as_deref());
    let log_level = args
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|(c, _)| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("harp_ctl={0},harp_common={0},laser_harp={0}", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Laser harp {} ({}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("HARP_BUILD_ID"),
        env!("HARP_BUILD_PROFILE"),
        env!("HARP_BUILD_TIME")
    );

    let (config, config_path) = loaded.context("Failed to load configuration")?;
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let io = SimulatedIo::new();
    let performer = BeamPerformer::new(io.clone(), &config);
    performer.prepare();

    let mut controller = HarpController::initialize(
        config.clone(),
        io,
        LogToneOutput::new(config.output_channel),
        LogDisplay::new(DisplayGeometry::from_config(&config.display)),
    )
    .context("Failed to initialize laser harp")?;

    let event_logger = tokio::spawn(log_events(controller.subscribe()));

    let attract = (config.attract_mode || args.attract).then(|| {
        spawn_attract_melody(
            controller.tone_queue(),
            MARY_HAD_A_LITTLE_LAMB,
            config.note_duration(),
        )
    });

    let (done_tx, done_rx) = oneshot::channel();
    let performance = (!args.no_perform).then(|| {
        let script = if args.play.is_empty() {
            config.target_sequence.clone()
        } else {
            args.play.clone()
        };
        tokio::spawn(async move {
            if let Err(e) = performer.perform(&script).await {
                error!("Performance failed: {}", e);
            }
            let _ = done_tx.send(());
        })
    });

    let exit_after_performance = args.once && performance.is_some();
    let stop = async move {
        if exit_after_performance {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = done_rx => info!("Performance finished"),
            }
        } else {
            shutdown_signal().await;
        }
    };

    let result = controller.run(stop).await;

    info!("Stopping laser harp...");
    if let Some(task) = attract {
        task.abort();
    }
    if let Some(task) = performance {
        task.abort();
    }
    controller.shutdown();
    drop(controller);
    let _ = event_logger.await;

    result.context("Control loop failed")?;
    info!("GPIO released. Bye.");
    Ok(())
}

/// Log every controller event as JSON at debug level
async fn log_events(mut rx: broadcast::Receiver<harp_common::HarpEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!("event {}", json),
                Err(e) => warn!("Unserializable {} event: {}", event.name(), e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
