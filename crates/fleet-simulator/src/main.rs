//! Fleet Simulator CLI
//!
//! Runs every configured vehicle in real time and publishes fleet snapshots.

use anyhow::Result;
use clap::Parser;
use fleet_simulator::{
    Aggregator, ConstantSourceFactory, FleetExecutor, LinkSourceFactory, LogSink, MonotonicClock,
    SourceFactory, UdpSink, load_fleet_config,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "fleet_simulator=info,fleet_dynamics=info";

#[derive(Parser, Debug)]
#[command(name = "fleet-simulator")]
#[command(about = "Real-time multi-vehicle flight dynamics simulator")]
struct Args {
    /// Fleet description (JSON); the built-in eight-vehicle fleet if omitted
    #[arg(short, long)]
    fleet: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_s: Option<u64>,

    /// Snapshot interval in milliseconds
    #[arg(long, default_value = "100")]
    aggregate_ms: u64,

    /// Send snapshots as JSON datagrams to this address
    #[arg(long)]
    publish_addr: Option<SocketAddr>,

    /// Local address for the snapshot socket
    #[arg(long, default_value = "0.0.0.0:0")]
    bind_addr: SocketAddr,

    /// Ignore command links and feed every vehicle zero commands
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!(version = fleet_simulator::VERSION, "Starting fleet simulator");

    let config = load_fleet_config(args.fleet.as_deref())?;
    let assignment = config.assignment()?;

    let factory: Arc<dyn SourceFactory> = if args.dry_run {
        info!("Dry run: command links are not opened");
        Arc::new(ConstantSourceFactory::zero())
    } else {
        Arc::new(LinkSourceFactory)
    };

    // Bind before any vehicle runs so a bad address leaves nothing behind
    let udp_sink = match args.publish_addr {
        Some(remote) => Some(UdpSink::bind(args.bind_addr, remote).await?),
        None => None,
    };

    let fleet = FleetExecutor::new(factory, MonotonicClock::shared()).start(&assignment)?;

    let aggregator = Aggregator::new(
        fleet.table().clone(),
        Duration::from_millis(args.aggregate_ms.max(1)),
    );
    let aggregator_cancel = CancellationToken::new();
    let cancel = aggregator_cancel.clone();
    let aggregator_task = match udp_sink {
        Some(mut sink) => tokio::spawn(async move { aggregator.run(&mut sink, cancel).await }),
        None => {
            let mut sink = LogSink::default();
            tokio::spawn(async move { aggregator.run(&mut sink, cancel).await })
        }
    };

    match args.duration_s {
        Some(secs) => {
            tokio::select! {
                _ = shutdown_signal() => info!("Shutdown signal received"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(secs, "Run duration elapsed");
                }
            }
        }
        None => {
            shutdown_signal().await;
            info!("Shutdown signal received");
        }
    }

    let groups = fleet.shutdown().await?;
    aggregator_cancel.cancel();
    let stats = aggregator_task.await?;

    info!("=== FINAL REPORT ===");
    for group in &groups {
        for report in &group.vehicles {
            info!(
                group_id = group.group_id.0,
                vehicle_id = report.vehicle_id.0,
                ticks = report.ticks,
                malformed = report.malformed_commands,
                overruns = report.overruns,
                drift_ms = report.accumulated_overrun.as_secs_f64() * 1000.0,
                pitch_clamps = report.pitch_clamps,
                "Vehicle report"
            );
            if report.degraded {
                warn!(vehicle_id = report.vehicle_id.0, "Vehicle ran without a command link");
            }
        }
        for failure in &group.failures {
            warn!(
                group_id = group.group_id.0,
                vehicle_id = failure.vehicle_id.0,
                reason = %failure.reason,
                "Vehicle failed during the run"
            );
        }
    }
    info!(
        snapshots = stats.snapshots,
        sink_failures = stats.sink_failures,
        "Simulator shut down"
    );

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
