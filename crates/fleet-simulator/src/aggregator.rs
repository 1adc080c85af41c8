//! Periodic fleet snapshots and where they go.

use crate::error::Result;
use crate::table::{FleetSnapshot, SharedStateTable};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination for fleet snapshots.
pub trait SnapshotSink: Send {
    fn publish(&mut self, snapshot: &FleetSnapshot) -> impl Future<Output = Result<()>> + Send;
}

/// Counters from one aggregator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub snapshots: u64,
    pub sink_failures: u64,
}

/// Reads the shared table at a fixed interval.
#[derive(Debug, Clone)]
pub struct Aggregator {
    table: SharedStateTable,
    interval: Duration,
}

impl Aggregator {
    pub fn new(table: SharedStateTable, interval: Duration) -> Self {
        Self { table, interval }
    }

    /// Snapshot and publish until cancelled. A failing sink is logged and
    /// retried on the next interval.
    pub async fn run<S: SnapshotSink>(
        &self,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> AggregatorStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = AggregatorStats::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.table.snapshot();
            stats.snapshots += 1;

            if let Err(err) = sink.publish(&snapshot).await {
                stats.sink_failures += 1;
                warn!(error = %err, snapshot = stats.snapshots, "Failed to publish fleet snapshot");
            }
        }

        info!(
            snapshots = stats.snapshots,
            sink_failures = stats.sink_failures,
            "Aggregator stopped"
        );
        stats
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Logs every snapshot at debug level and a fleet summary every `summary_every`.
#[derive(Debug, Clone)]
pub struct LogSink {
    summary_every: u64,
    published: u64,
}

impl LogSink {
    pub fn new(summary_every: u64) -> Self {
        Self {
            summary_every: summary_every.max(1),
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SnapshotSink for LogSink {
    async fn publish(&mut self, snapshot: &FleetSnapshot) -> Result<()> {
        self.published += 1;

        for published in snapshot.vehicles() {
            debug!(
                vehicle_id = published.vehicle_id.0,
                tick = published.tick,
                p = published.state.p,
                q = published.state.q,
                r = published.state.r,
                phi = published.state.phi,
                theta = published.state.theta,
                psi = published.state.psi,
                u = published.state.u,
                "Vehicle state"
            );
        }

        if self.published % self.summary_every == 0 {
            let ticks = snapshot.vehicles().map(|v| v.tick);
            let (min_tick, max_tick) =
                ticks.fold((u64::MAX, 0), |(lo, hi), t| (lo.min(t), hi.max(t)));
            info!(
                taken_at = %snapshot.taken_at,
                vehicles = snapshot.vehicle_count(),
                min_tick,
                max_tick,
                "Fleet snapshot"
            );
        }
        Ok(())
    }
}

/// Sends each snapshot as one JSON datagram.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpSink {
    pub async fn bind(local: impl ToSocketAddrs, remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        info!(local = %socket.local_addr()?, remote = %remote, "Snapshot publisher bound");
        Ok(Self { socket, remote })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl SnapshotSink for UdpSink {
    async fn publish(&mut self, snapshot: &FleetSnapshot) -> Result<()> {
        let payload = serde_json::to_vec(snapshot)?;
        self.socket.send_to(&payload, self.remote).await?;
        Ok(())
    }
}
