//! Group executor: one isolated execution context per vehicle group.
//!
//! Each group gets its own OS thread running a single-threaded tokio runtime,
//! and each vehicle of the group is a task on that runtime. Groups share no
//! mutable simulation state: a vehicle only touches its own runtime, its own
//! command source and the writer half of its own table slot.

use crate::clock::SharedClock;
use crate::command::SourceFactory;
use crate::error::{Result, SimulatorError};
use crate::pacer::{Pacer, PacerReport};
use crate::table::{SharedStateTable, StateSlot};
use fleet_domain::{GroupAssignment, GroupId, STEP_PERIOD_S, VehicleId, VehicleRecord};
use fleet_dynamics::VehicleRuntime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long a stopping group waits for leftover blocking I/O (link reads).
const GROUP_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Outcome of one group's run, vehicles in slot order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub group_id: GroupId,
    pub vehicles: Vec<PacerReport>,
    /// Vehicles whose task ended abnormally; the rest of the fleet kept running.
    pub failures: Vec<VehicleFailure>,
}

/// A vehicle task that panicked or was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleFailure {
    pub vehicle_id: VehicleId,
    pub reason: String,
}

/// A vehicle ready to run: configuration, dynamics and its slot writer.
struct VehicleLaunch {
    record: VehicleRecord,
    runtime: VehicleRuntime,
    slot: StateSlot,
}

/// Starts every group of a fleet.
#[derive(Clone)]
pub struct FleetExecutor {
    factory: Arc<dyn SourceFactory>,
    pacer: Pacer,
    dt: f64,
}

impl FleetExecutor {
    pub fn new(factory: Arc<dyn SourceFactory>, clock: SharedClock) -> Self {
        Self {
            factory,
            pacer: Pacer::new(clock),
            dt: STEP_PERIOD_S,
        }
    }

    /// Override the pacing period (the model step stays at `STEP_PERIOD_S`).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.pacer = self.pacer.with_period(period);
        self
    }

    /// Model discretization step, independent of the pacing period.
    pub fn with_step_period(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Every vehicle stops on its own after `ticks` ticks.
    pub fn with_tick_limit(mut self, ticks: u64) -> Self {
        self.pacer = self.pacer.with_tick_limit(ticks);
        self
    }

    /// Build every vehicle, allocate the table and launch all groups.
    ///
    /// All models are discretized before any group starts, so an invalid
    /// model aborts startup without leaving half a fleet running.
    pub fn start(&self, assignment: &GroupAssignment) -> Result<FleetHandle> {
        let (table, mut writers) = SharedStateTable::allocate(assignment);

        let mut launches = Vec::with_capacity(assignment.group_count());
        for (group_id, members) in assignment.groups() {
            let slots = writers.remove(&group_id).unwrap_or_default();
            let mut group = Vec::with_capacity(members.len());

            for (record, slot) in members.iter().zip(slots) {
                let runtime = VehicleRuntime::new(record.vehicle_id, self.dt).map_err(|source| {
                    SimulatorError::Construction {
                        vehicle_id: record.vehicle_id,
                        source,
                    }
                })?;
                group.push(VehicleLaunch {
                    record: record.clone(),
                    runtime,
                    slot,
                });
            }
            launches.push((group_id, group));
        }

        let cancel = CancellationToken::new();
        let mut groups = Vec::with_capacity(launches.len());

        for (group_id, vehicles) in launches {
            let factory = Arc::clone(&self.factory);
            let pacer = self.pacer.clone();
            let group_cancel = cancel.child_token();

            let spawned = std::thread::Builder::new()
                .name(group_id.to_string())
                .spawn(move || run_group(group_id, vehicles, factory, pacer, group_cancel));

            match spawned {
                Ok(handle) => groups.push((group_id, handle)),
                Err(source) => {
                    cancel.cancel();
                    return Err(SimulatorError::GroupStart { group_id, source });
                }
            }
        }

        info!(
            groups = groups.len(),
            vehicles = table.vehicle_count(),
            period_ms = self.pacer.period().as_secs_f64() * 1000.0,
            "Fleet started"
        );

        Ok(FleetHandle {
            table,
            cancel,
            groups,
        })
    }
}

/// Running fleet.
pub struct FleetHandle {
    table: SharedStateTable,
    cancel: CancellationToken,
    groups: Vec<(GroupId, JoinHandle<Result<GroupReport>>)>,
}

impl FleetHandle {
    /// Reader side of the shared state table.
    pub fn table(&self) -> &SharedStateTable {
        &self.table
    }

    /// Token that stops every vehicle of every group when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Broadcast cancellation and wait for every vehicle to stop.
    pub async fn shutdown(self) -> Result<Vec<GroupReport>> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for every group to finish without cancelling.
    pub async fn join(self) -> Result<Vec<GroupReport>> {
        tokio::task::spawn_blocking(move || self.join_blocking())
            .await
            .map_err(|err| SimulatorError::Join(err.to_string()))?
    }

    /// Blocking variant of [`join`](Self::join) for non-async callers.
    pub fn join_blocking(mut self) -> Result<Vec<GroupReport>> {
        let groups = std::mem::take(&mut self.groups);
        let mut reports = Vec::with_capacity(groups.len());
        let mut first_error = None;

        for (group_id, handle) in groups {
            let outcome = handle
                .join()
                .unwrap_or(Err(SimulatorError::GroupPanicked(group_id)));
            match outcome {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(group_id = group_id.0, error = %err, "Group failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }
}

impl Drop for FleetHandle {
    /// A handle dropped without `shutdown` still stops every group.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Body of a group thread.
fn run_group(
    group_id: GroupId,
    vehicles: Vec<VehicleLaunch>,
    factory: Arc<dyn SourceFactory>,
    pacer: Pacer,
    cancel: CancellationToken,
) -> Result<GroupReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| SimulatorError::GroupStart { group_id, source })?;

    let vehicle_count = vehicles.len();
    let report = runtime.block_on(async move {
        let mut tasks = JoinSet::new();
        let mut task_vehicles = HashMap::with_capacity(vehicle_count);

        for (index, launch) in vehicles.into_iter().enumerate() {
            let vehicle_id = launch.record.vehicle_id;
            let source = factory.open(&launch.record);
            if source.is_degraded() {
                warn!(
                    group_id = group_id.0,
                    vehicle_id = vehicle_id.0,
                    "Vehicle starting in degraded mode"
                );
            }

            let pacer = pacer.clone();
            let cancel = cancel.clone();
            let task = tasks.spawn(async move {
                let report = pacer.run(launch.runtime, source, launch.slot, cancel).await;
                (index, report)
            });
            task_vehicles.insert(task.id(), vehicle_id);
        }

        info!(group_id = group_id.0, vehicles = vehicle_count, "Group running");

        let mut finished = Vec::with_capacity(vehicle_count);
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(err) => {
                    let Some(vehicle_id) = task_vehicles.get(&err.id()).copied() else {
                        error!(group_id = group_id.0, error = %err, "Unknown task failed");
                        continue;
                    };
                    error!(
                        group_id = group_id.0,
                        vehicle_id = vehicle_id.0,
                        error = %err,
                        "Vehicle task failed"
                    );
                    failures.push(VehicleFailure {
                        vehicle_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        GroupReport {
            group_id,
            vehicles: finished.into_iter().map(|(_, report)| report).collect(),
            failures,
        }
    });

    runtime.shutdown_timeout(GROUP_SHUTDOWN_GRACE);
    info!(group_id = group_id.0, "Group stopped");
    Ok(report)
}
