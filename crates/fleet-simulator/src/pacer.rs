//! Fixed-rate step scheduler for one vehicle.
//!
//! Every tick: read the latest command, step the vehicle, publish, then sleep
//! off whatever is left of the period. A tick that overruns is followed
//! immediately by the next one with no catch-up, so overruns accumulate as
//! drift against the nominal schedule.

use crate::clock::SharedClock;
use crate::command::{CommandSource, decode_command};
use crate::table::{PublishedState, StateSlot};
use fleet_domain::{CommandVector, STEP_PERIOD_S, VehicleId, VehicleState};
use fleet_dynamics::VehicleRuntime;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pacer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacerState {
    Running,
    Stopped,
}

/// What to do after a tick that took `elapsed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Tick finished early; suspend for the remaining budget.
    Sleep(Duration),
    /// Tick used the whole period or more; start the next one now.
    Overrun(Duration),
}

impl Pace {
    /// Never yields a negative sleep: `Duration` cannot represent one and
    /// any tick at or past the period is an overrun.
    pub fn after(elapsed: Duration, period: Duration) -> Self {
        match period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => Self::Sleep(remaining),
            _ => Self::Overrun(elapsed - period),
        }
    }
}

/// Summary of one vehicle's run, produced when its pacer stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacerReport {
    pub vehicle_id: VehicleId,
    pub ticks: u64,
    pub malformed_commands: u64,
    pub overruns: u64,
    /// Total time by which ticks exceeded the period, never paid back.
    pub accumulated_overrun: Duration,
    pub degraded: bool,
    pub pitch_clamps: u64,
    pub final_state: VehicleState,
}

/// Drives a [`VehicleRuntime`] at a fixed nominal rate.
#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    clock: SharedClock,
    tick_limit: Option<u64>,
}

impl Pacer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            period: Duration::from_secs_f64(STEP_PERIOD_S),
            clock,
            tick_limit: None,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Stop on its own after `ticks` ticks.
    pub fn with_tick_limit(mut self, ticks: u64) -> Self {
        self.tick_limit = Some(ticks);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until cancelled (or until the tick limit).
    ///
    /// Cancellation is checked at tick boundaries and interrupts the sleep,
    /// but never a tick in progress, so the last published state is always
    /// complete.
    pub async fn run(
        &self,
        mut vehicle: VehicleRuntime,
        mut source: Box<dyn CommandSource>,
        slot: StateSlot,
        cancel: CancellationToken,
    ) -> PacerReport {
        let vehicle_id = vehicle.id();
        let mut malformed_commands = 0;
        let mut overruns = 0;
        let mut accumulated_overrun = Duration::ZERO;

        let mut state = PacerState::Running;
        while state == PacerState::Running {
            if cancel.is_cancelled() || self.limit_reached(vehicle.ticks()) {
                state = PacerState::Stopped;
                continue;
            }

            let tick_start = self.clock.elapsed();

            let command = match decode_command(vehicle_id, source.read().as_deref(), tick_start) {
                Ok(command) => command,
                Err(warning) => {
                    warning.emit();
                    malformed_commands += 1;
                    CommandVector::ZERO
                }
            };

            let new_state = vehicle.tick(command);
            let completed_at = self.clock.elapsed();
            vehicle.mark_completed(completed_at);
            slot.publish(PublishedState {
                vehicle_id,
                tick: vehicle.ticks(),
                elapsed_s: completed_at.as_secs_f64(),
                state: new_state,
            });

            // Step and publish both count against the period
            let tick_end = self.clock.elapsed();
            match Pace::after(tick_end.saturating_sub(tick_start), self.period) {
                Pace::Sleep(remaining) => {
                    tokio::select! {
                        _ = cancel.cancelled() => state = PacerState::Stopped,
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
                Pace::Overrun(over) => {
                    overruns += 1;
                    accumulated_overrun += over;
                    debug!(
                        vehicle_id = vehicle_id.0,
                        overrun_us = over.as_micros() as u64,
                        "Tick overran its period"
                    );
                    // Let sibling vehicles and the cancel signal through
                    tokio::task::yield_now().await;
                }
            }
        }

        let report = PacerReport {
            vehicle_id,
            ticks: vehicle.ticks(),
            malformed_commands,
            overruns,
            accumulated_overrun,
            degraded: source.is_degraded(),
            pitch_clamps: vehicle.pitch_clamp_count(),
            final_state: vehicle.state(),
        };

        info!(
            vehicle_id = vehicle_id.0,
            ticks = report.ticks,
            malformed = report.malformed_commands,
            overruns = report.overruns,
            "Vehicle stopped"
        );

        report
    }

    fn limit_reached(&self, ticks: u64) -> bool {
        self.tick_limit.is_some_and(|limit| ticks >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, MonotonicClock};
    use crate::command::ScriptedSource;
    use crate::table::SharedStateTable;
    use fleet_domain::{GroupAssignment, GroupId, VehicleRecord};
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    const PERIOD: Duration = Duration::from_millis(10);

    fn single_slot(id: u32) -> (SharedStateTable, StateSlot) {
        let assignment = GroupAssignment::from_records(&[VehicleRecord {
            vehicle_id: VehicleId(id),
            link: "test".to_string(),
            group_id: GroupId(0),
        }])
        .unwrap();
        let (table, mut writers) = SharedStateTable::allocate(&assignment);
        let slot = writers.remove(&GroupId(0)).unwrap().remove(0);
        (table, slot)
    }

    fn vehicle(id: u32) -> VehicleRuntime {
        VehicleRuntime::new(VehicleId(id), STEP_PERIOD_S).unwrap()
    }

    #[test]
    fn test_pace_never_negative() {
        assert_eq!(
            Pace::after(Duration::from_millis(3), PERIOD),
            Pace::Sleep(Duration::from_millis(7))
        );
        assert_eq!(Pace::after(PERIOD, PERIOD), Pace::Overrun(Duration::ZERO));
        assert_eq!(
            Pace::after(Duration::from_millis(25), PERIOD),
            Pace::Overrun(Duration::from_millis(15))
        );
        assert_eq!(Pace::after(Duration::ZERO, PERIOD), Pace::Sleep(PERIOD));
    }

    /// Time moves only when a tick is published: each published tick costs `cost`.
    #[derive(Debug)]
    struct PublishDrivenClock {
        table: SharedStateTable,
        vehicle_id: VehicleId,
        cost: Duration,
    }

    impl Clock for PublishDrivenClock {
        fn elapsed(&self) -> Duration {
            let ticks = self.table.latest(self.vehicle_id).map_or(0, |p| p.tick);
            self.cost * u32::try_from(ticks).unwrap()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct CapturedEvent {
        level: Level,
        vehicle_id: Option<u64>,
        message: String,
    }

    #[derive(Default)]
    struct EventFields {
        vehicle_id: Option<u64>,
        message: String,
    }

    impl Visit for EventFields {
        fn record_u64(&mut self, field: &Field, value: u64) {
            if field.name() == "vehicle_id" {
                self.vehicle_id = Some(value);
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{value:?}");
            }
        }
    }

    #[derive(Clone, Default)]
    struct EventCapture {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl<S: Subscriber> Layer<S> for EventCapture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = EventFields::default();
            event.record(&mut fields);
            self.events.lock().unwrap().push(CapturedEvent {
                level: *event.metadata().level(),
                vehicle_id: fields.vehicle_id,
                message: fields.message,
            });
        }
    }

    #[tokio::test]
    async fn test_step_and_publish_count_against_period() {
        let (table, slot) = single_slot(1);
        let clock = Arc::new(PublishDrivenClock {
            table: table.clone(),
            vehicle_id: VehicleId(1),
            cost: Duration::from_millis(12),
        });
        let pacer = Pacer::new(clock).with_period(PERIOD).with_tick_limit(5);

        let report = pacer
            .run(
                vehicle(1),
                Box::new(ScriptedSource::constant("0,0,0,0")),
                slot,
                CancellationToken::new(),
            )
            .await;

        // Reading and decoding are free here; all 12ms come from the step and publish
        assert_eq!(report.ticks, 5);
        assert_eq!(report.overruns, 5);
        assert_eq!(report.accumulated_overrun, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_overruns_accumulate_as_drift() {
        // Every clock read costs 15ms; a tick reads the clock three times
        let clock = Arc::new(ManualClock::with_auto_advance(Duration::from_millis(15)));
        let pacer = Pacer::new(clock.clone())
            .with_period(PERIOD)
            .with_tick_limit(10);
        let (table, slot) = single_slot(1);

        let report = pacer
            .run(
                vehicle(1),
                Box::new(ScriptedSource::constant("0,0,0,0")),
                slot,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(report.ticks, 10);
        assert_eq!(report.overruns, 10);
        assert_eq!(report.accumulated_overrun, Duration::from_millis(200));
        // Ten ticks took 450ms against a nominal 100ms: nothing was caught up
        assert_eq!(clock.peek(), Duration::from_millis(450));
        assert_eq!(table.latest(VehicleId(1)).unwrap().tick, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_ticks_sleep_out_the_period() {
        let start = tokio::time::Instant::now();
        let pacer = Pacer::new(MonotonicClock::shared())
            .with_period(PERIOD)
            .with_tick_limit(10);
        let (_table, slot) = single_slot(1);

        let report = pacer
            .run(
                vehicle(1),
                Box::new(ScriptedSource::constant("0,0,0,0")),
                slot,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(report.ticks, 10);
        assert_eq!(report.overruns, 0);
        let took = start.elapsed();
        assert!(took >= PERIOD * 10 && took < PERIOD * 11, "took {took:?}");
    }

    #[tokio::test]
    async fn test_malformed_command_warns_once_and_uses_zero() {
        let clock = Arc::new(ManualClock::with_auto_advance(Duration::from_millis(10)));
        let pacer = Pacer::new(clock).with_period(PERIOD).with_tick_limit(3);
        let (table, slot) = single_slot(3);

        let capture = EventCapture::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(capture.clone()),
        );

        let source = ScriptedSource::new(["0,0,0,0", "1,2,bad,4", "0,0,0,0"]);
        let report = pacer
            .run(vehicle(3), Box::new(source), slot, CancellationToken::new())
            .await;

        let warnings: Vec<_> = capture
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == Level::WARN)
            .cloned()
            .collect();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert_eq!(warnings[0].vehicle_id, Some(3));
        assert_eq!(warnings[0].message, "Invalid command data received");

        assert_eq!(report.malformed_commands, 1);
        assert_eq!(report.final_state, VehicleState::default());
        assert_eq!(table.latest(VehicleId(3)).unwrap().state, VehicleState::default());
    }

    #[tokio::test]
    async fn test_degraded_source_keeps_ticking() {
        let clock = Arc::new(ManualClock::with_auto_advance(Duration::from_millis(10)));
        let pacer = Pacer::new(clock).with_period(PERIOD).with_tick_limit(5);
        let (_table, slot) = single_slot(2);

        let report = pacer
            .run(
                vehicle(2),
                Box::new(crate::command::UnavailableSource::new("/dev/null-link")),
                slot,
                CancellationToken::new(),
            )
            .await;

        assert!(report.degraded);
        assert_eq!(report.ticks, 5);
        assert_eq!(report.malformed_commands, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep_after_complete_tick() {
        let pacer = Pacer::new(MonotonicClock::shared()).with_period(Duration::from_secs(60));
        let (table, slot) = single_slot(5);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let pacer = pacer.clone();
            let cancel = cancel.clone();
            async move {
                pacer
                    .run(
                        vehicle(5),
                        Box::new(ScriptedSource::constant("0.1,0,0,0")),
                        slot,
                        cancel,
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        cancel.cancel();
        let report = task.await.unwrap();

        assert_eq!(report.ticks, 1);
        let published = table.latest(VehicleId(5)).unwrap();
        assert_eq!(published.tick, 1);
        assert_eq!(published.state, report.final_state);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_ticks() {
        let pacer = Pacer::new(MonotonicClock::shared());
        let (_table, slot) = single_slot(6);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pacer
            .run(vehicle(6), Box::new(ScriptedSource::default()), slot, cancel)
            .await;
        assert_eq!(report.ticks, 0);
    }
}
