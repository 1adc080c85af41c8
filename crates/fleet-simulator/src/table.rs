//! Shared state table: one single-writer slot per vehicle.
//!
//! Slots are `tokio::sync::watch` channels. The vehicle task owns the only
//! sender and replaces the whole [`PublishedState`] each tick; readers borrow
//! the latest value and can never observe a half-written state. No lock is
//! held across the pacer's sleep.

use chrono::{DateTime, Utc};
use fleet_domain::{GroupAssignment, GroupId, VehicleId, VehicleState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// One vehicle's latest published state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PublishedState {
    pub vehicle_id: VehicleId,
    /// Ticks completed when this state was published.
    pub tick: u64,
    /// Clock reading at publication, in seconds.
    pub elapsed_s: f64,
    pub state: VehicleState,
}

impl PublishedState {
    pub fn initial(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            tick: 0,
            elapsed_s: 0.0,
            state: VehicleState::default(),
        }
    }
}

/// Writer half of a slot, owned by exactly one vehicle task.
#[derive(Debug)]
pub struct StateSlot {
    vehicle_id: VehicleId,
    tx: watch::Sender<PublishedState>,
}

impl StateSlot {
    pub fn vehicle_id(&self) -> VehicleId {
        self.vehicle_id
    }

    /// Atomically replace the slot's value.
    pub fn publish(&self, published: PublishedState) {
        debug_assert_eq!(published.vehicle_id, self.vehicle_id);
        self.tx.send_replace(published);
    }
}

/// Fleet-wide state snapshot, grouped as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub taken_at: DateTime<Utc>,
    pub groups: BTreeMap<GroupId, Vec<PublishedState>>,
}

impl FleetSnapshot {
    pub fn vehicle_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &PublishedState> {
        self.groups.values().flatten()
    }
}

/// Reader side of every slot. Cheap to clone; the layout is fixed at
/// allocation and never changes during a run.
#[derive(Debug, Clone)]
pub struct SharedStateTable {
    groups: Arc<BTreeMap<GroupId, Vec<watch::Receiver<PublishedState>>>>,
}

/// Writers for one group, in slot order.
pub type GroupSlots = Vec<StateSlot>;

impl SharedStateTable {
    /// Allocate one slot per assigned vehicle.
    pub fn allocate(assignment: &GroupAssignment) -> (Self, BTreeMap<GroupId, GroupSlots>) {
        let mut readers = BTreeMap::new();
        let mut writers = BTreeMap::new();

        for (group_id, members) in assignment.groups() {
            let (group_readers, group_writers): (Vec<_>, Vec<_>) = members
                .iter()
                .map(|record| {
                    let (tx, rx) = watch::channel(PublishedState::initial(record.vehicle_id));
                    (
                        rx,
                        StateSlot {
                            vehicle_id: record.vehicle_id,
                            tx,
                        },
                    )
                })
                .unzip();
            readers.insert(group_id, group_readers);
            writers.insert(group_id, group_writers);
        }

        (
            Self {
                groups: Arc::new(readers),
            },
            writers,
        )
    }

    /// Latest fully published state of every vehicle.
    ///
    /// Slots are read one after another, so different vehicles may be at
    /// different ticks.
    pub fn snapshot(&self) -> FleetSnapshot {
        let groups = self
            .groups
            .iter()
            .map(|(group_id, slots)| (*group_id, slots.iter().map(|rx| *rx.borrow()).collect()))
            .collect();

        FleetSnapshot {
            taken_at: Utc::now(),
            groups,
        }
    }

    pub fn latest(&self, vehicle_id: VehicleId) -> Option<PublishedState> {
        self.groups
            .values()
            .flatten()
            .map(|rx| *rx.borrow())
            .find(|published| published.vehicle_id == vehicle_id)
    }

    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups.keys().copied()
    }

    pub fn vehicle_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::FleetConfig;

    fn allocate_default() -> (SharedStateTable, BTreeMap<GroupId, GroupSlots>) {
        let assignment = FleetConfig::default_fleet().assignment().unwrap();
        SharedStateTable::allocate(&assignment)
    }

    #[test]
    fn test_allocate_matches_assignment() {
        let (table, writers) = allocate_default();
        assert_eq!(table.vehicle_count(), 8);
        assert_eq!(table.group_ids().collect::<Vec<_>>(), vec![GroupId(0), GroupId(1)]);

        let group1: Vec<_> = writers[&GroupId(1)].iter().map(StateSlot::vehicle_id).collect();
        assert_eq!(group1, vec![VehicleId(4), VehicleId(5), VehicleId(6), VehicleId(7)]);
    }

    #[test]
    fn test_snapshot_sees_published_state() {
        let (table, writers) = allocate_default();
        let slot = &writers[&GroupId(0)][2];

        let published = PublishedState {
            vehicle_id: slot.vehicle_id(),
            tick: 17,
            elapsed_s: 0.17,
            state: VehicleState {
                p: 0.5,
                psi: -1.0,
                ..Default::default()
            },
        };
        slot.publish(published);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.vehicle_count(), 8);
        assert_eq!(snapshot.groups[&GroupId(0)][2], published);
        assert_eq!(snapshot.groups[&GroupId(0)][1], PublishedState::initial(VehicleId(1)));
        assert_eq!(table.latest(VehicleId(2)), Some(published));
        assert_eq!(table.latest(VehicleId(99)), None);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_state() {
        let (table, mut writers) = allocate_default();
        let slot = writers.get_mut(&GroupId(0)).unwrap().remove(0);

        let writer = std::thread::spawn(move || {
            for tick in 1..=20_000u64 {
                let v = tick as f64;
                slot.publish(PublishedState {
                    vehicle_id: VehicleId(0),
                    tick,
                    elapsed_s: v,
                    state: VehicleState::from_array(&[v; 9]),
                });
            }
        });

        let mut last_tick = 0;
        while !writer.is_finished() {
            let seen = table.latest(VehicleId(0)).unwrap();
            let expected = seen.tick as f64;
            assert!(seen.state.to_array().iter().all(|x| *x == expected));
            assert!(seen.tick >= last_tick);
            last_tick = seen.tick;
        }
        writer.join().unwrap();
        assert_eq!(table.latest(VehicleId(0)).unwrap().tick, 20_000);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let (table, _writers) = allocate_default();
        let json = serde_json::to_value(table.snapshot()).unwrap();
        assert_eq!(json["groups"]["1"][0]["vehicle_id"], 4);
        assert_eq!(json["groups"]["0"][3]["state"]["theta"], 0.0);
    }
}
