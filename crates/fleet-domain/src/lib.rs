//! # Fleet Flight Simulator - Domain Model
//!
//! Value objects shared by the dynamics engine, the concurrent executor and
//! the aggregator: identities, the four-channel command vector, the
//! nine-element vehicle state and the fleet configuration with its group
//! partition.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Fixed simulation step period in seconds (100 steps per second).
pub const STEP_PERIOD_S: f64 = 0.01;

/// Number of command channels per vehicle.
pub const COMMAND_CHANNELS: usize = 4;

/// Number of elements in the published state vector.
pub const STATE_ELEMENTS: usize = 9;

// =============================================================================
// IDENTITIES
// =============================================================================

/// Vehicle identity, unique across the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle-{}", self.0)
    }
}

/// Group identity. Each group is an isolated execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

// =============================================================================
// COMMAND VECTOR
// =============================================================================

/// Four-channel command: `[roll rate, pitch rate, yaw rate, velocity]`.
///
/// No bounds are enforced; commands are external truth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandVector(pub [f64; COMMAND_CHANNELS]);

impl CommandVector {
    /// The fallback command used whenever input is missing or malformed.
    pub const ZERO: Self = Self([0.0; COMMAND_CHANNELS]);

    pub fn new(roll_rate: f64, pitch_rate: f64, yaw_rate: f64, velocity: f64) -> Self {
        Self([roll_rate, pitch_rate, yaw_rate, velocity])
    }

    pub fn roll_rate(&self) -> f64 {
        self.0[0]
    }

    pub fn pitch_rate(&self) -> f64 {
        self.0[1]
    }

    pub fn yaw_rate(&self) -> f64 {
        self.0[2]
    }

    pub fn velocity(&self) -> f64 {
        self.0[3]
    }

    /// Channel value by command index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }
}

/// Why a raw command payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("no command data")]
    Absent,

    #[error("expected 4 values, found {found}")]
    WrongCount { found: usize },

    #[error("token '{token}' is not a number")]
    NotANumber { token: String },

    #[error("token '{token}' is not finite")]
    NonFinite { token: String },
}

impl FromStr for CommandVector {
    type Err = CommandParseError;

    /// Parse a comma-separated line such as `"0.1,-0.2,0,1.5"`.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CommandParseError::Absent);
        }

        let tokens: Vec<&str> = raw.split(',').map(str::trim).collect();
        if tokens.len() != COMMAND_CHANNELS {
            return Err(CommandParseError::WrongCount {
                found: tokens.len(),
            });
        }

        let mut values = [0.0; COMMAND_CHANNELS];
        for (slot, token) in values.iter_mut().zip(&tokens) {
            let value: f64 = token.parse().map_err(|_| CommandParseError::NotANumber {
                token: (*token).to_string(),
            })?;
            // NaN or infinity would poison the retained model state forever
            if !value.is_finite() {
                return Err(CommandParseError::NonFinite {
                    token: (*token).to_string(),
                });
            }
            *slot = value;
        }

        Ok(Self(values))
    }
}

// =============================================================================
// VEHICLE STATE
// =============================================================================

/// Physical state published every tick: `[p, q, r, phi, theta, psi, u, v, w]`.
///
/// Body rates and `u` come from the channel models, the Euler angles from the
/// attitude integrator. `v` and `w` have no driving channel and stay at their
/// initial value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    /// Roll rate (rad/s)
    pub p: f64,
    /// Pitch rate (rad/s)
    pub q: f64,
    /// Yaw rate (rad/s)
    pub r: f64,
    /// Roll angle (rad)
    pub phi: f64,
    /// Pitch angle (rad)
    pub theta: f64,
    /// Yaw angle (rad)
    pub psi: f64,
    /// Forward body velocity
    pub u: f64,
    /// Lateral body velocity
    pub v: f64,
    /// Vertical body velocity
    pub w: f64,
}

impl VehicleState {
    /// State vector in its fixed wire order.
    #[must_use]
    pub fn to_array(&self) -> [f64; STATE_ELEMENTS] {
        [
            self.p, self.q, self.r, self.phi, self.theta, self.psi, self.u, self.v, self.w,
        ]
    }

    pub fn from_array(arr: &[f64; STATE_ELEMENTS]) -> Self {
        Self {
            p: arr[0],
            q: arr[1],
            r: arr[2],
            phi: arr[3],
            theta: arr[4],
            psi: arr[5],
            u: arr[6],
            v: arr[7],
            w: arr[8],
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// One configured vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vehicle_id: VehicleId,
    /// Path of the physical command channel, read line by line. Only the
    /// command source interprets it; baud rate and framing belong to the device.
    pub link: String,
    pub group_id: GroupId,
}

/// Fleet configuration as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub vehicles: Vec<VehicleRecord>,
}

impl FleetConfig {
    /// Eight vehicles on two groups of four, one serial link each.
    ///
    /// Links are Linux tty paths opened as plain line streams. Line settings
    /// (9600 baud, 8N1) are configured on the device outside the simulator,
    /// e.g. with `stty -F /dev/ttyUSB0 9600 raw`.
    pub fn default_fleet() -> Self {
        let vehicles = (0..8)
            .map(|i| VehicleRecord {
                vehicle_id: VehicleId(i),
                link: format!("/dev/ttyUSB{i}"),
                group_id: GroupId(i / 4),
            })
            .collect();
        Self { vehicles }
    }

    /// Validate the configuration and build its group partition.
    pub fn assignment(&self) -> Result<GroupAssignment> {
        GroupAssignment::from_records(&self.vehicles)
    }
}

// =============================================================================
// GROUP ASSIGNMENT
// =============================================================================

/// Partition of vehicles into groups.
///
/// Every vehicle belongs to exactly one group. Within a group, vehicles keep
/// their configuration order, which fixes their slot index for the lifetime
/// of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    groups: BTreeMap<GroupId, Vec<VehicleRecord>>,
}

impl GroupAssignment {
    pub fn from_records(records: &[VehicleRecord]) -> Result<Self> {
        if records.is_empty() {
            return Err(DomainError::EmptyFleet);
        }

        let mut seen_ids = HashSet::new();
        let mut seen_links = HashSet::new();
        let mut groups: BTreeMap<GroupId, Vec<VehicleRecord>> = BTreeMap::new();

        for record in records {
            if !seen_ids.insert(record.vehicle_id) {
                return Err(DomainError::DuplicateVehicle(record.vehicle_id));
            }
            if !seen_links.insert(record.link.as_str()) {
                return Err(DomainError::DuplicateLink {
                    link: record.link.clone(),
                    vehicle_id: record.vehicle_id,
                });
            }
            groups.entry(record.group_id).or_default().push(record.clone());
        }

        Ok(Self { groups })
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Groups in ascending id order.
    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &[VehicleRecord])> {
        self.groups.iter().map(|(id, v)| (*id, v.as_slice()))
    }

    /// Vehicles of one group, in slot order.
    pub fn members(&self, group_id: GroupId) -> Option<&[VehicleRecord]> {
        self.groups.get(&group_id).map(Vec::as_slice)
    }

    pub fn group_of(&self, vehicle_id: VehicleId) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, members)| members.iter().any(|r| r.vehicle_id == vehicle_id))
            .map(|(id, _)| *id)
    }

    /// Every assigned vehicle id, group by group.
    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.groups.values().flatten().map(|r| r.vehicle_id)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Fleet configuration contains no vehicles")]
    EmptyFleet,

    #[error("Vehicle {0} is configured more than once")]
    DuplicateVehicle(VehicleId),

    #[error("Link '{link}' of {vehicle_id} is already used by another vehicle")]
    DuplicateLink { link: String, vehicle_id: VehicleId },
}

pub type Result<T> = std::result::Result<T, DomainError>;
