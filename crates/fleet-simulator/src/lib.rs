//! # Fleet Simulator
//!
//! Real-time execution layer for the fleet flight dynamics engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────┐     ┌────────────────────────────┐
//! │ group-0 (thread + runtime) │     │ group-1 (thread + runtime) │
//! │  ┌────────┐   ┌────────┐   │     │  ┌────────┐   ┌────────┐   │
//! │  │ Pacer  │   │ Pacer  │   │ ... │  │ Pacer  │   │ Pacer  │   │
//! │  │vehicle0│   │vehicle1│   │     │  │vehicle4│   │vehicle5│   │
//! │  └───┬────┘   └───┬────┘   │     │  └───┬────┘   └───┬────┘   │
//! └──────┼────────────┼────────┘     └──────┼────────────┼────────┘
//!        ▼            ▼                     ▼            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           SharedStateTable (one watch slot / vehicle)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ snapshot()
//!                              ▼
//!                     Aggregator ──► SnapshotSink (log / UDP)
//! ```
//!
//! Each vehicle task reads its command source, ticks its
//! [`VehicleRuntime`](fleet_dynamics::VehicleRuntime), publishes the new
//! state into its own slot and sleeps off the rest of the step period.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod pacer;
pub mod table;

pub use aggregator::{Aggregator, AggregatorStats, LogSink, SnapshotSink, UdpSink};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use command::{
    CommandSource, CommandWarning, ConstantSourceFactory, LINK_SILENCE_TIMEOUT, LineCommandSource,
    LinkSourceFactory, ScriptedSource, SourceFactory, UnavailableSource,
};
pub use config::load_fleet_config;
pub use error::{Result, SimulatorError};
pub use executor::{FleetExecutor, FleetHandle, GroupReport, VehicleFailure};
pub use pacer::{Pace, Pacer, PacerReport, PacerState};
pub use table::{FleetSnapshot, PublishedState, SharedStateTable, StateSlot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
