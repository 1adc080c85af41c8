//! # Fleet Dynamics
//!
//! Per-vehicle discrete-time dynamics engine.
//!
//! ## Pipeline
//!
//! ```text
//! CommandVector ──► ChannelSimulator ×4 ──► p, q, r, u
//!                                            │
//!                                            ▼
//!                                   attitude::integrate ──► phi, theta, psi
//! ```
//!
//! Each channel is a continuous transfer function discretized once with an
//! exact zero-order hold at the fixed step period.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod attitude;
pub mod channel;
pub mod discrete;
pub mod error;
pub mod transfer;
pub mod vehicle;

pub use attitude::{AttitudeStep, PITCH_LIMIT};
pub use channel::{Channel, ChannelSimulator};
pub use discrete::DiscreteStateSpace;
pub use error::{DynamicsError, Result, TransferFunctionError};
pub use transfer::TransferFunction;
pub use vehicle::VehicleRuntime;
