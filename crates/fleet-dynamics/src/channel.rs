//! The four command channels and their per-vehicle simulators.

use crate::discrete::DiscreteStateSpace;
use crate::error::{DynamicsError, Result};
use crate::transfer::TransferFunction;
use crate::TransferFunctionError;
use std::fmt;

/// Command channel, in command-vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    RollRate,
    PitchRate,
    YawRate,
    Velocity,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Self::RollRate,
        Self::PitchRate,
        Self::YawRate,
        Self::Velocity,
    ];

    /// Index of this channel in a `CommandVector`.
    pub fn command_index(&self) -> usize {
        match self {
            Self::RollRate => 0,
            Self::PitchRate => 1,
            Self::YawRate => 2,
            Self::Velocity => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RollRate => "roll-rate",
            Self::PitchRate => "pitch-rate",
            Self::YawRate => "yaw-rate",
            Self::Velocity => "velocity",
        }
    }

    /// Identified continuous-time model of this channel.
    pub fn transfer_function(&self) -> std::result::Result<TransferFunction, TransferFunctionError> {
        match self {
            Self::RollRate => TransferFunction::new(
                [10.16, 14.0, 104.4, -0.06075],
                [1.0, 12.85, 30.84, 200.6, 2.071],
            ),
            Self::PitchRate => TransferFunction::new(
                [-4.922, -29.87, 7.714, 0.2748],
                [1.0, 14.6, 226.8, 4.479, 69.48],
            ),
            Self::YawRate => TransferFunction::new(
                [-2.94, 6.54, 12.97, 34.83],
                [1.0, 4.923, 29.51, 41.25, 93.99],
            ),
            Self::Velocity => TransferFunction::new(
                [0.006708, 0.01154, 0.0166],
                [1.0, 3.289, 3.91, 0.4614],
            ),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One channel's discrete model plus the previous input/output samples.
///
/// The previous input is required because each step spans the interval
/// between the last command and the new one.
#[derive(Debug, Clone)]
pub struct ChannelSimulator {
    channel: Channel,
    model: DiscreteStateSpace,
    prev_input: f64,
    prev_output: f64,
}

impl ChannelSimulator {
    /// Discretize the channel's model at `dt`.
    pub fn new(channel: Channel, dt: f64) -> Result<Self> {
        let tf = channel
            .transfer_function()
            .map_err(|source| DynamicsError::InvalidModel { channel, source })?;

        Ok(Self::with_model(channel, DiscreteStateSpace::discretize(&tf, dt)?))
    }

    /// Wrap an already discretized model.
    pub fn with_model(channel: Channel, model: DiscreteStateSpace) -> Self {
        Self {
            channel,
            model,
            prev_input: 0.0,
            prev_output: 0.0,
        }
    }

    /// Advance one tick with the new command sample.
    pub fn step(&mut self, input: f64) -> f64 {
        let output = self.model.step(self.prev_input, input);
        self.prev_input = input;
        self.prev_output = output;
        output
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn model(&self) -> &DiscreteStateSpace {
        &self.model
    }

    pub fn prev_input(&self) -> f64 {
        self.prev_input
    }

    pub fn prev_output(&self) -> f64 {
        self.prev_output
    }
}
