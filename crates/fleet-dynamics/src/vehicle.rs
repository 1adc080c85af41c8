//! Per-vehicle runtime: four channel simulators feeding the attitude integrator.

use crate::attitude;
use crate::channel::{Channel, ChannelSimulator};
use crate::error::Result;
use fleet_domain::{CommandVector, VehicleId, VehicleState};
use std::time::Duration;
use tracing::warn;

/// Full simulation state of one vehicle.
///
/// Ticks are strictly sequential and only ever read this vehicle's own data.
#[derive(Debug, Clone)]
pub struct VehicleRuntime {
    id: VehicleId,
    dt: f64,
    channels: [ChannelSimulator; 4],
    state: VehicleState,
    ticks: u64,
    last_tick_at: Option<Duration>,
    pitch_clamped: bool,
    pitch_clamp_count: u64,
}

impl VehicleRuntime {
    /// Build all four channel models at step period `dt`.
    pub fn new(id: VehicleId, dt: f64) -> Result<Self> {
        let channels = [
            ChannelSimulator::new(Channel::RollRate, dt)?,
            ChannelSimulator::new(Channel::PitchRate, dt)?,
            ChannelSimulator::new(Channel::YawRate, dt)?,
            ChannelSimulator::new(Channel::Velocity, dt)?,
        ];

        Ok(Self {
            id,
            dt,
            channels,
            state: VehicleState::default(),
            ticks: 0,
            last_tick_at: None,
            pitch_clamped: false,
            pitch_clamp_count: 0,
        })
    }

    /// Run one simulation step and return the new state.
    ///
    /// Channel outputs land in `p, q, r, u`; the attitude is then integrated
    /// from the fresh rates and the previous `phi, theta`. `v` and `w` are not
    /// driven by any channel and keep their initial value.
    pub fn tick(&mut self, command: CommandVector) -> VehicleState {
        let mut outputs = [0.0; 4];
        for (output, sim) in outputs.iter_mut().zip(self.channels.iter_mut()) {
            *output = sim.step(command.0[sim.channel().command_index()]);
        }

        self.state.p = outputs[Channel::RollRate.command_index()];
        self.state.q = outputs[Channel::PitchRate.command_index()];
        self.state.r = outputs[Channel::YawRate.command_index()];
        self.state.u = outputs[Channel::Velocity.command_index()];

        let step = attitude::integrate(
            self.state.phi,
            self.state.theta,
            self.state.p,
            self.state.q,
            self.state.r,
            self.dt,
        );
        self.state.phi = step.phi;
        self.state.theta = step.theta;
        self.state.psi += step.psi_increment;

        if step.clamped {
            self.pitch_clamp_count += 1;
            if !self.pitch_clamped {
                warn!(
                    vehicle_id = self.id.0,
                    theta = self.state.theta,
                    "Pitch reached the kinematic singularity limit, clamping"
                );
            }
        }
        self.pitch_clamped = step.clamped;

        self.ticks += 1;
        self.state
    }

    /// Record when the latest tick completed, read after the step has run.
    pub fn mark_completed(&mut self, at: Duration) {
        self.last_tick_at = Some(at);
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_tick_at(&self) -> Option<Duration> {
        self.last_tick_at
    }

    pub fn step_period(&self) -> f64 {
        self.dt
    }

    /// Number of ticks on which pitch was held at the singularity limit.
    pub fn pitch_clamp_count(&self) -> u64 {
        self.pitch_clamp_count
    }

    pub fn channel(&self, channel: Channel) -> &ChannelSimulator {
        &self.channels[channel.command_index()]
    }
}
