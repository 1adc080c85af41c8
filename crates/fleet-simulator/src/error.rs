//! Simulator error types

use fleet_domain::{DomainError, GroupId, VehicleId};
use fleet_dynamics::DynamicsError;
use std::path::PathBuf;
use thiserror::Error;

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Failed to read fleet configuration {path:?}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid fleet configuration {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Fleet configuration rejected: {0}")]
    Domain(#[from] DomainError),

    #[error("Failed to build dynamics for {vehicle_id}: {source}")]
    Construction {
        vehicle_id: VehicleId,
        source: DynamicsError,
    },

    #[error("Failed to start {group_id}: {source}")]
    GroupStart {
        group_id: GroupId,
        source: std::io::Error,
    },

    #[error("{0} terminated abnormally")]
    GroupPanicked(GroupId),

    #[error("Failed to join fleet groups: {0}")]
    Join(String),

    #[error("Snapshot sink error: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SimulatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Sink(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
