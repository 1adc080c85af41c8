//! # Fleet Configuration
//!
//! JSON fleet description, falling back to the built-in eight-vehicle fleet.

use crate::error::{Result, SimulatorError};
use fleet_domain::FleetConfig;
use std::path::Path;
use tracing::info;

/// Load the fleet description at `path`, or the default fleet when `None`.
///
/// The result is validated, so a returned config always yields an assignment.
pub fn load_fleet_config(path: Option<&Path>) -> Result<FleetConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| SimulatorError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;
            let config: FleetConfig =
                serde_json::from_str(&raw).map_err(|source| SimulatorError::ConfigParse {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!(
                path = %path.display(),
                vehicles = config.vehicles.len(),
                "Fleet configuration loaded"
            );
            config
        }
        None => {
            info!("No fleet file given, using the default fleet");
            FleetConfig::default_fleet()
        }
    };

    config.assignment()?;
    Ok(config)
}
