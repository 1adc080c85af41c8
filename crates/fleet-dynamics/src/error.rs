//! Dynamics error types

use crate::channel::Channel;
use thiserror::Error;

/// Reasons a transfer function cannot be realized as a causal discrete model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransferFunctionError {
    #[error("denominator is empty or all zero")]
    EmptyDenominator,

    #[error("denominator has degree 0, the channel has no dynamics")]
    StaticGain,

    #[error("numerator degree {numerator} is not below denominator degree {denominator}")]
    NonCausal { numerator: usize, denominator: usize },

    #[error("coefficient {0} is not finite")]
    NonFinite(f64),
}

/// Dynamics engine errors
#[derive(Debug, Error)]
pub enum DynamicsError {
    #[error("Invalid {channel} model: {source}")]
    InvalidModel {
        channel: Channel,
        #[source]
        source: TransferFunctionError,
    },

    #[error("Invalid transfer function: {0}")]
    InvalidTransferFunction(#[from] TransferFunctionError),

    #[error("Step period must be positive and finite, got {0}")]
    InvalidStepPeriod(f64),
}

pub type Result<T> = std::result::Result<T, DynamicsError>;
