//! Runtime error taxonomy

use skyfleet_shared::StatusError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error("scheduler is not started")]
    NotStarted,

    #[error("scheduler is already started")]
    AlreadyStarted,

    #[error(transparent)]
    InvalidTransition(#[from] StatusError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("drone session is already initialized")]
    AlreadyInitialized,

    #[error("route must contain at least one checkpoint")]
    InvalidRoute,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("{entity} {id} was modified concurrently")]
    VersionConflict { entity: &'static str, id: u64 },

    #[error("no driver for drone type {0}")]
    UnsupportedDroneType(String),

    #[error("drone returned {got} when {expected} was requested")]
    UnexpectedProperty {
        expected: &'static str,
        got: &'static str,
    },

    #[error("drone has not reported {0} yet")]
    PropertyUnavailable(&'static str),

    #[error("cannot delete drone {0} while it is flying")]
    DroneFlying(u64),
}

impl FleetError {
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T, E = FleetError> = std::result::Result<T, E>;
