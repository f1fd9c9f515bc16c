//! Drone Status State Machine
//!
//! Defines which status changes an operator may request for a drone.
//! `Flying` is never entered through this table: only the scheduler puts a
//! drone in flight, and it bypasses validation to do so.

use thiserror::Error;

/// Administrative status of a drone in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DroneStatus {
    Available,
    Charging,
    Flying,
    Emergency,
    Inactive,
    ManualControl,
    Retired,
}

impl DroneStatus {
    pub const ALL: [DroneStatus; 7] = [
        DroneStatus::Available,
        DroneStatus::Charging,
        DroneStatus::Flying,
        DroneStatus::Emergency,
        DroneStatus::Inactive,
        DroneStatus::ManualControl,
        DroneStatus::Retired,
    ];
}

/// Rejected status change
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("cannot transition drone status from {from:?} to {to:?}")]
    InvalidTransition { from: DroneStatus, to: DroneStatus },
}

/// Check if an operator may move a drone from one status to another
pub fn transition_allowed(from: DroneStatus, to: DroneStatus) -> bool {
    use DroneStatus::*;

    match (from, to) {
        // Same state is always valid
        (a, b) if a == b => true,

        // Flight and emergency are owned by the scheduler
        (_, Flying) | (_, Emergency) => false,
        (Flying, _) => false,

        // Ground states can move freely between each other
        (Available | Charging | Emergency | Inactive | ManualControl | Retired, _) => true,
    }
}

/// Validate a status change, returning the target on success
pub fn check_transition(from: DroneStatus, to: DroneStatus) -> Result<DroneStatus, StatusError> {
    if transition_allowed(from, to) {
        Ok(to)
    } else {
        Err(StatusError::InvalidTransition { from, to })
    }
}
