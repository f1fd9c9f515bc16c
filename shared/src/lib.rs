//! SkyFleet Shared Protocol Types
//!
//! This crate provides the domain records, the drone status transition table
//! and the wire codecs used between the fleet runtime and drone hardware.

pub mod at_command;
pub mod codec;
pub mod geo;
pub mod handlers;
pub mod model;
pub mod packet;
pub mod state_machine;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use geo::Location;
pub use model::{Assignment, AssignmentId, Checkpoint, Drone, DroneId, DroneType};
pub use state_machine::{DroneStatus, StatusError};
pub use telemetry::{DroneEvent, FlyingState, NavigationReason, NavigationState};

/// Safety parameters for the system
pub mod safety {
    /// Timeout for ordinary drone commands and property queries
    pub const COMMAND_TIMEOUT_MS: u64 = 2000;

    /// Timeout for one-time session initialization (covers the hardware handshake)
    pub const INIT_TIMEOUT_MS: u64 = 100_000;

    /// Radius around a no-fly point where a drone must stop moving
    pub const NO_FLY_RADIUS_M: f64 = 4.0;

    /// Radius around a requester that must be cleared before a grant
    pub const EVACUATION_RADIUS_M: f64 = 6.0;

    /// Battery percentage at which a pilot warns the scheduler
    pub const BATTERY_WARNING_PERCENT: u8 = 30;

    /// Critical battery percentage - the scheduler aborts the flight
    pub const BATTERY_CRITICAL_PERCENT: u8 = 20;
}
