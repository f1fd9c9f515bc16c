//! Fleet domain records
//!
//! These are owned by persistence. The runtime loads them, changes them and
//! saves them back with the `version` it loaded.

use crate::geo::Location;
use crate::state_machine::{check_transition, DroneStatus, StatusError};

pub type DroneId = u64;
pub type AssignmentId = u64;

/// Vendor and model of a drone, used to pick a driver
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DroneType {
    pub vendor: String,
    pub model: String,
}

impl DroneType {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            model: model.into(),
        }
    }

    /// Parrot Bebop speaking ARDrone3 over the network
    pub fn bebop() -> Self {
        Self::new("ARDrone3", "Bebop")
    }

    /// In-process simulated drone speaking ARDrone3
    pub fn simulator() -> Self {
        Self::new("ARDrone3", "Simulator")
    }
}

impl std::fmt::Display for DroneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.vendor, self.model)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drone {
    pub id: DroneId,
    pub name: String,
    pub status: DroneStatus,
    /// Network address of the drone (host:port)
    pub address: String,
    pub drone_type: DroneType,
    /// Optimistic concurrency version, bumped by every save
    pub version: u64,
}

impl Drone {
    /// Create an unsaved drone; the repository assigns the id
    pub fn new(
        name: impl Into<String>,
        status: DroneStatus,
        drone_type: DroneType,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            status,
            address: address.into(),
            drone_type,
            version: 0,
        }
    }

    /// Operator status change, validated against the transition table
    pub fn update_status(&mut self, status: DroneStatus) -> Result<(), StatusError> {
        self.status = check_transition(self.status, status)?;
        Ok(())
    }

    /// Unvalidated status change. Reserved for the scheduler, which is the
    /// only component allowed to move drones in and out of flight.
    pub fn override_status(&mut self, status: DroneStatus) {
        self.status = status;
    }
}

/// A waypoint on a route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub location: Location,
}

impl Checkpoint {
    pub const fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            location: Location::new(latitude, longitude, altitude),
        }
    }
}

/// A mission: an ordered route to be flown by one drone
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub route: Vec<Checkpoint>,
    /// Index of the next checkpoint to visit
    pub progress: usize,
    /// Higher priorities are served first
    pub priority: i32,
    pub creator: String,
    pub assigned_drone: Option<DroneId>,
    /// Set when a user canceled the assignment
    pub canceled: bool,
    pub version: u64,
}

impl Assignment {
    /// Create an unsaved assignment; the repository assigns the id
    pub fn new(route: Vec<Checkpoint>, creator: impl Into<String>) -> Self {
        Self {
            id: 0,
            route,
            progress: 0,
            priority: 0,
            creator: creator.into(),
            assigned_drone: None,
            canceled: false,
            version: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.progress >= self.route.len()
    }

    /// Waiting for a drone: not canceled, not assigned, not completed
    pub fn is_pending(&self) -> bool {
        !self.canceled && self.assigned_drone.is_none() && !self.is_completed()
    }

    /// First checkpoint of the route, if any
    pub fn start(&self) -> Option<&Location> {
        self.route.first().map(|c| &c.location)
    }
}
