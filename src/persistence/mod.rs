//! Persistence interface for fleet records
//!
//! The runtime never holds records across messages: it loads what it needs,
//! changes it and saves it back with the version it loaded. A stale version
//! is rejected with `FleetError::VersionConflict`.

mod memory;

pub use memory::InMemoryRepository;

use crate::error::Result;
use async_trait::async_trait;
use skyfleet_shared::{Assignment, AssignmentId, Drone, DroneId};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn drone(&self, id: DroneId) -> Result<Drone>;

    /// Store a new drone and return it with its id
    async fn insert_drone(&self, drone: Drone) -> Result<Drone>;

    /// Update a drone, returning it with its new version
    async fn save_drone(&self, drone: &Drone) -> Result<Drone>;

    /// Remove a drone; a flying drone is never deleted
    async fn delete_drone(&self, id: DroneId) -> Result<()>;

    async fn assignment(&self, id: AssignmentId) -> Result<Assignment>;

    async fn insert_assignment(&self, assignment: Assignment) -> Result<Assignment>;

    async fn save_assignment(&self, assignment: &Assignment) -> Result<Assignment>;

    /// Pending assignments by descending priority, then creation order
    async fn pending_assignments(&self) -> Result<Vec<Assignment>>;
}
