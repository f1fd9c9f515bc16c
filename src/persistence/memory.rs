//! In-process repository

use super::Repository;
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use skyfleet_shared::{Assignment, AssignmentId, Drone, DroneId, DroneStatus};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    drones: BTreeMap<DroneId, Drone>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    next_drone_id: DroneId,
    next_assignment_id: AssignmentId,
}

/// Repository backed by ordered maps; ids are handed out in insertion order
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(entity: &'static str, id: u64, stored: u64, given: u64) -> Result<()> {
    if stored != given {
        return Err(FleetError::VersionConflict { entity, id });
    }
    Ok(())
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn drone(&self, id: DroneId) -> Result<Drone> {
        self.tables
            .read()
            .await
            .drones
            .get(&id)
            .cloned()
            .ok_or(FleetError::NotFound { entity: "drone", id })
    }

    async fn insert_drone(&self, mut drone: Drone) -> Result<Drone> {
        let mut tables = self.tables.write().await;
        tables.next_drone_id += 1;
        drone.id = tables.next_drone_id;
        drone.version = 1;
        tables.drones.insert(drone.id, drone.clone());
        Ok(drone)
    }

    async fn save_drone(&self, drone: &Drone) -> Result<Drone> {
        let mut tables = self.tables.write().await;
        let stored = tables.drones.get_mut(&drone.id).ok_or(FleetError::NotFound {
            entity: "drone",
            id: drone.id,
        })?;
        check_version("drone", drone.id, stored.version, drone.version)?;
        *stored = Drone {
            version: drone.version + 1,
            ..drone.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_drone(&self, id: DroneId) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.drones.get(&id) {
            None => Err(FleetError::NotFound { entity: "drone", id }),
            Some(d) if d.status == DroneStatus::Flying => Err(FleetError::DroneFlying(id)),
            Some(_) => {
                tables.drones.remove(&id);
                Ok(())
            }
        }
    }

    async fn assignment(&self, id: AssignmentId) -> Result<Assignment> {
        self.tables
            .read()
            .await
            .assignments
            .get(&id)
            .cloned()
            .ok_or(FleetError::NotFound {
                entity: "assignment",
                id,
            })
    }

    async fn insert_assignment(&self, mut assignment: Assignment) -> Result<Assignment> {
        if assignment.route.is_empty() {
            return Err(FleetError::InvalidRoute);
        }
        let mut tables = self.tables.write().await;
        tables.next_assignment_id += 1;
        assignment.id = tables.next_assignment_id;
        assignment.version = 1;
        tables.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn save_assignment(&self, assignment: &Assignment) -> Result<Assignment> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .assignments
            .get_mut(&assignment.id)
            .ok_or(FleetError::NotFound {
                entity: "assignment",
                id: assignment.id,
            })?;
        check_version("assignment", assignment.id, stored.version, assignment.version)?;
        *stored = Assignment {
            version: assignment.version + 1,
            ..assignment.clone()
        };
        Ok(stored.clone())
    }

    async fn pending_assignments(&self) -> Result<Vec<Assignment>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<Assignment> = tables
            .assignments
            .values()
            .filter(|a| a.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(pending)
    }
}
