//! Drone selection strategies

use crate::drone::Fleet;
use async_trait::async_trait;
use futures::future::join_all;
use skyfleet_shared::{Assignment, Drone, DroneId};
use std::cmp::Ordering;
use std::sync::Arc;

/// Picks the drone that flies an assignment
#[async_trait]
pub trait SchedulingStrategy: Send + Sync {
    /// `candidates` are available drones without a flight, never empty
    async fn select_drone(&self, assignment: &Assignment, candidates: &[Drone]) -> Option<DroneId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// First drone by ascending id
    #[default]
    Priority,
    /// Drone closest to the start of the route
    Nearest,
}

impl StrategyKind {
    pub fn build(self, fleet: Arc<Fleet>) -> Arc<dyn SchedulingStrategy> {
        match self {
            Self::Priority => Arc::new(PriorityStrategy),
            Self::Nearest => Arc::new(NearestDroneStrategy::new(fleet)),
        }
    }
}

#[derive(Debug, Default)]
pub struct PriorityStrategy;

#[async_trait]
impl SchedulingStrategy for PriorityStrategy {
    async fn select_drone(&self, _assignment: &Assignment, candidates: &[Drone]) -> Option<DroneId> {
        candidates.iter().map(|d| d.id).min()
    }
}

/// Asks each candidate's open session where it is. Drones without a session
/// or a position come last, in id order.
pub struct NearestDroneStrategy {
    fleet: Arc<Fleet>,
}

impl NearestDroneStrategy {
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self { fleet }
    }
}

fn closer(a: &(DroneId, Option<f64>), b: &(DroneId, Option<f64>)) -> Ordering {
    match (a.1, b.1) {
        (Some(x), Some(y)) => x.total_cmp(&y).then(a.0.cmp(&b.0)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.0.cmp(&b.0),
    }
}

#[async_trait]
impl SchedulingStrategy for NearestDroneStrategy {
    async fn select_drone(&self, assignment: &Assignment, candidates: &[Drone]) -> Option<DroneId> {
        let start = *assignment.start()?;
        let distances = join_all(candidates.iter().map(|drone| async move {
            let distance = match self.fleet.cached(drone.id) {
                Some(commander) => commander.location().await.ok().map(|l| l.distance(&start)),
                None => None,
            };
            (drone.id, distance)
        }))
        .await;
        distances.iter().min_by(|a, b| closer(a, b)).map(|(id, _)| *id)
    }
}
