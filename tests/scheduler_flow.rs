//! Scheduler driving simulated drones end to end

mod common;

use common::{brussels, fast_sim, north_of, sim_fleet, test_config, wait_event};
use skyfleet::config::SimConfig;
use skyfleet::events::{SchedulerEvent, SchedulerEventKind, Subscriber};
use skyfleet::persistence::{InMemoryRepository, Repository};
use skyfleet::sim::driver;
use skyfleet::{SchedulerHandle, SchedulerRegistry, StrategyKind};
use skyfleet_shared::{
    Assignment, AssignmentId, Checkpoint, Drone, DroneStatus, DroneType, Location,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    repo: Arc<InMemoryRepository>,
    registry: SchedulerRegistry,
    scheduler: SchedulerHandle,
    events: mpsc::UnboundedReceiver<SchedulerEvent>,
}

impl Harness {
    fn start(sim: SimConfig) -> Self {
        let config = test_config(sim);
        let repo = Arc::new(InMemoryRepository::new());
        let registry = SchedulerRegistry::new(repo.clone(), sim_fleet(&config), config);
        let scheduler = registry.start(StrategyKind::Priority).unwrap();
        let (subscriber, events) = Subscriber::channel();
        for kind in SchedulerEventKind::ALL {
            scheduler.subscribe(kind, subscriber.clone()).unwrap();
        }
        Self {
            repo,
            registry,
            scheduler,
            events,
        }
    }

    async fn drone_at(&self, at: Location) -> Drone {
        self.repo
            .insert_drone(Drone::new(
                "sim",
                DroneStatus::Available,
                DroneType::simulator(),
                driver::address(&at),
            ))
            .await
            .unwrap()
    }

    async fn assignment(&self, route: &[Location]) -> Assignment {
        let route = route
            .iter()
            .map(|l| Checkpoint::new(l.latitude, l.longitude, 3.0))
            .collect();
        self.repo
            .insert_assignment(Assignment::new(route, "test"))
            .await
            .unwrap()
    }

    /// Wait for a flight to be given back to the pending queue
    async fn until_pending(&self, assignment_id: AssignmentId) -> Assignment {
        tokio::time::timeout(common::WAIT, async {
            loop {
                let assignment = self.repo.assignment(assignment_id).await.unwrap();
                if assignment.is_pending() {
                    return assignment;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("assignment not pending again in time")
    }

    /// Wait until every message sent so far has been handled
    async fn sync(&mut self, request_id: u64) {
        self.scheduler.request(request_id).unwrap();
        wait_event(&mut self.events, |e| *e == SchedulerEvent::Reply { request_id }).await;
    }
}

/// Simulated drones that take a long time to get anywhere
fn slow_sim() -> SimConfig {
    SimConfig {
        speed: 0.5,
        ..fast_sim()
    }
}

#[tokio::test]
async fn test_assign_then_arrive() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let assignment = h.assignment(&[north_of(brussels(), 200.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    h.scheduler.schedule().unwrap();
    let started = wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;
    assert_eq!(
        started,
        SchedulerEvent::AssignmentStarted {
            assignment_id: assignment.id,
            drone_id: drone.id
        }
    );
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Flying);
    assert_eq!(
        h.repo.assignment(assignment.id).await.unwrap().assigned_drone,
        Some(drone.id)
    );

    h.scheduler.drone_arrived(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentCompleted { .. })
    })
    .await;

    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Available);
    let done = h.repo.assignment(assignment.id).await.unwrap();
    assert_eq!(done.assigned_drone, None);
    assert!(done.is_completed());
    assert!(h.repo.pending_assignments().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_simulated_flight_completes_route() {
    let mut h = Harness::start(fast_sim());
    let drone = h.drone_at(brussels()).await;
    let route = [north_of(brussels(), 15.0), north_of(brussels(), 30.0)];
    let assignment = h.assignment(&route).await;

    h.scheduler.add_drone(drone.id).unwrap();
    let completed = wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentCompleted { .. })
    })
    .await;
    assert_eq!(
        completed,
        SchedulerEvent::AssignmentCompleted {
            assignment_id: assignment.id,
            drone_id: drone.id
        }
    );
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Available);
    assert!(h.repo.assignment(assignment.id).await.unwrap().is_completed());
}

#[tokio::test]
async fn test_higher_priority_assignment_is_served_first() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let low = h.assignment(&[north_of(brussels(), 100.0)]).await;
    let high = h
        .repo
        .insert_assignment(
            Assignment::new(vec![Checkpoint::new(50.86, 4.35, 3.0)], "test").with_priority(5),
        )
        .await
        .unwrap();

    h.scheduler.add_drone(drone.id).unwrap();
    let started = wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;
    assert_eq!(
        started,
        SchedulerEvent::AssignmentStarted {
            assignment_id: high.id,
            drone_id: drone.id
        }
    );
    assert!(h.repo.assignment(low.id).await.unwrap().is_pending());
}

#[tokio::test]
async fn test_cancel_flying_assignment() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let assignment = h.assignment(&[north_of(brussels(), 200.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;

    h.scheduler.cancel(assignment.id).unwrap();
    let canceled = wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentCanceled { .. })
    })
    .await;
    assert_eq!(
        canceled,
        SchedulerEvent::AssignmentCanceled {
            assignment_id: assignment.id
        }
    );

    let a = h.repo.assignment(assignment.id).await.unwrap();
    assert!(a.canceled);
    assert_eq!(a.assigned_drone, None);
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Available);
}

#[tokio::test]
async fn test_cancel_pending_assignment() {
    let mut h = Harness::start(fast_sim());
    let assignment = h.assignment(&[brussels()]).await;

    h.scheduler.cancel(assignment.id).unwrap();
    wait_event(&mut h.events, |e| {
        *e == SchedulerEvent::AssignmentCanceled {
            assignment_id: assignment.id,
        }
    })
    .await;
    assert!(!h.repo.assignment(assignment.id).await.unwrap().is_pending());
}

#[tokio::test]
async fn test_emergency_on_idle_drone() {
    let mut h = Harness::start(fast_sim());
    let drone = h.drone_at(brussels()).await;

    h.scheduler.emergency(drone.id).unwrap();
    wait_event(&mut h.events, |e| *e == SchedulerEvent::DroneEmergency(drone.id)).await;
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Emergency);
}

#[tokio::test]
async fn test_critical_battery_sends_idle_drone_to_charge() {
    let mut h = Harness::start(fast_sim());
    let drone = h.drone_at(brussels()).await;

    // Above the critical level the report is only logged
    h.scheduler.battery_report(drone.id, None, 25).unwrap();
    h.sync(1).await;
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Available);

    h.scheduler.battery_report(drone.id, None, 15).unwrap();
    wait_event(&mut h.events, |e| {
        *e == SchedulerEvent::DroneBatteryLow {
            drone_id: drone.id,
            percentage: 15,
        }
    })
    .await;
    h.sync(2).await;
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Charging);
}

#[tokio::test]
async fn test_drone_removed_after_its_flight() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    h.assignment(&[north_of(brussels(), 200.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;

    h.scheduler.remove_drone(drone.id).unwrap();
    h.sync(1).await;
    h.scheduler.drone_arrived(drone.id).unwrap();
    wait_event(&mut h.events, |e| *e == SchedulerEvent::DroneRemoved(drone.id)).await;

    // Out of the pool: a new assignment stays pending
    let next = h.assignment(&[brussels()]).await;
    h.scheduler.schedule().unwrap();
    h.sync(2).await;
    assert!(h.repo.assignment(next.id).await.unwrap().is_pending());
}

#[tokio::test]
async fn test_stop_lands_flights_and_returns_them_to_pending() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let assignment = h.assignment(&[north_of(brussels(), 200.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;

    let task = h.registry.stop().unwrap();
    tokio::time::timeout(common::WAIT, task).await.unwrap().unwrap();
    wait_event(&mut h.events, |e| *e == SchedulerEvent::SchedulerStopped).await;

    assert!(h.repo.assignment(assignment.id).await.unwrap().is_pending());
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Available);
    assert!(h.registry.scheduler().is_err());
}

#[tokio::test]
async fn test_arrival_mid_route_hands_drone_to_next_assignment() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let far = north_of(brussels(), 200.0);
    let first = h
        .repo
        .insert_assignment(
            Assignment::new(vec![Checkpoint::new(far.latitude, far.longitude, 3.0)], "test")
                .with_priority(5),
        )
        .await
        .unwrap();
    let next = h.assignment(&[north_of(brussels(), 100.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        *e == SchedulerEvent::AssignmentStarted {
            assignment_id: first.id,
            drone_id: drone.id,
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    h.scheduler.drone_arrived(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        *e == SchedulerEvent::AssignmentCompleted {
            assignment_id: first.id,
            drone_id: drone.id,
        }
    })
    .await;
    wait_event(&mut h.events, |e| {
        *e == SchedulerEvent::AssignmentStarted {
            assignment_id: next.id,
            drone_id: drone.id,
        }
    })
    .await;

    // The first pilot is gone: nothing ends or restarts the second flight
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.scheduler.request(1).unwrap();
    let mut churn = Vec::new();
    loop {
        let event = wait_event(&mut h.events, |_| true).await;
        match event {
            SchedulerEvent::Reply { request_id: 1 } => break,
            SchedulerEvent::AssignmentStarted { .. }
            | SchedulerEvent::AssignmentCompleted { .. }
            | SchedulerEvent::AssignmentCanceled { .. } => churn.push(event),
            _ => {}
        }
    }
    assert!(churn.is_empty(), "unexpected flight changes: {:?}", churn);

    assert!(h.repo.assignment(first.id).await.unwrap().is_completed());
    assert_eq!(
        h.repo.assignment(next.id).await.unwrap().assigned_drone,
        Some(drone.id)
    );
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Flying);
}

#[tokio::test]
async fn test_emergency_in_flight_returns_assignment_to_pending() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let assignment = h.assignment(&[north_of(brussels(), 200.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;

    h.scheduler.emergency(drone.id).unwrap();
    wait_event(&mut h.events, |e| *e == SchedulerEvent::DroneEmergency(drone.id)).await;
    let pending = h.until_pending(assignment.id).await;
    h.sync(1).await;

    assert_eq!(pending.assigned_drone, None);
    assert!(!pending.canceled);
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Emergency);
}

#[tokio::test]
async fn test_critical_battery_in_flight_lands_and_charges() {
    let mut h = Harness::start(slow_sim());
    let drone = h.drone_at(brussels()).await;
    let assignment = h.assignment(&[north_of(brussels(), 200.0)]).await;

    h.scheduler.add_drone(drone.id).unwrap();
    wait_event(&mut h.events, |e| {
        matches!(e, SchedulerEvent::AssignmentStarted { .. })
    })
    .await;

    h.scheduler.battery_report(drone.id, None, 12).unwrap();
    wait_event(&mut h.events, |e| {
        *e == SchedulerEvent::DroneBatteryLow {
            drone_id: drone.id,
            percentage: 12,
        }
    })
    .await;
    let pending = h.until_pending(assignment.id).await;
    h.sync(1).await;

    assert_eq!(pending.assigned_drone, None);
    assert_eq!(h.repo.drone(drone.id).await.unwrap().status, DroneStatus::Charging);
}
