//! Client side of the scheduler task

use crate::error::{FleetError, Result};
use crate::events::{SchedulerEventKind, Subscriber};
use skyfleet_shared::{AssignmentId, DroneId, Location};
use tokio::sync::mpsc;
use tracing::error;

/// Messages handled by the scheduler task, in arrival order
#[derive(Debug)]
pub(crate) enum SchedulerMessage {
    AddDrone(DroneId),
    RemoveDrone(DroneId),
    Schedule,
    Cancel(AssignmentId),
    Subscribe(SchedulerEventKind, Subscriber),
    Unsubscribe(SchedulerEventKind, Subscriber),
    Request(u64),
    DroneArrived(DroneId),
    Battery {
        drone_id: DroneId,
        location: Option<Location>,
        percentage: u8,
    },
    Stop,
}

/// Fire-and-forget access to a running scheduler. Every call fails with
/// `NotStarted` once the scheduler task is gone.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    inbox: mpsc::UnboundedSender<SchedulerMessage>,
    emergencies: mpsc::UnboundedSender<DroneId>,
}

impl SchedulerHandle {
    pub(crate) fn new(
        inbox: mpsc::UnboundedSender<SchedulerMessage>,
        emergencies: mpsc::UnboundedSender<DroneId>,
    ) -> Self {
        Self { inbox, emergencies }
    }

    fn send(&self, message: SchedulerMessage) -> Result<()> {
        self.inbox.send(message).map_err(|_| FleetError::NotStarted)
    }

    pub fn is_running(&self) -> bool {
        !self.inbox.is_closed()
    }

    /// Make a drone available for scheduling
    pub fn add_drone(&self, drone_id: DroneId) -> Result<()> {
        self.send(SchedulerMessage::AddDrone(drone_id))
    }

    /// Take a drone out of the pool, after its current flight if it has one
    pub fn remove_drone(&self, drone_id: DroneId) -> Result<()> {
        self.send(SchedulerMessage::RemoveDrone(drone_id))
    }

    /// Run a scheduling pass now
    pub fn schedule(&self) -> Result<()> {
        self.send(SchedulerMessage::Schedule)
    }

    pub fn cancel(&self, assignment_id: AssignmentId) -> Result<()> {
        self.send(SchedulerMessage::Cancel(assignment_id))
    }

    pub fn subscribe(&self, kind: SchedulerEventKind, subscriber: Subscriber) -> Result<()> {
        self.send(SchedulerMessage::Subscribe(kind, subscriber))
    }

    pub fn unsubscribe(&self, kind: SchedulerEventKind, subscriber: Subscriber) -> Result<()> {
        self.send(SchedulerMessage::Unsubscribe(kind, subscriber))
    }

    /// Ask for a `Reply { request_id }` once everything sent before is handled
    pub fn request(&self, request_id: u64) -> Result<()> {
        self.send(SchedulerMessage::Request(request_id))
    }

    /// Report that a drone reached the end of its route
    pub fn drone_arrived(&self, drone_id: DroneId) -> Result<()> {
        self.send(SchedulerMessage::DroneArrived(drone_id))
    }

    pub fn battery_report(
        &self,
        drone_id: DroneId,
        location: Option<Location>,
        percentage: u8,
    ) -> Result<()> {
        self.send(SchedulerMessage::Battery {
            drone_id,
            location,
            percentage,
        })
    }

    /// Handled ahead of every other pending message
    pub fn emergency(&self, drone_id: DroneId) -> Result<()> {
        self.emergencies.send(drone_id).map_err(|_| {
            error!(
                "[SCHEDULER] emergency for drone {} not delivered: scheduler is not running",
                drone_id
            );
            FleetError::NotStarted
        })
    }

    pub(crate) fn stop(&self) -> Result<()> {
        self.send(SchedulerMessage::Stop)
    }
}
