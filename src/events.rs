//! Scheduler event bus
//!
//! Subscribers register per event kind. The bus lives inside the scheduler
//! task, so publishing needs no lock. A subscriber whose receiver was dropped
//! is forgotten on the next publish of a kind it listened to.

use skyfleet_shared::{AssignmentId, DroneId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Events published by the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    AssignmentStarted {
        assignment_id: AssignmentId,
        drone_id: DroneId,
    },
    AssignmentCompleted {
        assignment_id: AssignmentId,
        drone_id: DroneId,
    },
    AssignmentCanceled {
        assignment_id: AssignmentId,
    },
    DroneAdded(DroneId),
    DroneRemoved(DroneId),
    DroneBatteryLow {
        drone_id: DroneId,
        percentage: u8,
    },
    DroneEmergency(DroneId),
    SchedulerStopped,
    /// Reply correlated to a `SchedulerHandle::request`
    Reply {
        request_id: u64,
    },
}

/// Event classifier used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerEventKind {
    AssignmentStarted,
    AssignmentCompleted,
    AssignmentCanceled,
    DroneAdded,
    DroneRemoved,
    DroneBatteryLow,
    DroneEmergency,
    SchedulerStopped,
    Reply,
}

impl SchedulerEvent {
    pub fn kind(&self) -> SchedulerEventKind {
        match self {
            Self::AssignmentStarted { .. } => SchedulerEventKind::AssignmentStarted,
            Self::AssignmentCompleted { .. } => SchedulerEventKind::AssignmentCompleted,
            Self::AssignmentCanceled { .. } => SchedulerEventKind::AssignmentCanceled,
            Self::DroneAdded(_) => SchedulerEventKind::DroneAdded,
            Self::DroneRemoved(_) => SchedulerEventKind::DroneRemoved,
            Self::DroneBatteryLow { .. } => SchedulerEventKind::DroneBatteryLow,
            Self::DroneEmergency(_) => SchedulerEventKind::DroneEmergency,
            Self::SchedulerStopped => SchedulerEventKind::SchedulerStopped,
            Self::Reply { .. } => SchedulerEventKind::Reply,
        }
    }
}

impl SchedulerEventKind {
    pub const ALL: [SchedulerEventKind; 9] = [
        SchedulerEventKind::AssignmentStarted,
        SchedulerEventKind::AssignmentCompleted,
        SchedulerEventKind::AssignmentCanceled,
        SchedulerEventKind::DroneAdded,
        SchedulerEventKind::DroneRemoved,
        SchedulerEventKind::DroneBatteryLow,
        SchedulerEventKind::DroneEmergency,
        SchedulerEventKind::SchedulerStopped,
        SchedulerEventKind::Reply,
    ];
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of a subscription. Clones share the same identity.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl Subscriber {
    pub fn new(tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// New subscriber with the receiver it delivers to
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn deliver(&self, event: SchedulerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: HashMap<SchedulerEventKind, Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in one kind of event; subscribing twice is a no-op
    pub fn subscribe(&mut self, kind: SchedulerEventKind, subscriber: Subscriber) {
        let list = self.subscribers.entry(kind).or_default();
        if !list.contains(&subscriber) {
            list.push(subscriber);
        }
    }

    pub fn unsubscribe(&mut self, kind: SchedulerEventKind, subscriber: &Subscriber) {
        if let Some(list) = self.subscribers.get_mut(&kind) {
            list.retain(|s| s != subscriber);
        }
    }

    /// Deliver an event to every subscriber of its kind
    pub fn publish(&mut self, event: SchedulerEvent) {
        let kind = event.kind();
        let Some(list) = self.subscribers.get_mut(&kind) else {
            return;
        };
        list.retain(|s| {
            let alive = s.deliver(event.clone());
            if !alive {
                debug!("Dropping closed subscriber {} for {:?}", s.id, kind);
            }
            alive
        });
    }

    pub fn subscriber_count(&self, kind: SchedulerEventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}
