//! Control tower: relays airspace requests between active pilots
//!
//! A request from one pilot goes to every other pilot. The requester gets its
//! grant once all of them granted, or left. Completions are broadcast so the
//! others drop the matching no-fly point.

use super::messages::{FlightControlMessage, LocationMessage, PilotMessage};
use skyfleet_shared::DroneId;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug)]
struct PendingRequest {
    request: LocationMessage,
    waiting_on: HashSet<DroneId>,
}

#[derive(Debug, Default)]
pub struct ControlTower {
    pilots: HashMap<DroneId, mpsc::UnboundedSender<PilotMessage>>,
    pending: HashMap<DroneId, PendingRequest>,
    /// Granted requests whose completion has not been reported yet
    granted: HashMap<DroneId, LocationMessage>,
}

impl ControlTower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pilot_count(&self) -> usize {
        self.pilots.len()
    }

    /// Start relaying for a pilot. It learns about airspace already in use.
    pub fn register(&mut self, drone_id: DroneId, inbox: mpsc::UnboundedSender<PilotMessage>) {
        let in_use = self
            .pending
            .values()
            .map(|p| p.request)
            .chain(self.granted.values().copied());
        for request in in_use {
            let _ = inbox.send(PilotMessage::FlightControl(FlightControlMessage::request(
                request.requester,
                request.location,
                request.kind,
            )));
        }
        self.pilots.insert(drone_id, inbox);
    }

    /// Forget a pilot. Its airspace is released and nobody waits on it anymore.
    pub fn remove(&mut self, drone_id: DroneId) {
        if self.pilots.remove(&drone_id).is_none() {
            return;
        }
        let held = self
            .pending
            .remove(&drone_id)
            .map(|p| p.request)
            .or_else(|| self.granted.remove(&drone_id));
        if let Some(request) = held {
            self.broadcast(drone_id, FlightControlMessage::completed(request));
        }

        let unblocked: Vec<DroneId> = self
            .pending
            .iter_mut()
            .filter_map(|(requester, p)| {
                p.waiting_on.remove(&drone_id);
                p.waiting_on.is_empty().then_some(*requester)
            })
            .collect();
        for requester in unblocked {
            self.grant(requester);
        }
    }

    pub fn handle(&mut self, from: DroneId, message: FlightControlMessage) {
        let m = *message.location_message();

        if message.is_request() {
            let others: HashSet<DroneId> =
                self.pilots.keys().copied().filter(|id| *id != from).collect();
            info!(
                "[TOWER] drone {} requests {:?}, asking {} pilots",
                from,
                m.kind,
                others.len()
            );
            self.pending.insert(
                from,
                PendingRequest {
                    request: m,
                    waiting_on: others,
                },
            );
            self.broadcast(from, message);
            if self.pending.get(&from).is_some_and(|p| p.waiting_on.is_empty()) {
                self.grant(from);
            }
        } else if message.is_grant() {
            let Some(pending) = self.pending.get_mut(&m.requester) else {
                debug!("[TOWER] stale grant from {} for {}", from, m.requester);
                return;
            };
            pending.waiting_on.remove(&from);
            if pending.waiting_on.is_empty() {
                self.grant(m.requester);
            }
        } else if message.is_completion() {
            self.granted.remove(&from);
            self.broadcast(from, message);
        }
    }

    fn grant(&mut self, requester: DroneId) {
        let Some(pending) = self.pending.remove(&requester) else {
            return;
        };
        info!("[TOWER] granting {:?} to drone {}", pending.request.kind, requester);
        self.granted.insert(requester, pending.request);
        if let Some(inbox) = self.pilots.get(&requester) {
            let _ = inbox.send(PilotMessage::FlightControl(FlightControlMessage::grant(
                pending.request,
            )));
        }
    }

    /// Send to every pilot but `from`
    fn broadcast(&self, from: DroneId, message: FlightControlMessage) {
        for (id, inbox) in &self.pilots {
            if *id != from {
                let _ = inbox.send(PilotMessage::FlightControl(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::messages::RequestType;
    use skyfleet_shared::Location;

    fn pilot(tower: &mut ControlTower, id: DroneId) -> mpsc::UnboundedReceiver<PilotMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        tower.register(id, tx);
        rx
    }

    fn take_off(id: DroneId) -> FlightControlMessage {
        FlightControlMessage::request(id, Location::new(50.85, 4.35, 0.0), RequestType::TakeOff)
    }

    fn granted(rx: &mut mpsc::UnboundedReceiver<PilotMessage>) -> bool {
        matches!(
            rx.try_recv(),
            Ok(PilotMessage::FlightControl(m)) if m.is_grant()
        )
    }

    #[test]
    fn test_lone_pilot_is_granted_at_once() {
        let mut tower = ControlTower::new();
        let mut a = pilot(&mut tower, 1);
        tower.handle(1, take_off(1));
        assert!(granted(&mut a));
    }

    #[test]
    fn test_grant_waits_for_every_other_pilot() {
        let mut tower = ControlTower::new();
        let mut a = pilot(&mut tower, 1);
        let mut b = pilot(&mut tower, 2);
        let mut c = pilot(&mut tower, 3);

        let request = take_off(1);
        tower.handle(1, request);
        assert_eq!(b.try_recv().unwrap(), PilotMessage::FlightControl(request));
        assert_eq!(c.try_recv().unwrap(), PilotMessage::FlightControl(request));

        let grant = FlightControlMessage::grant(*request.location_message());
        tower.handle(2, grant);
        assert!(a.try_recv().is_err());
        tower.handle(3, grant);
        assert!(granted(&mut a));

        // Completion reaches the others only
        let done = FlightControlMessage::completed(*request.location_message());
        tower.handle(1, done);
        assert_eq!(b.try_recv().unwrap(), PilotMessage::FlightControl(done));
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_leaving_pilot_counts_as_granted_and_frees_airspace() {
        let mut tower = ControlTower::new();
        let mut a = pilot(&mut tower, 1);
        let mut b = pilot(&mut tower, 2);

        // b is landing under a grant when a asks
        let landing =
            FlightControlMessage::request(2, Location::new(50.0, 4.0, 0.0), RequestType::Landing);
        tower.handle(2, landing);
        assert_eq!(a.try_recv().unwrap(), PilotMessage::FlightControl(landing));
        tower.handle(1, FlightControlMessage::grant(*landing.location_message()));
        assert!(granted(&mut b));

        tower.handle(1, take_off(1));
        let _ = b.try_recv();
        assert!(a.try_recv().is_err());

        tower.remove(2);
        // a hears b's landing is done, then gets its grant
        assert!(matches!(
            a.try_recv(),
            Ok(PilotMessage::FlightControl(FlightControlMessage::LandingCompleted(_)))
        ));
        assert!(granted(&mut a));
        assert_eq!(tower.pilot_count(), 1);
    }

    #[test]
    fn test_newcomer_learns_airspace_in_use() {
        let mut tower = ControlTower::new();
        let mut a = pilot(&mut tower, 1);
        tower.handle(1, take_off(1));
        assert!(granted(&mut a));

        let mut b = pilot(&mut tower, 2);
        assert!(matches!(
            b.try_recv(),
            Ok(PilotMessage::FlightControl(FlightControlMessage::RequestForTakeOff(_)))
        ));
    }
}
