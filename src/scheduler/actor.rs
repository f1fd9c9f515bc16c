//! The scheduler task
//!
//! Owns the drone pool, the active flights and the control tower. Pending
//! assignments are matched with available drones on every change that could
//! make a match possible. Emergencies arrive on their own channel and are
//! always handled before anything else. A flight is only forgotten once its
//! pilot reported that it ended, so a drone never flies for two pilots.

use super::handle::{SchedulerHandle, SchedulerMessage};
use super::strategy::SchedulingStrategy;
use crate::config::{FleetConfig, PilotConfig, SchedulerConfig};
use crate::drone::{DroneCommander, Fleet};
use crate::error::{FleetError, Result};
use crate::events::{EventBus, SchedulerEvent};
use crate::flight::{ControlTower, Pilot, PilotHandle, PilotReport};
use crate::persistence::Repository;
use skyfleet_shared::{Assignment, AssignmentId, Drone, DroneId, DroneStatus, Location};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Attempts of a load-change-save cycle before giving up on a version conflict
const SAVE_ATTEMPTS: u32 = 3;

/// Why a flight was told to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// Reported at its destination from outside
    Arrived,
    User,
    Battery,
    Emergency,
    Shutdown,
}

struct Flight {
    id: u64,
    assignment_id: AssignmentId,
    /// None while the drone session is being opened
    pilot: Option<PilotHandle>,
    stop: Option<StopReason>,
}

/// Outcome of opening a drone session off the scheduler task
struct Connected {
    flight_id: u64,
    drone_id: DroneId,
    assignment_id: AssignmentId,
    result: Result<DroneCommander>,
}

pub(crate) struct Scheduler {
    repo: Arc<dyn Repository>,
    fleet: Arc<Fleet>,
    strategy: Arc<dyn SchedulingStrategy>,
    config: SchedulerConfig,
    pilot_config: PilotConfig,
    bus: EventBus,
    tower: ControlTower,
    pool: BTreeSet<DroneId>,
    flights: HashMap<DroneId, Flight>,
    /// Drones to drop from the pool once their flight is over
    removals: HashSet<DroneId>,
    next_flight: u64,
    reporter: mpsc::UnboundedSender<PilotReport>,
    connector: mpsc::UnboundedSender<Connected>,
    stopping: bool,
}

struct Channels {
    inbox: mpsc::UnboundedReceiver<SchedulerMessage>,
    emergencies: mpsc::UnboundedReceiver<DroneId>,
    reports: mpsc::UnboundedReceiver<PilotReport>,
    connections: mpsc::UnboundedReceiver<Connected>,
}

impl Scheduler {
    pub(crate) fn spawn(
        repo: Arc<dyn Repository>,
        fleet: Arc<Fleet>,
        strategy: Arc<dyn SchedulingStrategy>,
        config: &FleetConfig,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (emergency_tx, emergencies) = mpsc::unbounded_channel();
        let (reporter, reports) = mpsc::unbounded_channel();
        let (connector, connections) = mpsc::unbounded_channel();

        let scheduler = Scheduler {
            repo,
            fleet,
            strategy,
            config: config.scheduler.clone(),
            pilot_config: config.pilot.clone(),
            bus: EventBus::new(),
            tower: ControlTower::new(),
            pool: BTreeSet::new(),
            flights: HashMap::new(),
            removals: HashSet::new(),
            next_flight: 0,
            reporter,
            connector,
            stopping: false,
        };
        let channels = Channels {
            inbox,
            emergencies,
            reports,
            connections,
        };
        let task = tokio::spawn(scheduler.run(channels));
        (SchedulerHandle::new(inbox_tx, emergency_tx), task)
    }

    async fn run(mut self, mut channels: Channels) {
        info!("[SCHEDULER] started");
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                Some(drone_id) = channels.emergencies.recv() => self.emergency(drone_id).await,

                Some(report) = channels.reports.recv() => self.handle_report(report).await,

                Some(connected) = channels.connections.recv() => self.connected(connected).await,

                // Nothing new is accepted while landing the fleet
                message = channels.inbox.recv(), if !self.stopping => match message {
                    Some(SchedulerMessage::Stop) | None => {
                        self.begin_stop();
                        deadline = Some(Instant::now() + self.config.stop_grace);
                    }
                    Some(message) => self.handle(message).await,
                },

                _ = grace_elapsed(deadline) => {
                    warn!(
                        "[SCHEDULER] {} flights still active after {:?}",
                        self.flights.len(),
                        self.config.stop_grace
                    );
                    break;
                }
            }

            if self.stopping && self.flights.is_empty() {
                break;
            }
        }

        // Whatever did not report in time goes back to pending
        let leftovers: Vec<(DroneId, AssignmentId)> = self
            .flights
            .drain()
            .map(|(drone_id, flight)| (drone_id, flight.assignment_id))
            .collect();
        for (drone_id, assignment_id) in leftovers {
            self.tower.remove(drone_id);
            self.unassign(drone_id, assignment_id, |_| {}).await;
        }

        self.bus.publish(SchedulerEvent::SchedulerStopped);
        info!("[SCHEDULER] stopped");
    }

    async fn handle(&mut self, message: SchedulerMessage) {
        match message {
            SchedulerMessage::AddDrone(drone_id) => self.add_drone(drone_id).await,
            SchedulerMessage::RemoveDrone(drone_id) => self.remove_drone(drone_id),
            SchedulerMessage::Schedule => self.schedule().await,
            SchedulerMessage::Cancel(assignment_id) => self.cancel(assignment_id).await,
            SchedulerMessage::Subscribe(kind, subscriber) => self.bus.subscribe(kind, subscriber),
            SchedulerMessage::Unsubscribe(kind, subscriber) => {
                self.bus.unsubscribe(kind, &subscriber)
            }
            SchedulerMessage::Request(request_id) => {
                self.bus.publish(SchedulerEvent::Reply { request_id })
            }
            SchedulerMessage::DroneArrived(drone_id) => self.drone_arrived(drone_id),
            SchedulerMessage::Battery {
                drone_id,
                location,
                percentage,
            } => self.drone_battery(drone_id, location, percentage).await,
            // Handled by the run loop
            SchedulerMessage::Stop => {}
        }
    }

    async fn handle_report(&mut self, report: PilotReport) {
        match report {
            PilotReport::Coordination { from, message } => self.tower.handle(from, message),
            PilotReport::FlightCompleted { drone_id, .. } => self.flight_ended(drone_id, true).await,
            PilotReport::FlightCanceled { drone_id } => self.flight_ended(drone_id, false).await,
            PilotReport::Battery {
                drone_id,
                location,
                percentage,
            } => self.drone_battery(drone_id, location, percentage).await,
        }
    }

    fn begin_stop(&mut self) {
        info!("[SCHEDULER] stopping, landing {} flights", self.flights.len());
        self.stopping = true;
        for flight in self.flights.values_mut() {
            flight.stop.get_or_insert(StopReason::Shutdown);
            if let Some(pilot) = &flight.pilot {
                pilot.stop();
            }
        }
    }

    async fn add_drone(&mut self, drone_id: DroneId) {
        if let Err(e) = self.repo.drone(drone_id).await {
            warn!("[SCHEDULER] cannot add drone {}: {}", drone_id, e);
            return;
        }
        self.removals.remove(&drone_id);
        if self.pool.insert(drone_id) {
            info!("[SCHEDULER] drone {} added", drone_id);
            self.bus.publish(SchedulerEvent::DroneAdded(drone_id));
        }
        self.schedule().await;
    }

    fn remove_drone(&mut self, drone_id: DroneId) {
        if self.flights.contains_key(&drone_id) {
            info!("[SCHEDULER] drone {} removed after its flight", drone_id);
            self.removals.insert(drone_id);
        } else if self.pool.remove(&drone_id) {
            info!("[SCHEDULER] drone {} removed", drone_id);
            self.bus.publish(SchedulerEvent::DroneRemoved(drone_id));
        }
    }

    fn honor_removal(&mut self, drone_id: DroneId) {
        if self.removals.remove(&drone_id) && self.pool.remove(&drone_id) {
            info!("[SCHEDULER] drone {} removed", drone_id);
            self.bus.publish(SchedulerEvent::DroneRemoved(drone_id));
        }
    }

    /// Match pending assignments with idle drones
    async fn schedule(&mut self) {
        if self.stopping {
            return;
        }
        let pending = match self.repo.pending_assignments().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("[SCHEDULER] cannot load pending assignments: {}", e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let mut candidates = Vec::new();
        for drone_id in &self.pool {
            if self.flights.contains_key(drone_id) {
                continue;
            }
            match self.repo.drone(*drone_id).await {
                Ok(drone)
                    if drone.status == DroneStatus::Available
                        && self.fleet.supports(&drone.drone_type) =>
                {
                    candidates.push(drone)
                }
                Ok(_) => {}
                Err(e) => warn!("[SCHEDULER] cannot load drone {}: {}", drone_id, e),
            }
        }

        for assignment in pending {
            if candidates.is_empty() {
                break;
            }
            let Some(drone_id) = self.strategy.select_drone(&assignment, &candidates).await else {
                continue;
            };
            let Some(i) = candidates.iter().position(|d| d.id == drone_id) else {
                warn!("[SCHEDULER] strategy picked unknown drone {}", drone_id);
                continue;
            };
            let drone = candidates.swap_remove(i);
            self.assign(drone, assignment).await;
        }
    }

    async fn assign(&mut self, drone: Drone, assignment: Assignment) {
        let drone_id = drone.id;
        let assignment_id = assignment.id;

        let drone = match self
            .update_drone(drone_id, |d| d.override_status(DroneStatus::Flying))
            .await
        {
            Ok(drone) => drone,
            Err(e) => {
                warn!("[SCHEDULER] cannot reserve drone {}: {}", drone_id, e);
                return;
            }
        };
        if let Err(e) = self
            .update_assignment(assignment_id, |a| a.assigned_drone = Some(drone_id))
            .await
        {
            warn!("[SCHEDULER] cannot assign {}: {}", assignment_id, e);
            self.release_drone(drone_id).await;
            return;
        }

        info!("[SCHEDULER] assignment {} goes to drone {}", assignment_id, drone_id);
        self.next_flight += 1;
        let flight_id = self.next_flight;
        self.flights.insert(
            drone_id,
            Flight {
                id: flight_id,
                assignment_id,
                pilot: None,
                stop: None,
            },
        );
        self.bus.publish(SchedulerEvent::AssignmentStarted {
            assignment_id,
            drone_id,
        });

        let fleet = self.fleet.clone();
        let connector = self.connector.clone();
        tokio::spawn(async move {
            let result = fleet.commander(&drone).await;
            let _ = connector.send(Connected {
                flight_id,
                drone_id,
                assignment_id,
                result,
            });
        });
    }

    async fn connected(&mut self, connected: Connected) {
        let Connected {
            flight_id,
            drone_id,
            assignment_id,
            result,
        } = connected;
        let stop = match self.flights.get(&drone_id) {
            Some(flight) if flight.id == flight_id => flight.stop,
            _ => {
                debug!("[SCHEDULER] late session for drone {}", drone_id);
                return;
            }
        };

        let commander = match result {
            Ok(commander) => commander,
            Err(e) => {
                error!("[SCHEDULER] cannot reach drone {}: {}", drone_id, e);
                self.fleet.forget(drone_id);
                self.flights.remove(&drone_id);
                // No new pass here, the same drone would be picked again
                self.unassign(drone_id, assignment_id, |_| {}).await;
                self.honor_removal(drone_id);
                return;
            }
        };

        if stop.is_some() {
            self.flights.remove(&drone_id);
            self.release(drone_id, assignment_id, stop).await;
            self.honor_removal(drone_id);
            self.schedule().await;
            return;
        }

        match self.start_pilot(drone_id, assignment_id, commander).await {
            Ok(pilot) => {
                if self.config.link_control_tower {
                    self.tower.register(drone_id, pilot.inbox());
                }
                if let Some(flight) = self.flights.get_mut(&drone_id) {
                    flight.pilot = Some(pilot);
                }
            }
            Err(e) => {
                error!("[SCHEDULER] cannot fly assignment {}: {}", assignment_id, e);
                self.flights.remove(&drone_id);
                self.unassign(drone_id, assignment_id, |a| a.canceled = true)
                    .await;
                self.bus
                    .publish(SchedulerEvent::AssignmentCanceled { assignment_id });
            }
        }
    }

    async fn start_pilot(
        &self,
        drone_id: DroneId,
        assignment_id: AssignmentId,
        commander: DroneCommander,
    ) -> Result<PilotHandle> {
        let assignment = self.repo.assignment(assignment_id).await?;
        let route = assignment.route[assignment.progress.min(assignment.route.len())..].to_vec();
        let pilot = Pilot::new(
            drone_id,
            commander,
            route,
            self.config.link_control_tower,
            self.reporter.clone(),
            self.pilot_config.clone(),
        )?;
        Ok(pilot.spawn())
    }

    /// The drone reached its destination. Its pilot lands it and the flight
    /// is settled once the pilot reports.
    fn drone_arrived(&mut self, drone_id: DroneId) {
        let Some(flight) = self.flights.get_mut(&drone_id) else {
            debug!("[SCHEDULER] arrival of drone {} without a flight", drone_id);
            return;
        };
        info!(
            "[SCHEDULER] drone {} arrived for assignment {}",
            drone_id, flight.assignment_id
        );
        flight.stop.get_or_insert(StopReason::Arrived);
        if let Some(pilot) = &flight.pilot {
            pilot.stop();
        }
    }

    /// The pilot of a flight terminated
    async fn flight_ended(&mut self, drone_id: DroneId, route_done: bool) {
        let Some(flight) = self.flights.remove(&drone_id) else {
            debug!("[SCHEDULER] end of drone {} without a flight", drone_id);
            return;
        };
        self.tower.remove(drone_id);

        if route_done || flight.stop == Some(StopReason::Arrived) {
            self.complete(drone_id, flight.assignment_id).await;
            if flight.stop == Some(StopReason::Battery) {
                self.charge(drone_id).await;
            }
        } else {
            if flight.stop.is_none() {
                // The pilot gave up on its own; the session is suspect
                self.fleet.forget(drone_id);
            }
            self.release(drone_id, flight.assignment_id, flight.stop).await;
        }
        self.honor_removal(drone_id);
        self.schedule().await;
    }

    async fn complete(&mut self, drone_id: DroneId, assignment_id: AssignmentId) {
        info!("[SCHEDULER] drone {} completed assignment {}", drone_id, assignment_id);
        self.unassign(drone_id, assignment_id, |a| a.progress = a.route.len())
            .await;
        self.bus.publish(SchedulerEvent::AssignmentCompleted {
            assignment_id,
            drone_id,
        });
    }

    /// Settle an assignment whose flight was stopped
    async fn release(
        &mut self,
        drone_id: DroneId,
        assignment_id: AssignmentId,
        reason: Option<StopReason>,
    ) {
        match reason {
            Some(StopReason::Arrived) => self.complete(drone_id, assignment_id).await,
            Some(StopReason::User) => {
                info!("[SCHEDULER] assignment {} canceled", assignment_id);
                self.unassign(drone_id, assignment_id, |a| a.canceled = true)
                    .await;
                self.bus
                    .publish(SchedulerEvent::AssignmentCanceled { assignment_id });
            }
            Some(StopReason::Battery) => {
                self.unassign(drone_id, assignment_id, |_| {}).await;
                self.charge(drone_id).await;
            }
            Some(StopReason::Emergency) | Some(StopReason::Shutdown) | None => {
                info!("[SCHEDULER] assignment {} back to pending", assignment_id);
                self.unassign(drone_id, assignment_id, |_| {}).await;
            }
        }
    }

    async fn cancel(&mut self, assignment_id: AssignmentId) {
        let flying = self
            .flights
            .values_mut()
            .find(|f| f.assignment_id == assignment_id);
        if let Some(flight) = flying {
            info!("[SCHEDULER] canceling assignment {} in flight", assignment_id);
            flight.stop = Some(StopReason::User);
            if let Some(pilot) = &flight.pilot {
                pilot.stop();
            }
            return;
        }

        match self
            .update_assignment(assignment_id, |a| {
                if a.is_pending() {
                    a.canceled = true;
                }
            })
            .await
        {
            Ok(a) if a.canceled => {
                info!("[SCHEDULER] assignment {} canceled", assignment_id);
                self.bus
                    .publish(SchedulerEvent::AssignmentCanceled { assignment_id });
            }
            Ok(_) => debug!("[SCHEDULER] assignment {} is not pending", assignment_id),
            Err(e) => warn!("[SCHEDULER] cannot cancel {}: {}", assignment_id, e),
        }
    }

    async fn drone_battery(&mut self, drone_id: DroneId, location: Option<Location>, percentage: u8) {
        if percentage > self.config.battery_critical_percent {
            info!(
                "[SCHEDULER] drone {} battery at {}% near {:?}",
                drone_id, percentage, location
            );
            return;
        }
        warn!("[SCHEDULER] drone {} battery critical at {}%", drone_id, percentage);
        self.bus.publish(SchedulerEvent::DroneBatteryLow {
            drone_id,
            percentage,
        });

        match self.flights.get_mut(&drone_id) {
            Some(flight) => {
                if flight.stop.is_none() {
                    flight.stop = Some(StopReason::Battery);
                    if let Some(pilot) = &flight.pilot {
                        pilot.stop();
                    }
                }
            }
            None => self.charge(drone_id).await,
        }
    }

    async fn emergency(&mut self, drone_id: DroneId) {
        error!("[SCHEDULER] EMERGENCY on drone {}", drone_id);
        if let Err(e) = self
            .update_drone(drone_id, |d| d.override_status(DroneStatus::Emergency))
            .await
        {
            error!("[SCHEDULER] cannot mark drone {} in emergency: {}", drone_id, e);
        }
        self.bus.publish(SchedulerEvent::DroneEmergency(drone_id));

        if let Some(flight) = self.flights.get_mut(&drone_id) {
            flight.stop = Some(StopReason::Emergency);
            if let Some(pilot) = &flight.pilot {
                pilot.stop();
            }
            return;
        }

        let Some(commander) = self.fleet.cached(drone_id) else {
            debug!("[SCHEDULER] drone {} has no open session", drone_id);
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = commander.emergency().await {
                warn!("[SCHEDULER] emergency command to drone {} failed: {}", drone_id, e);
            }
        });
    }

    /// Clear the assignment's drone and free the drone if it is still flying
    async fn unassign<F>(&mut self, drone_id: DroneId, assignment_id: AssignmentId, finish: F)
    where
        F: Fn(&mut Assignment) + Send,
    {
        self.release_drone(drone_id).await;
        if let Err(e) = self
            .update_assignment(assignment_id, move |a| {
                a.assigned_drone = None;
                finish(a);
            })
            .await
        {
            error!("[SCHEDULER] cannot release assignment {}: {}", assignment_id, e);
        }
    }

    async fn release_drone(&self, drone_id: DroneId) {
        let result = self
            .update_drone(drone_id, |d| {
                if d.status == DroneStatus::Flying {
                    d.override_status(DroneStatus::Available);
                }
            })
            .await;
        if let Err(e) = result {
            error!("[SCHEDULER] cannot release drone {}: {}", drone_id, e);
        }
    }

    async fn charge(&self, drone_id: DroneId) {
        let result = self
            .update_drone(drone_id, |d| {
                if d.status != DroneStatus::Emergency {
                    d.override_status(DroneStatus::Charging);
                }
            })
            .await;
        if let Err(e) = result {
            error!("[SCHEDULER] cannot send drone {} to charge: {}", drone_id, e);
        }
    }

    /// Load, change and save a drone, retrying on concurrent modification
    async fn update_drone<F>(&self, drone_id: DroneId, change: F) -> Result<Drone>
    where
        F: Fn(&mut Drone) + Send,
    {
        let mut attempt = 1;
        loop {
            let mut drone = self.repo.drone(drone_id).await?;
            change(&mut drone);
            match self.repo.save_drone(&drone).await {
                Err(FleetError::VersionConflict { .. }) if attempt < SAVE_ATTEMPTS => {
                    debug!("[SCHEDULER] drone {} changed underneath, retrying", drone_id);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn update_assignment<F>(&self, assignment_id: AssignmentId, change: F) -> Result<Assignment>
    where
        F: Fn(&mut Assignment) + Send,
    {
        let mut attempt = 1;
        loop {
            let mut assignment = self.repo.assignment(assignment_id).await?;
            change(&mut assignment);
            match self.repo.save_assignment(&assignment).await {
                Err(FleetError::VersionConflict { .. }) if attempt < SAVE_ATTEMPTS => {
                    debug!(
                        "[SCHEDULER] assignment {} changed underneath, retrying",
                        assignment_id
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
