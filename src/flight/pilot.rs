//! Pilot: flies one drone along a route while sharing the airspace
//!
//! Take-off and landing need the airspace around the drone. When linked to a
//! control tower the pilot asks for it and waits for the grant. Other pilots
//! answer a request right away unless the requester is within the evacuation
//! radius; then the grant is held until they moved clear. Every granted spot
//! becomes a no-fly point until its owner reports completion, and a pilot
//! that drifts within the no-fly radius of such a point stops moving.
//! A pilot still on the ground cannot clear the way, so it grants at once.

use super::messages::{FlightControlMessage, LocationMessage, PilotMessage, PilotReport, RequestType};
use crate::config::PilotConfig;
use crate::drone::DroneCommander;
use crate::error::{FleetError, Result};
use skyfleet_shared::safety::{EVACUATION_RADIUS_M, NO_FLY_RADIUS_M};
use skyfleet_shared::{
    Checkpoint, DroneEvent, DroneId, FlyingState, Location, NavigationReason, NavigationState,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightPhase {
    Idle,
    AwaitingTakeOffGrant,
    TakingOff,
    Cruising,
    AwaitingLandingGrant,
    Landing,
    Completed,
    Canceled,
}

pub struct Pilot {
    drone_id: DroneId,
    commander: DroneCommander,
    route: Vec<Checkpoint>,
    /// Index of the checkpoint being flown to
    waypoint: usize,
    cruising_altitude: f64,
    linked: bool,
    config: PilotConfig,
    reporter: mpsc::UnboundedSender<PilotReport>,
    phase: FlightPhase,
    location: Option<Location>,
    no_fly: Vec<Location>,
    evacuations: Vec<LocationMessage>,
    /// Our granted take-off or landing, reported complete once done
    own_request: Option<LocationMessage>,
    /// Movement canceled because of a no-fly point
    holding: bool,
    /// Give up on the flight if the take-off grant has not arrived by then
    grant_deadline: Option<Instant>,
    battery_reported: bool,
}

/// Handle kept by whoever started the pilot
#[derive(Debug)]
pub struct PilotHandle {
    drone_id: DroneId,
    inbox: mpsc::UnboundedSender<PilotMessage>,
    task: JoinHandle<()>,
}

impl PilotHandle {
    pub fn drone_id(&self) -> DroneId {
        self.drone_id
    }

    /// Sender for relaying coordination traffic to this pilot
    pub fn inbox(&self) -> mpsc::UnboundedSender<PilotMessage> {
        self.inbox.clone()
    }

    /// Deliver a message; false once the pilot terminated
    pub fn send(&self, message: PilotMessage) -> bool {
        self.inbox.send(message).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.send(PilotMessage::Stop)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pilot task to end
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("[PILOT] drone {}: task failed: {}", self.drone_id, e);
        }
    }
}

impl Pilot {
    /// Create a pilot for `route`; the drone lands on the last checkpoint
    pub fn new(
        drone_id: DroneId,
        commander: DroneCommander,
        route: Vec<Checkpoint>,
        linked: bool,
        reporter: mpsc::UnboundedSender<PilotReport>,
        config: PilotConfig,
    ) -> Result<Self> {
        if route.is_empty() {
            return Err(FleetError::InvalidRoute);
        }
        Ok(Self {
            drone_id,
            commander,
            route,
            waypoint: 0,
            cruising_altitude: 0.0,
            linked,
            config,
            reporter,
            phase: FlightPhase::Idle,
            location: None,
            no_fly: Vec::new(),
            evacuations: Vec::new(),
            own_request: None,
            holding: false,
            grant_deadline: None,
            battery_reported: false,
        })
    }

    /// Altitude to cruise at; 0 uses the configured default
    pub fn with_cruising_altitude(mut self, altitude: f64) -> Self {
        self.cruising_altitude = altitude;
        self
    }

    pub fn spawn(self) -> PilotHandle {
        let drone_id = self.drone_id;
        let (inbox, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        PilotHandle {
            drone_id,
            inbox,
            task,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<PilotMessage>) {
        let mut telemetry = self.commander.subscribe();

        if let Err(e) = self.start().await {
            error!("[PILOT] drone {}: could not start flight: {}", self.drone_id, e);
            self.phase = FlightPhase::Canceled;
            self.report(PilotReport::FlightCanceled {
                drone_id: self.drone_id,
            });
            return;
        }

        loop {
            tokio::select! {
                biased;

                message = inbox.recv() => match message {
                    Some(PilotMessage::FlightControl(m)) => self.handle_flight_control(m).await,
                    Some(PilotMessage::Stop) | None => {
                        self.stop(&mut telemetry).await;
                        return;
                    }
                },

                _ = expires(self.grant_deadline) => {
                    error!(
                        "[PILOT] drone {}: no take-off grant after {:?}",
                        self.drone_id, self.config.grant_timeout
                    );
                    self.grant_deadline = None;
                    self.phase = FlightPhase::Canceled;
                }

                event = telemetry.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!("[PILOT] drone {}: missed {} telemetry events", self.drone_id, n);
                    }
                    Err(RecvError::Closed) => {
                        error!("[PILOT] drone {}: telemetry closed", self.drone_id);
                        self.phase = FlightPhase::Canceled;
                    }
                },
            }

            if self.commander.is_closed() && self.phase != FlightPhase::Completed {
                error!("[PILOT] drone {}: lost the drone session", self.drone_id);
                self.phase = FlightPhase::Canceled;
            }

            match self.phase {
                FlightPhase::Completed => {
                    info!("[PILOT] drone {}: flight completed", self.drone_id);
                    self.report(PilotReport::FlightCompleted {
                        drone_id: self.drone_id,
                        location: self.location,
                    });
                    return;
                }
                FlightPhase::Canceled => {
                    self.report(PilotReport::FlightCanceled {
                        drone_id: self.drone_id,
                    });
                    return;
                }
                _ => {}
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.cruising_altitude == 0.0 {
            self.cruising_altitude = self.config.default_altitude;
        }
        self.location = Some(self.commander.location().await?);

        if let Err(e) = self.commander.set_max_height(self.config.max_height).await {
            warn!("[PILOT] drone {}: set max height failed: {}", self.drone_id, e);
        }

        info!(
            "[PILOT] drone {}: starting route of {} checkpoints at {} m",
            self.drone_id,
            self.route.len(),
            self.cruising_altitude
        );
        self.take_off().await;
        Ok(())
    }

    fn report(&self, report: PilotReport) {
        if self.reporter.send(report).is_err() {
            debug!("[PILOT] drone {}: reporter is gone", self.drone_id);
        }
    }

    fn tell_tower(&self, message: FlightControlMessage) {
        self.report(PilotReport::Coordination {
            from: self.drone_id,
            message,
        });
    }

    fn log_failure(&self, operation: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("[PILOT] drone {}: {} failed: {}", self.drone_id, operation, e);
        }
    }

    fn here(&self) -> Location {
        self.location.unwrap_or_default()
    }

    async fn take_off(&mut self) {
        if self.linked {
            self.phase = FlightPhase::AwaitingTakeOffGrant;
            self.grant_deadline = Some(Instant::now() + self.config.grant_timeout);
            self.tell_tower(FlightControlMessage::request(
                self.drone_id,
                self.here(),
                RequestType::TakeOff,
            ));
        } else {
            self.phase = FlightPhase::TakingOff;
            let result = self.commander.take_off().await;
            self.log_failure("take off", result);
        }
    }

    async fn land(&mut self) {
        if self.linked {
            self.phase = FlightPhase::AwaitingLandingGrant;
            self.tell_tower(FlightControlMessage::request(
                self.drone_id,
                self.here(),
                RequestType::Landing,
            ));
        } else {
            self.phase = FlightPhase::Landing;
            let result = self.commander.land().await;
            self.log_failure("land", result);
        }
    }

    /// Fly to the current checkpoint, or land once the route is done
    async fn go_to_waypoint(&mut self) {
        match self.route.get(self.waypoint) {
            Some(checkpoint) => {
                let target = checkpoint.location;
                debug!(
                    "[PILOT] drone {}: heading to checkpoint {}",
                    self.drone_id, self.waypoint
                );
                let result = self
                    .commander
                    .move_to(target.latitude, target.longitude, self.cruising_altitude)
                    .await;
                self.log_failure("move to", result);
            }
            None => self.land().await,
        }
    }

    fn route_complete(&self) -> bool {
        self.waypoint >= self.route.len()
    }

    fn near_no_fly_point(&self) -> bool {
        let here = self.here();
        self.no_fly.iter().any(|p| here.distance(p) < NO_FLY_RADIUS_M)
    }

    async fn handle_flight_control(&mut self, message: FlightControlMessage) {
        let m = *message.location_message();
        let own = m.requester == self.drone_id;

        if message.is_request() && !own {
            let grounded = matches!(
                self.phase,
                FlightPhase::Idle | FlightPhase::AwaitingTakeOffGrant
            );
            match self.location {
                Some(here) if !grounded && here.distance(&m.location) <= EVACUATION_RADIUS_M => {
                    info!(
                        "[PILOT] drone {}: must clear the way for drone {}",
                        self.drone_id, m.requester
                    );
                    self.evacuations.push(m);
                }
                _ => {
                    self.no_fly.push(m.location);
                    self.tell_tower(FlightControlMessage::grant(m));
                }
            }
        } else if message.is_grant() && own {
            match (m.kind, self.phase) {
                (RequestType::TakeOff, FlightPhase::AwaitingTakeOffGrant) => {
                    self.grant_deadline = None;
                    self.own_request = Some(m);
                    self.phase = FlightPhase::TakingOff;
                    let result = self.commander.take_off().await;
                    self.log_failure("take off", result);
                }
                (RequestType::Landing, FlightPhase::AwaitingLandingGrant) => {
                    self.own_request = Some(m);
                    self.phase = FlightPhase::Landing;
                    let result = self.commander.land().await;
                    self.log_failure("land", result);
                }
                (kind, phase) => debug!(
                    "[PILOT] drone {}: ignoring {:?} grant in {:?}",
                    self.drone_id, kind, phase
                ),
            }
        } else if message.is_completion() && !own {
            if let Some(i) = self.no_fly.iter().position(|p| *p == m.location) {
                self.no_fly.remove(i);
            }
            self.evacuations.retain(|e| e.requester != m.requester);

            if self.holding && self.phase == FlightPhase::Cruising && !self.near_no_fly_point() {
                info!("[PILOT] drone {}: airspace clear, resuming", self.drone_id);
                self.holding = false;
                self.go_to_waypoint().await;
            }
        }
    }

    async fn handle_event(&mut self, event: DroneEvent) {
        match event {
            DroneEvent::PositionChanged(location) => {
                self.location = Some(location);
                self.location_changed().await;
            }
            DroneEvent::FlyingStateChanged(state) => self.flying_state_changed(state).await,
            DroneEvent::NavigationStateChanged { state, reason } => {
                self.navigation_state_changed(state, reason).await
            }
            DroneEvent::BatteryChanged(percentage) => {
                if percentage <= self.config.battery_warning_percent && !self.battery_reported {
                    warn!("[PILOT] drone {}: battery at {}%", self.drone_id, percentage);
                    self.battery_reported = true;
                    self.report(PilotReport::Battery {
                        drone_id: self.drone_id,
                        location: self.location,
                        percentage,
                    });
                }
            }
            _ => {}
        }
    }

    async fn location_changed(&mut self) {
        let here = self.here();

        let (cleared, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.evacuations)
            .into_iter()
            .partition(|e| here.distance(&e.location) > EVACUATION_RADIUS_M);
        self.evacuations = waiting;
        for request in cleared {
            info!(
                "[PILOT] drone {}: cleared the way for drone {}",
                self.drone_id, request.requester
            );
            self.no_fly.push(request.location);
            self.tell_tower(FlightControlMessage::grant(request));
        }

        if !self.holding && self.phase == FlightPhase::Cruising && self.near_no_fly_point() {
            warn!("[PILOT] drone {}: entering no-fly zone, holding", self.drone_id);
            self.holding = true;
            let result = self.commander.cancel_move_to().await;
            self.log_failure("cancel move to", result);
        }
    }

    async fn flying_state_changed(&mut self, state: FlyingState) {
        match (self.phase, state) {
            (FlightPhase::TakingOff, FlyingState::Hovering) => {
                if let Some(request) = self.own_request.take() {
                    self.tell_tower(FlightControlMessage::completed(request));
                }
                self.phase = FlightPhase::Cruising;
                self.waypoint = 0;
                self.go_to_waypoint().await;
            }
            (FlightPhase::Landing, FlyingState::Landed) => {
                if let Some(request) = self.own_request.take() {
                    self.tell_tower(FlightControlMessage::completed(request));
                }
                self.phase = FlightPhase::Completed;
            }
            _ => {}
        }
    }

    async fn navigation_state_changed(&mut self, state: NavigationState, reason: NavigationReason) {
        if self.phase != FlightPhase::Cruising {
            return;
        }
        match (state, reason) {
            (NavigationState::Available, NavigationReason::Finished) => {
                if self.holding || self.route_complete() {
                    return;
                }
                self.waypoint += 1;
                self.go_to_waypoint().await;
            }
            // Our own cancel; keep position until the airspace is clear
            (NavigationState::Available, NavigationReason::Stopped) => {
                debug!("[PILOT] drone {}: navigation stopped", self.drone_id);
            }
            (NavigationState::Unavailable, _) => {
                warn!("[PILOT] drone {}: navigation unavailable", self.drone_id);
            }
            _ => {}
        }
    }

    /// Land where we are and terminate once on the ground. A drone already at
    /// its destination counts as arrived, anything else as canceled.
    async fn stop(&mut self, telemetry: &mut broadcast::Receiver<DroneEvent>) {
        info!("[PILOT] drone {}: stop requested in {:?}", self.drone_id, self.phase);

        let on_ground = matches!(
            self.phase,
            FlightPhase::Idle | FlightPhase::AwaitingTakeOffGrant
        );
        if !on_ground {
            if self.phase != FlightPhase::Landing {
                let result = self.commander.land().await;
                self.log_failure("safety landing", result);
            }
            self.wait_landed(telemetry).await;
        }
        if let Some(request) = self.own_request.take() {
            self.tell_tower(FlightControlMessage::completed(request));
        }

        if self.route_complete() {
            self.phase = FlightPhase::Completed;
            self.report(PilotReport::FlightCompleted {
                drone_id: self.drone_id,
                location: self.location,
            });
        } else {
            self.phase = FlightPhase::Canceled;
            self.report(PilotReport::FlightCanceled {
                drone_id: self.drone_id,
            });
        }
    }

    async fn wait_landed(&mut self, telemetry: &mut broadcast::Receiver<DroneEvent>) {
        let limit = self.config.landing_timeout;
        let location = &mut self.location;
        let landed = async {
            loop {
                match telemetry.recv().await {
                    Ok(DroneEvent::FlyingStateChanged(FlyingState::Landed))
                    | Err(RecvError::Closed) => return,
                    Ok(DroneEvent::PositionChanged(l)) => *location = Some(l),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                }
            }
        };
        if timeout(limit, landed).await.is_err() {
            warn!(
                "[PILOT] drone {}: not on the ground after {:?}",
                self.drone_id, limit
            );
        }
    }
}

async fn expires(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
