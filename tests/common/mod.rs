//! Shared fixtures for integration tests
#![allow(dead_code)]

use skyfleet::config::{CommanderConfig, FleetConfig, SimConfig};
use skyfleet::drone::{DroneCommander, Fleet, PropertyType, PropertyValue, SessionCommand, SessionRequest};
use skyfleet::error::FleetError;
use skyfleet::events::SchedulerEvent;
use skyfleet::flight::{ControlTower, FlightControlMessage, PilotMessage, PilotReport};
use skyfleet::sim::SimulatorDriver;
use skyfleet_shared::{geo, DroneEvent, DroneId, Location};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn brussels() -> Location {
    Location::new(50.85, 4.35, 0.0)
}

/// `base` moved `meters` to the north
pub fn north_of(base: Location, meters: f64) -> Location {
    Location::new(
        base.latitude + meters / geo::meters_per_deg_lat(),
        base.longitude,
        base.altitude,
    )
}

/// Drone session answered by the test: commands are recorded, location
/// queries return the scripted position, telemetry is pushed by hand
pub struct ScriptedDrone {
    pub commander: DroneCommander,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: broadcast::Sender<DroneEvent>,
    location: Arc<Mutex<Location>>,
}

impl ScriptedDrone {
    pub fn new(at: Location) -> Self {
        let (requests, mut rx) = mpsc::channel::<SessionRequest>(16);
        let (events, _) = broadcast::channel(64);
        let (command_tx, commands) = mpsc::unbounded_channel();
        let location = Arc::new(Mutex::new(at));

        let here = location.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    SessionRequest::Init { reply } => {
                        let _ = reply.send(Ok(()));
                    }
                    SessionRequest::Command { command, reply } => {
                        let _ = command_tx.send(command);
                        let _ = reply.send(Ok(()));
                    }
                    SessionRequest::Property { property, reply } => {
                        let value = match property {
                            PropertyType::Location => {
                                Ok(PropertyValue::Location(*here.lock().unwrap()))
                            }
                            other => Err(FleetError::PropertyUnavailable(other.name())),
                        };
                        let _ = reply.send(value);
                    }
                }
            }
        });

        Self {
            commander: DroneCommander::new(requests, events.clone(), CommanderConfig::default()),
            commands,
            events,
            location,
        }
    }

    pub fn emit(&self, event: DroneEvent) {
        if let DroneEvent::PositionChanged(l) = event {
            *self.location.lock().unwrap() = l;
        }
        let _ = self.events.send(event);
    }

    pub fn move_to(&self, location: Location) {
        self.emit(DroneEvent::PositionChanged(location));
    }

    /// Next command matching `wanted`, skipping others
    pub async fn expect(&mut self, wanted: impl Fn(&SessionCommand) -> bool) -> SessionCommand {
        timeout(WAIT, async {
            loop {
                let command = self.commands.recv().await.expect("session closed");
                if wanted(&command) {
                    return command;
                }
            }
        })
        .await
        .expect("command not sent in time")
    }

    /// Commands sent so far, without waiting
    pub fn sent(&mut self) -> Vec<SessionCommand> {
        let mut sent = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            sent.push(command);
        }
        sent
    }
}

/// Control tower on its own task, fed by the pilots' reports
pub struct TowerRelay {
    pub reporter: mpsc::UnboundedSender<PilotReport>,
    registrations: mpsc::UnboundedSender<(DroneId, mpsc::UnboundedSender<PilotMessage>)>,
    /// Coordination traffic seen by the tower
    pub traffic: mpsc::UnboundedReceiver<(DroneId, FlightControlMessage)>,
    /// Everything else the pilots reported
    pub outcomes: mpsc::UnboundedReceiver<PilotReport>,
}

impl TowerRelay {
    pub fn spawn() -> Self {
        let (reporter, mut reports) = mpsc::unbounded_channel();
        let (registrations, mut joins) =
            mpsc::unbounded_channel::<(DroneId, mpsc::UnboundedSender<PilotMessage>)>();
        let (traffic_tx, traffic) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut tower = ControlTower::new();
            loop {
                tokio::select! {
                    biased;
                    Some((id, inbox)) = joins.recv() => tower.register(id, inbox),
                    Some(report) = reports.recv() => match report {
                        PilotReport::Coordination { from, message } => {
                            let _ = traffic_tx.send((from, message));
                            tower.handle(from, message);
                        }
                        other => {
                            let _ = outcome_tx.send(other);
                        }
                    },
                    else => break,
                }
            }
        });

        Self {
            reporter,
            registrations,
            traffic,
            outcomes,
        }
    }

    pub fn register(&self, drone_id: DroneId, inbox: mpsc::UnboundedSender<PilotMessage>) {
        self.registrations.send((drone_id, inbox)).unwrap();
    }

    /// Next coordination message matching `wanted`
    pub async fn expect(
        &mut self,
        wanted: impl Fn(DroneId, &FlightControlMessage) -> bool,
    ) -> FlightControlMessage {
        timeout(WAIT, async {
            loop {
                let (from, message) = self.traffic.recv().await.expect("relay stopped");
                if wanted(from, &message) {
                    return message;
                }
            }
        })
        .await
        .expect("coordination message not seen in time")
    }
}

/// Simulated drones that fly fast enough for tests
pub fn fast_sim() -> SimConfig {
    SimConfig {
        speed: 50.0,
        tick: Duration::from_millis(10),
        home: brussels(),
        ..SimConfig::default()
    }
}

pub fn test_config(sim: SimConfig) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.sim = sim;
    config.scheduler.stop_grace = Duration::from_secs(2);
    config
}

pub fn sim_fleet(config: &FleetConfig) -> Arc<Fleet> {
    Arc::new(
        Fleet::new(config.commander.clone())
            .with_driver(Arc::new(SimulatorDriver::new(config.sim.clone()))),
    )
}

/// Wait for the first event matching `wanted`
pub async fn wait_event(
    events: &mut mpsc::UnboundedReceiver<SchedulerEvent>,
    wanted: impl Fn(&SchedulerEvent) -> bool,
) -> SchedulerEvent {
    timeout(WAIT * 2, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("scheduler event not seen in time")
}
