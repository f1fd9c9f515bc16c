//! Simulated ARDrone3 firmware
//!
//! Plays the drone side of a session over an in-memory stream: it decodes
//! controller frames, acknowledges the ones that ask for it and answers with
//! the same events a Bebop sends. Flight is integrated on a fixed tick.

use crate::config::SimConfig;
use anyhow::Result;
use skyfleet_shared::codec::{buffer, CodecError, DataType, Frame, FrameDecoder, FrameEncoder};
use skyfleet_shared::handlers::events;
use skyfleet_shared::packet::{ardrone3_class, common_class, piloting, project, Packet};
use skyfleet_shared::telemetry::{DroneVersion, MoveToStatus, Rotation, Speed};
use skyfleet_shared::{geo, FlyingState, Location};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Height reached by a take-off, in meters
const TAKE_OFF_HEIGHT_M: f64 = 1.0;

/// Buffer size of the in-memory link
const LINK_CAPACITY: usize = 64 * 1024;

pub struct SimulatedDrone {
    name: String,
    config: SimConfig,
    state: FlyingState,
    location: Location,
    target: Option<Location>,
    max_height: f64,
    battery: f64,
    /// Last battery level sent, to report whole percent steps only
    reported_battery: u8,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
}

impl SimulatedDrone {
    /// A landed drone parked at `home` with a full battery
    pub fn new(name: impl Into<String>, home: Location, config: SimConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: FlyingState::Landed,
            location: home.with_altitude(0.0),
            target: None,
            max_height: 10.0,
            battery: 100.0,
            reported_battery: 100,
            decoder: FrameDecoder::new(),
            encoder: FrameEncoder::new(),
        }
    }

    pub fn with_battery(mut self, percent: u8) -> Self {
        self.battery = f64::from(percent.min(100));
        self.reported_battery = percent.min(100);
        self
    }

    /// Run the firmware and return the controller end of its link
    pub fn spawn(self) -> DuplexStream {
        let (controller, drone) = tokio::io::duplex(LINK_CAPACITY);
        tokio::spawn(async move {
            let name = self.name.clone();
            match self.run(drone).await {
                Ok(()) => info!("[SIM] {}: controller disconnected", name),
                Err(e) => warn!("[SIM] {}: stopped: {:#}", name, e),
            }
        });
        controller
    }

    async fn run(mut self, stream: DuplexStream) -> Result<()> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut read_buf = vec![0u8; 4096];
        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = reader.read(&mut read_buf) => {
                    let n = result?;
                    if n == 0 {
                        return Ok(());
                    }
                    self.decoder.extend(&read_buf[..n]);
                    while let Some(frame) = self.decoder.decode_next()? {
                        self.handle_frame(frame)?;
                    }
                }

                _ = ticker.tick() => self.step()?,
            }

            if !self.encoder.is_empty() {
                let bytes = self.encoder.take();
                if writer.write_all(&bytes).await.is_err() {
                    // Controller hung up
                    return Ok(());
                }
            }
        }
    }

    fn event(&mut self, packet: Packet) -> Result<(), CodecError> {
        self.encoder
            .encode(DataType::DataWithAck, buffer::D2C_EVENT, &packet.encode())?;
        Ok(())
    }

    fn navdata(&mut self, packet: Packet) -> Result<(), CodecError> {
        self.encoder
            .encode(DataType::Data, buffer::D2C_NAVDATA, &packet.encode())?;
        Ok(())
    }

    fn set_state(&mut self, state: FlyingState) -> Result<(), CodecError> {
        if self.state != state {
            debug!("[SIM] {}: {:?} -> {:?}", self.name, self.state, state);
            self.state = state;
            self.event(events::flying_state_changed(state))?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        match frame.data_type {
            DataType::Ack => return Ok(()),
            DataType::DataWithAck => self.encoder.encode_ack(&frame)?,
            _ => {}
        }
        if frame.buffer_id == buffer::PING {
            self.encoder
                .encode(DataType::Data, buffer::PONG, &frame.payload)?;
            return Ok(());
        }

        let packet = match Packet::decode(frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[SIM] {}: dropping bad packet: {}", self.name, e);
                return Ok(());
            }
        };
        self.handle_packet(&packet)
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        match (packet.project, packet.class, packet.command) {
            (project::COMMON, common_class::COMMON, 0) => self.send_all_states(),
            (project::COMMON, common_class::SETTINGS, 0) => {
                self.event(events::all_settings_changed())
            }
            (project::ARDRONE3, ardrone3_class::PILOTING, command) => self.pilot(command, packet),
            (project::ARDRONE3, ardrone3_class::PILOTING_SETTINGS, 0) => {
                let meters = packet.reader().f32()?;
                self.max_height = f64::from(meters.max(0.0));
                debug!("[SIM] {}: max height {} m", self.name, self.max_height);
                Ok(())
            }
            (p, c, cmd) => {
                debug!("[SIM] {}: ignoring command {}/{}/{}", self.name, p, c, cmd);
                Ok(())
            }
        }
    }

    fn send_all_states(&mut self) -> Result<(), CodecError> {
        let version = DroneVersion {
            software: "4.0.6".into(),
            hardware: "HW_02".into(),
        };
        self.event(events::product_version_changed(&version))?;
        self.event(events::flying_state_changed(self.state))?;
        self.event(events::battery_state_changed(self.reported_battery))?;
        self.navdata(events::position_changed(&self.location))?;
        self.navdata(events::altitude_changed(self.location.altitude))?;
        self.navdata(events::attitude_changed(Rotation::default()))?;
        self.navdata(events::speed_changed(Speed::default()))?;
        self.event(events::all_states_changed())
    }

    fn pilot(&mut self, command: u16, packet: &Packet) -> Result<(), CodecError> {
        match command {
            piloting::TAKE_OFF if self.state == FlyingState::Landed => {
                self.set_state(FlyingState::TakingOff)
            }
            piloting::LANDING if self.state.is_airborne() => {
                if let Some(target) = self.target.take() {
                    self.event(events::move_to_changed(&target, MoveToStatus::Canceled))?;
                }
                self.set_state(FlyingState::Landing)
            }
            piloting::EMERGENCY => {
                self.target = None;
                self.set_state(FlyingState::Emergency)
            }
            piloting::MOVE_TO => {
                let mut r = packet.reader();
                let target = Location::new(r.f64()?, r.f64()?, r.f64()?);
                if matches!(self.state, FlyingState::Hovering | FlyingState::Flying) {
                    self.target = Some(target);
                    self.event(events::move_to_changed(&target, MoveToStatus::Running))?;
                    self.set_state(FlyingState::Flying)
                } else {
                    self.event(events::move_to_changed(&target, MoveToStatus::Error))
                }
            }
            piloting::CANCEL_MOVE_TO => match self.target.take() {
                Some(target) => {
                    self.event(events::move_to_changed(&target, MoveToStatus::Canceled))?;
                    self.set_state(FlyingState::Hovering)
                }
                None => Ok(()),
            },
            piloting::FLAT_TRIM | piloting::PCMD => Ok(()),
            other => {
                debug!("[SIM] {}: piloting command {} ignored in {:?}", self.name, other, self.state);
                Ok(())
            }
        }
    }

    /// Advance the physics by one tick
    fn step(&mut self) -> Result<(), CodecError> {
        let dt = self.config.tick.as_secs_f64();
        let reach = self.config.speed * dt;

        match self.state {
            FlyingState::TakingOff => {
                self.location.altitude = TAKE_OFF_HEIGHT_M.min(self.max_height);
                self.report_position()?;
                self.set_state(FlyingState::Hovering)?;
            }
            FlyingState::Flying => {
                if let Some(target) = self.target {
                    let goal_altitude = target.altitude.min(self.max_height);
                    let mut next = geo::step_towards(&self.location, &target, reach);
                    let climb = goal_altitude - self.location.altitude;
                    next.altitude = self.location.altitude + climb.clamp(-reach, reach);
                    self.location = next;
                    self.report_position()?;

                    if self.location.distance(&target) < 1e-3
                        && (self.location.altitude - goal_altitude).abs() < 1e-6
                    {
                        self.target = None;
                        self.event(events::move_to_changed(&target, MoveToStatus::Done))?;
                        self.set_state(FlyingState::Hovering)?;
                    }
                }
            }
            FlyingState::Landing | FlyingState::Emergency => {
                self.location.altitude = 0.0;
                self.report_position()?;
                self.set_state(FlyingState::Landed)?;
            }
            _ => {}
        }

        if self.state.is_airborne() {
            self.battery = (self.battery - self.config.battery_drain_per_sec * dt).max(0.0);
            let level = self.battery.ceil() as u8;
            if level < self.reported_battery {
                self.reported_battery = level;
                self.event(events::battery_state_changed(level))?;
            }
        }
        Ok(())
    }

    fn report_position(&mut self) -> Result<(), CodecError> {
        self.navdata(events::position_changed(&self.location))?;
        self.navdata(events::altitude_changed(self.location.altitude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommanderConfig;
    use crate::drone::DroneSession;
    use skyfleet_shared::{DroneEvent, NavigationReason, NavigationState};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn fast() -> SimConfig {
        SimConfig {
            speed: 50.0,
            tick: Duration::from_millis(10),
            ..SimConfig::default()
        }
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<DroneEvent>,
        wanted: impl Fn(&DroneEvent) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if wanted(&event) {
                    return;
                }
            }
        })
        .await
        .expect("event not seen in time");
    }

    #[tokio::test]
    async fn test_init_reports_home_position() {
        let home = Location::new(50.85, 4.35, 0.0);
        let link = SimulatedDrone::new("sim", home, fast()).with_battery(80).spawn();
        let commander = DroneSession::spawn("sim", link, CommanderConfig::default());

        commander.init().await.unwrap();
        assert_eq!(commander.location().await.unwrap(), home);
        assert_eq!(commander.battery_percentage().await.unwrap(), 80);
        assert_eq!(commander.flying_state().await.unwrap(), FlyingState::Landed);
        assert_eq!(commander.version().await.unwrap().software, "4.0.6");
    }

    #[tokio::test]
    async fn test_take_off_move_and_land() {
        let home = Location::new(50.85, 4.35, 0.0);
        let target = Location::new(50.8501, 4.3501, 3.0);
        let link = SimulatedDrone::new("sim", home, fast()).spawn();
        let commander = DroneSession::spawn("sim", link, CommanderConfig::default());
        commander.init().await.unwrap();
        let mut events = commander.subscribe();

        commander.take_off().await.unwrap();
        wait_for(&mut events, |e| {
            *e == DroneEvent::FlyingStateChanged(FlyingState::Hovering)
        })
        .await;

        commander
            .move_to(target.latitude, target.longitude, target.altitude)
            .await
            .unwrap();
        wait_for(&mut events, |e| {
            *e == DroneEvent::NavigationStateChanged {
                state: NavigationState::Available,
                reason: NavigationReason::Finished,
            }
        })
        .await;
        let here = commander.location().await.unwrap();
        assert!(here.distance(&target) < 0.01);
        assert!((here.altitude - 3.0).abs() < 1e-6);

        commander.land().await.unwrap();
        wait_for(&mut events, |e| {
            *e == DroneEvent::FlyingStateChanged(FlyingState::Landed)
        })
        .await;
    }

    #[tokio::test]
    async fn test_move_to_on_the_ground_fails() {
        let link = SimulatedDrone::new("sim", Location::default(), fast()).spawn();
        let commander = DroneSession::spawn("sim", link, CommanderConfig::default());
        commander.init().await.unwrap();
        let mut events = commander.subscribe();

        commander.move_to(1.0, 1.0, 3.0).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(
                e,
                DroneEvent::NavigationStateChanged {
                    state: NavigationState::Unavailable,
                    ..
                }
            )
        })
        .await;
    }
}
