//! Packet decoding into typed drone events
//!
//! Incoming packets are routed on their header: the (project, class) pair
//! selects a [`CommandProcessor`], and the command id selects the handler
//! inside it. Pairs and command ids nobody registered decode to `Ok(None)`
//! so new firmware messages never break a session.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use crate::codec::CodecError;
use crate::geo::Location;
use crate::packet::{
    ardrone3_class, common_class, piloting_state, project, put_string, Packet, UNKNOWN_POSITION,
};
use crate::telemetry::{
    AlertState, DroneEvent, DroneVersion, FlyingState, MoveToStatus, Rotation, Speed,
};

/// Decodes the arguments of one command
pub type CommandHandler = fn(&Packet) -> Result<Option<DroneEvent>, CodecError>;

/// Handlers for all commands of one (project, class) pair
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    project: u8,
    class: u8,
    handlers: HashMap<u16, CommandHandler>,
}

impl CommandProcessor {
    pub fn new(project: u8, class: u8) -> Self {
        Self {
            project,
            class,
            handlers: HashMap::new(),
        }
    }

    pub fn with(mut self, command: u16, handler: CommandHandler) -> Self {
        self.handlers.insert(command, handler);
        self
    }

    pub fn key(&self) -> (u8, u8) {
        (self.project, self.class)
    }

    pub fn process(&self, packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
        match self.handlers.get(&packet.command) {
            Some(handler) => handler(packet),
            None => Ok(None),
        }
    }
}

/// Routing table from packet header to command processor
#[derive(Debug, Clone, Default)]
pub struct PacketRegistry {
    processors: HashMap<(u8, u8), CommandProcessor>,
}

impl PacketRegistry {
    /// Registry without any processor
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every event an ARDrone3 drone reports
    pub fn ardrone3() -> Self {
        let mut registry = Self::empty();
        registry.register(
            CommandProcessor::new(project::ARDRONE3, ardrone3_class::PILOTING_STATE)
                .with(piloting_state::FLYING_STATE_CHANGED, flying_state_changed)
                .with(piloting_state::ALERT_STATE_CHANGED, alert_state_changed)
                .with(piloting_state::POSITION_CHANGED, position_changed)
                .with(piloting_state::SPEED_CHANGED, speed_changed)
                .with(piloting_state::ATTITUDE_CHANGED, attitude_changed)
                .with(piloting_state::ALTITUDE_CHANGED, altitude_changed)
                .with(piloting_state::MOVE_TO_CHANGED, move_to_changed),
        );
        registry.register(
            CommandProcessor::new(project::COMMON, common_class::COMMON_STATE)
                .with(0, |_| Ok(Some(DroneEvent::AllStatesChanged)))
                .with(1, battery_state_changed),
        );
        registry.register(
            CommandProcessor::new(project::COMMON, common_class::SETTINGS_STATE)
                .with(0, |_| Ok(Some(DroneEvent::AllSettingsChanged)))
                .with(3, product_version_changed),
        );
        registry.register(
            CommandProcessor::new(project::COMMON, common_class::CALIBRATION_STATE)
                .with(1, calibration_state_changed),
        );
        registry
    }

    /// Add a processor, replacing any previous one for the same pair
    pub fn register(&mut self, processor: CommandProcessor) {
        self.processors.insert(processor.key(), processor);
    }

    pub fn decode(&self, packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
        match self.processors.get(&(packet.project, packet.class)) {
            Some(processor) => processor.process(packet),
            None => Ok(None),
        }
    }
}

fn flying_state_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let raw = packet.reader().u32()?;
    let state = FlyingState::from_wire(raw)
        .ok_or_else(|| CodecError::InvalidPayload(format!("unknown flying state {raw}")))?;
    Ok(Some(DroneEvent::FlyingStateChanged(state)))
}

fn alert_state_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let raw = packet.reader().u32()?;
    let state = AlertState::from_wire(raw)
        .ok_or_else(|| CodecError::InvalidPayload(format!("unknown alert state {raw}")))?;
    Ok(Some(DroneEvent::AlertStateChanged(state)))
}

fn position_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let mut r = packet.reader();
    let (latitude, longitude, altitude) = (r.f64()?, r.f64()?, r.f64()?);
    // No GPS fix yet
    if latitude == UNKNOWN_POSITION || longitude == UNKNOWN_POSITION {
        return Ok(None);
    }
    Ok(Some(DroneEvent::PositionChanged(Location::new(
        latitude, longitude, altitude,
    ))))
}

fn speed_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let mut r = packet.reader();
    Ok(Some(DroneEvent::SpeedChanged(Speed {
        vx: r.f32()?,
        vy: r.f32()?,
        vz: r.f32()?,
    })))
}

fn attitude_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let mut r = packet.reader();
    Ok(Some(DroneEvent::AttitudeChanged(Rotation {
        roll: r.f32()?,
        pitch: r.f32()?,
        yaw: r.f32()?,
    })))
}

fn altitude_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    Ok(Some(DroneEvent::AltitudeChanged(packet.reader().f64()?)))
}

fn move_to_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let mut r = packet.reader();
    // Target position, orientation mode and heading are not needed by pilots
    r.f64()?;
    r.f64()?;
    r.f64()?;
    r.u32()?;
    r.f32()?;
    let raw = r.u32()?;
    let status = MoveToStatus::from_wire(raw)
        .ok_or_else(|| CodecError::InvalidPayload(format!("unknown move-to status {raw}")))?;
    let (state, reason) = status.navigation();
    Ok(Some(DroneEvent::NavigationStateChanged { state, reason }))
}

fn battery_state_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    Ok(Some(DroneEvent::BatteryChanged(packet.reader().u8()?)))
}

fn product_version_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let mut r = packet.reader();
    Ok(Some(DroneEvent::ProductVersionChanged(DroneVersion {
        software: r.string()?,
        hardware: r.string()?,
    })))
}

fn calibration_state_changed(packet: &Packet) -> Result<Option<DroneEvent>, CodecError> {
    let required = packet.reader().u8()?;
    Ok(Some(DroneEvent::CalibrationStateChanged {
        calibration_required: required == 1,
    }))
}

/// Builders for drone -> controller event packets
pub mod events {
    use super::*;

    fn state_packet(command: u16, payload: BytesMut) -> Packet {
        Packet::new(
            project::ARDRONE3,
            ardrone3_class::PILOTING_STATE,
            command,
            payload.freeze(),
        )
    }

    pub fn flying_state_changed(state: FlyingState) -> Packet {
        let mut b = BytesMut::with_capacity(4);
        b.put_u32_le(state.to_wire());
        state_packet(piloting_state::FLYING_STATE_CHANGED, b)
    }

    pub fn position_changed(location: &Location) -> Packet {
        let mut b = BytesMut::with_capacity(24);
        b.put_f64_le(location.latitude);
        b.put_f64_le(location.longitude);
        b.put_f64_le(location.altitude);
        state_packet(piloting_state::POSITION_CHANGED, b)
    }

    pub fn speed_changed(speed: Speed) -> Packet {
        let mut b = BytesMut::with_capacity(12);
        b.put_f32_le(speed.vx);
        b.put_f32_le(speed.vy);
        b.put_f32_le(speed.vz);
        state_packet(piloting_state::SPEED_CHANGED, b)
    }

    pub fn attitude_changed(rotation: Rotation) -> Packet {
        let mut b = BytesMut::with_capacity(12);
        b.put_f32_le(rotation.roll);
        b.put_f32_le(rotation.pitch);
        b.put_f32_le(rotation.yaw);
        state_packet(piloting_state::ATTITUDE_CHANGED, b)
    }

    pub fn altitude_changed(altitude: f64) -> Packet {
        let mut b = BytesMut::with_capacity(8);
        b.put_f64_le(altitude);
        state_packet(piloting_state::ALTITUDE_CHANGED, b)
    }

    pub fn move_to_changed(target: &Location, status: MoveToStatus) -> Packet {
        let mut b = BytesMut::with_capacity(36);
        b.put_f64_le(target.latitude);
        b.put_f64_le(target.longitude);
        b.put_f64_le(target.altitude);
        b.put_u32_le(0);
        b.put_f32_le(0.0);
        b.put_u32_le(status.to_wire());
        state_packet(piloting_state::MOVE_TO_CHANGED, b)
    }

    pub fn battery_state_changed(percent: u8) -> Packet {
        Packet::new(project::COMMON, common_class::COMMON_STATE, 1, vec![percent])
    }

    pub fn all_states_changed() -> Packet {
        Packet::bare(project::COMMON, common_class::COMMON_STATE, 0)
    }

    pub fn all_settings_changed() -> Packet {
        Packet::bare(project::COMMON, common_class::SETTINGS_STATE, 0)
    }

    pub fn product_version_changed(version: &DroneVersion) -> Packet {
        let mut b = BytesMut::new();
        put_string(&mut b, &version.software);
        put_string(&mut b, &version.hardware);
        Packet::new(project::COMMON, common_class::SETTINGS_STATE, 3, b.freeze())
    }

    pub fn calibration_state_changed(required: bool) -> Packet {
        Packet::new(
            project::COMMON,
            common_class::CALIBRATION_STATE,
            1,
            vec![required as u8],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{NavigationReason, NavigationState};
    use bytes::Bytes;

    fn decode(raw: &'static [u8]) -> Result<Option<DroneEvent>, CodecError> {
        let packet = Packet::decode(Bytes::from_static(raw)).unwrap();
        PacketRegistry::ardrone3().decode(&packet)
    }

    #[test]
    fn test_calibration_from_single_byte() {
        assert_eq!(
            decode(&[0, 14, 1, 0, 1]).unwrap(),
            Some(DroneEvent::CalibrationStateChanged {
                calibration_required: true
            })
        );
        assert_eq!(
            decode(&[0, 14, 1, 0, 0]).unwrap(),
            Some(DroneEvent::CalibrationStateChanged {
                calibration_required: false
            })
        );
    }

    #[test]
    fn test_flying_state_hovering() {
        assert_eq!(
            decode(&[1, 4, 1, 0, 2, 0, 0, 0]).unwrap(),
            Some(DroneEvent::FlyingStateChanged(FlyingState::Hovering))
        );
        assert!(matches!(
            decode(&[1, 4, 1, 0, 42, 0, 0, 0]),
            Err(CodecError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_battery_and_all_states() {
        assert_eq!(
            decode(&[0, 5, 1, 0, 87]).unwrap(),
            Some(DroneEvent::BatteryChanged(87))
        );
        assert_eq!(
            decode(&[0, 5, 0, 0]).unwrap(),
            Some(DroneEvent::AllStatesChanged)
        );
    }

    #[test]
    fn test_unknown_pairs_are_ignored() {
        // Unregistered class
        assert_eq!(decode(&[1, 99, 0, 0]).unwrap(), None);
        // Registered class, unregistered command
        assert_eq!(decode(&[1, 4, 99, 0]).unwrap(), None);
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        assert!(matches!(
            decode(&[1, 4, 8, 0, 1, 2]),
            Err(CodecError::NotEnoughData { needed: 8, .. })
        ));
    }

    #[test]
    fn test_unknown_position_is_dropped() {
        let packet = events::position_changed(&Location::new(500.0, 500.0, 500.0));
        assert_eq!(PacketRegistry::ardrone3().decode(&packet).unwrap(), None);

        let packet = events::position_changed(&Location::new(50.85, 4.35, 12.0));
        assert_eq!(
            PacketRegistry::ardrone3().decode(&packet).unwrap(),
            Some(DroneEvent::PositionChanged(Location::new(50.85, 4.35, 12.0)))
        );
    }

    #[test]
    fn test_move_to_done_means_navigation_finished() {
        let packet = events::move_to_changed(&Location::new(50.0, 4.0, 10.0), MoveToStatus::Done);
        assert_eq!(
            PacketRegistry::ardrone3().decode(&packet).unwrap(),
            Some(DroneEvent::NavigationStateChanged {
                state: NavigationState::Available,
                reason: NavigationReason::Finished,
            })
        );
    }

    #[test]
    fn test_product_version_strings() {
        let version = DroneVersion {
            software: "4.0.6".into(),
            hardware: "HW_11".into(),
        };
        let packet = events::product_version_changed(&version);
        assert_eq!(
            PacketRegistry::ardrone3().decode(&packet).unwrap(),
            Some(DroneEvent::ProductVersionChanged(version))
        );
    }

    #[test]
    fn test_custom_processor_overrides_default() {
        let mut registry = PacketRegistry::ardrone3();
        registry.register(
            CommandProcessor::new(project::COMMON, common_class::COMMON_STATE)
                .with(1, |_| Ok(Some(DroneEvent::BatteryChanged(0)))),
        );
        let packet = events::battery_state_changed(99);
        assert_eq!(
            registry.decode(&packet).unwrap(),
            Some(DroneEvent::BatteryChanged(0))
        );
    }
}
