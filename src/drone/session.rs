//! Drone session task
//!
//! A session owns the byte stream to one drone. It turns requests from
//! commanders into framed packets, decodes everything the drone sends,
//! caches the latest telemetry and answers property queries from that cache.
//! A query for a value the drone has not reported yet is held until the
//! first report; the commander's deadline bounds the wait.

use super::commander::DroneCommander;
use super::property::{PropertyType, PropertyValue};
use super::video::VideoAssembler;
use crate::config::CommanderConfig;
use crate::error::{FleetError, Result};
use crate::transport::TransportStream;
use anyhow::bail;
use skyfleet_shared::codec::{buffer, CodecError, DataType, Frame, FrameDecoder, FrameEncoder};
use skyfleet_shared::handlers::PacketRegistry;
use skyfleet_shared::packet::{commands, Packet};
use skyfleet_shared::telemetry::{DroneVersion, Rotation, Speed};
use skyfleet_shared::{DroneEvent, FlyingState, Location};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Commands a session can send to its drone
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    TakeOff,
    Land,
    Emergency,
    FlatTrim,
    MoveTo(Location),
    CancelMoveTo,
    SetMaxHeight(f32),
    SetMaxTilt(f32),
    SetOutdoor(bool),
    Move3d { roll: i8, pitch: i8, yaw: i8, gaz: i8 },
    SetVideoStreaming(bool),
    TakePicture,
}

impl SessionCommand {
    fn packet(&self) -> Packet {
        match self {
            Self::TakeOff => commands::take_off(),
            Self::Land => commands::landing(),
            Self::Emergency => commands::emergency(),
            Self::FlatTrim => commands::flat_trim(),
            Self::MoveTo(l) => commands::move_to(l.latitude, l.longitude, l.altitude),
            Self::CancelMoveTo => commands::cancel_move_to(),
            Self::SetMaxHeight(m) => commands::set_max_altitude(*m),
            Self::SetMaxTilt(d) => commands::set_max_tilt(*d),
            Self::SetOutdoor(o) => commands::outdoor(*o),
            Self::Move3d {
                roll,
                pitch,
                yaw,
                gaz,
            } => commands::move_3d(true, *roll, *pitch, *yaw, *gaz),
            Self::SetVideoStreaming(e) => commands::set_video_streaming(*e),
            Self::TakePicture => commands::take_picture(),
        }
    }

    /// Frame type and buffer the command travels on
    fn channel(&self) -> (DataType, u8) {
        match self {
            Self::Emergency => (DataType::DataWithAck, buffer::C2D_EMERGENCY),
            Self::Move3d { .. } => (DataType::Data, buffer::C2D_NON_ACK),
            _ => (DataType::DataWithAck, buffer::C2D_ACK),
        }
    }
}

/// Requests accepted by a session
#[derive(Debug)]
pub enum SessionRequest {
    /// One-time handshake; resolves once the drone reported all its states
    Init { reply: oneshot::Sender<Result<()>> },
    Command {
        command: SessionCommand,
        reply: oneshot::Sender<Result<()>>,
    },
    Property {
        property: PropertyType,
        reply: oneshot::Sender<Result<PropertyValue>>,
    },
}

enum InitState {
    Idle,
    Pending(oneshot::Sender<Result<()>>),
    Done,
}

/// Latest reported values
#[derive(Debug, Default)]
struct Telemetry {
    flying_state: Option<FlyingState>,
    location: Option<Location>,
    battery: Option<u8>,
    altitude: Option<f64>,
    rotation: Option<Rotation>,
    speed: Option<Speed>,
    version: Option<DroneVersion>,
}

impl Telemetry {
    fn apply(&mut self, event: &DroneEvent) {
        match event {
            DroneEvent::FlyingStateChanged(s) => self.flying_state = Some(*s),
            DroneEvent::PositionChanged(l) => self.location = Some(*l),
            DroneEvent::BatteryChanged(b) => self.battery = Some(*b),
            DroneEvent::AltitudeChanged(a) => self.altitude = Some(*a),
            DroneEvent::AttitudeChanged(r) => self.rotation = Some(*r),
            DroneEvent::SpeedChanged(s) => self.speed = Some(*s),
            DroneEvent::ProductVersionChanged(v) => self.version = Some(v.clone()),
            _ => {}
        }
    }
}

/// Property queries held until the drone reports the value
#[derive(Default)]
struct Waiters(Vec<(PropertyType, oneshot::Sender<Result<PropertyValue>>)>);

impl Waiters {
    /// Hold a query. Queries whose caller already timed out are dropped.
    fn park(&mut self, property: PropertyType, reply: oneshot::Sender<Result<PropertyValue>>) {
        self.0.retain(|(_, tx)| !tx.is_closed());
        self.0.push((property, reply));
    }

    fn properties(&self) -> Vec<PropertyType> {
        let mut properties: Vec<PropertyType> = self.0.iter().map(|(p, _)| *p).collect();
        properties.dedup();
        properties
    }

    /// Remove and return every query for `property`
    fn take(&mut self, property: PropertyType) -> Vec<oneshot::Sender<Result<PropertyValue>>> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.0)
            .into_iter()
            .partition(|(p, _)| *p == property);
        self.0 = waiting;
        ready.into_iter().map(|(_, tx)| tx).collect()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

pub struct DroneSession {
    name: String,
    requests: mpsc::Receiver<SessionRequest>,
    events: broadcast::Sender<DroneEvent>,
    registry: PacketRegistry,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    telemetry: Telemetry,
    video: VideoAssembler,
    init: InitState,
    waiters: Waiters,
    /// Replies released once the encoded commands hit the wire
    unflushed: Vec<oneshot::Sender<Result<()>>>,
}

impl DroneSession {
    /// Start a session over `stream` and return a commander for it
    pub fn spawn<S: TransportStream>(
        name: impl Into<String>,
        stream: S,
        config: CommanderConfig,
    ) -> DroneCommander {
        let (request_tx, requests) = mpsc::channel(64);
        let (events, _) = broadcast::channel(256);
        let session = DroneSession {
            name: name.into(),
            requests,
            events: events.clone(),
            registry: PacketRegistry::ardrone3(),
            decoder: FrameDecoder::new(),
            encoder: FrameEncoder::new(),
            telemetry: Telemetry::default(),
            video: VideoAssembler::new(),
            init: InitState::Idle,
            waiters: Waiters::default(),
            unflushed: Vec::new(),
        };
        tokio::spawn(async move {
            let name = session.name.clone();
            match session.run(stream).await {
                Ok(()) => info!("[SESSION] {}: closed", name),
                Err(e) => warn!("[SESSION] {}: terminated: {:#}", name, e),
            }
        });
        DroneCommander::new(request_tx, events, config)
    }

    async fn run<S: TransportStream>(mut self, stream: S) -> anyhow::Result<()> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut read_buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    match request {
                        Some(request) => self.handle_request(request)?,
                        None => break,
                    }
                }

                result = reader.read(&mut read_buf) => {
                    let n = result?;
                    if n == 0 {
                        bail!("drone closed the connection");
                    }
                    self.decoder.extend(&read_buf[..n]);
                    self.drain_frames()?;
                }
            }

            if !self.encoder.is_empty() {
                let bytes = self.encoder.take();
                if let Err(e) = writer.write_all(&bytes).await {
                    for reply in self.unflushed.drain(..) {
                        let _ = reply.send(Err(FleetError::transport(&e)));
                    }
                    return Err(e.into());
                }
            }
            for reply in self.unflushed.drain(..) {
                let _ = reply.send(Ok(()));
            }
        }

        let _ = writer.shutdown().await;
        Ok(())
    }

    fn handle_request(&mut self, request: SessionRequest) -> std::result::Result<(), CodecError> {
        match request {
            SessionRequest::Init { reply } => match self.init {
                InitState::Idle => {
                    info!("[SESSION] {}: requesting settings and states", self.name);
                    for packet in [commands::request_all_settings(), commands::request_status()] {
                        self.send_packet(&packet, DataType::DataWithAck, buffer::C2D_ACK)?;
                    }
                    self.init = InitState::Pending(reply);
                }
                InitState::Pending(_) | InitState::Done => {
                    let _ = reply.send(Err(FleetError::AlreadyInitialized));
                }
            },
            SessionRequest::Command { command, reply } => {
                debug!("[SESSION] {}: {:?}", self.name, command);
                let (data_type, buffer_id) = command.channel();
                self.send_packet(&command.packet(), data_type, buffer_id)?;
                self.unflushed.push(reply);
            }
            SessionRequest::Property { property, reply } => match self.lookup(property) {
                Some(value) => {
                    let _ = reply.send(Ok(value));
                }
                None => self.waiters.park(property, reply),
            },
        }
        Ok(())
    }

    fn send_packet(
        &mut self,
        packet: &Packet,
        data_type: DataType,
        buffer_id: u8,
    ) -> std::result::Result<(), CodecError> {
        self.encoder.encode(data_type, buffer_id, &packet.encode())?;
        Ok(())
    }

    fn drain_frames(&mut self) -> std::result::Result<(), CodecError> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(frame)) => self.handle_frame(frame)?,
                Ok(None) => return Ok(()),
                Err(CodecError::UnknownDataType(t)) => {
                    warn!("[SESSION] {}: skipping frame of unknown type {}", self.name, t);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> std::result::Result<(), CodecError> {
        if frame.data_type == DataType::Ack {
            // Commands are not retransmitted, acks are informational
            debug!("[SESSION] {}: ack on buffer {}", self.name, frame.buffer_id);
            return Ok(());
        }
        if frame.data_type == DataType::DataWithAck {
            self.encoder.encode_ack(&frame)?;
        }

        match frame.buffer_id {
            buffer::PING => {
                self.encoder.encode(DataType::Data, buffer::PONG, &frame.payload)?;
            }
            buffer::D2C_VIDEO => match self.video.push(frame.payload) {
                Ok(Some(image)) => self.resolve(PropertyType::Image, PropertyValue::Image(image)),
                Ok(None) => {}
                Err(e) => debug!("[SESSION] {}: bad video fragment: {}", self.name, e),
            },
            _ => {
                let decoded = Packet::decode(frame.payload).and_then(|p| self.registry.decode(&p));
                match decoded {
                    Ok(Some(event)) => self.handle_event(event),
                    Ok(None) => {}
                    Err(e) => warn!("[SESSION] {}: undecodable packet: {}", self.name, e),
                }
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: DroneEvent) {
        self.telemetry.apply(&event);

        match &event {
            DroneEvent::AllStatesChanged => {
                if matches!(self.init, InitState::Pending(_)) {
                    let previous = std::mem::replace(&mut self.init, InitState::Done);
                    if let InitState::Pending(reply) = previous {
                        info!("[SESSION] {}: initialized", self.name);
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            DroneEvent::CalibrationStateChanged {
                calibration_required: true,
            } => warn!("[SESSION] {}: magnetometer calibration required", self.name),
            _ => {}
        }

        for property in self.waiters.properties() {
            if let Some(value) = self.lookup(property) {
                self.resolve(property, value);
            }
        }

        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn lookup(&self, property: PropertyType) -> Option<PropertyValue> {
        let t = &self.telemetry;
        match property {
            PropertyType::FlyingState => t.flying_state.map(PropertyValue::FlyingState),
            PropertyType::Location => t.location.map(PropertyValue::Location),
            PropertyType::Battery => t.battery.map(PropertyValue::Battery),
            PropertyType::Altitude => t.altitude.map(PropertyValue::Altitude),
            PropertyType::Rotation => t.rotation.map(PropertyValue::Rotation),
            PropertyType::Speed => t.speed.map(PropertyValue::Speed),
            PropertyType::Version => t.version.clone().map(PropertyValue::Version),
            PropertyType::Image => self.video.last_frame().cloned().map(PropertyValue::Image),
        }
    }

    /// Answer every waiter for `property`
    fn resolve(&mut self, property: PropertyType, value: PropertyValue) {
        for reply in self.waiters.take(property) {
            let _ = reply.send(Ok(value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abandoned_queries_are_dropped_when_parking() {
        let mut waiters = Waiters::default();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            waiters.park(PropertyType::Location, tx);
            drop(rx);
        }
        let (tx, mut rx) = oneshot::channel();
        waiters.park(PropertyType::Battery, tx);
        assert_eq!(waiters.len(), 1);
        assert_eq!(waiters.properties(), vec![PropertyType::Battery]);

        for reply in waiters.take(PropertyType::Battery) {
            let _ = reply.send(Ok(PropertyValue::Battery(80)));
        }
        assert_eq!(waiters.len(), 0);
        assert!(matches!(rx.try_recv(), Ok(Ok(PropertyValue::Battery(80)))));
    }
}
