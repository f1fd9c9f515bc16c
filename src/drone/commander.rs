//! Asynchronous command facade for one drone
//!
//! Every call is an ask: a request goes to the session task and the reply
//! comes back on a oneshot channel, bounded by a deadline. Callers see a
//! typed value, `FleetError::Timeout` or `FleetError::Transport`.

use super::property::{PropertyType, PropertyValue};
use super::session::{SessionCommand, SessionRequest};
use crate::config::CommanderConfig;
use crate::error::{FleetError, Result};
use bytes::Bytes;
use skyfleet_shared::telemetry::{DroneVersion, Rotation, Speed};
use skyfleet_shared::{DroneEvent, FlyingState, Location};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct DroneCommander {
    requests: mpsc::Sender<SessionRequest>,
    events: broadcast::Sender<DroneEvent>,
    config: CommanderConfig,
}

impl DroneCommander {
    /// Commander over an already running session
    pub fn new(
        requests: mpsc::Sender<SessionRequest>,
        events: broadcast::Sender<DroneEvent>,
        config: CommanderConfig,
    ) -> Self {
        Self {
            requests,
            events,
            config,
        }
    }

    /// True once the session task is gone
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Telemetry events as the drone reports them
    pub fn subscribe(&self) -> broadcast::Receiver<DroneEvent> {
        self.events.subscribe()
    }

    async fn ask<T>(
        &self,
        operation: &'static str,
        deadline: Duration,
        request: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionRequest,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let exchange = async {
            self.requests
                .send(request(tx))
                .await
                .map_err(|_| FleetError::transport("drone session is closed"))?;
            rx.await
                .map_err(|_| FleetError::transport("drone session dropped the request"))?
        };
        timeout(deadline, exchange)
            .await
            .map_err(|_| FleetError::timeout(operation, deadline))?
    }

    async fn command(&self, operation: &'static str, command: SessionCommand) -> Result<()> {
        self.ask(operation, self.config.request_timeout, |reply| {
            SessionRequest::Command { command, reply }
        })
        .await
    }

    /// Query one property and convert it to its typed value
    pub async fn property<T>(&self, property: PropertyType) -> Result<T>
    where
        T: TryFrom<PropertyValue, Error = FleetError>,
    {
        let value = self
            .ask(property.name(), self.config.request_timeout, |reply| {
                SessionRequest::Property { property, reply }
            })
            .await?;
        T::try_from(value)
    }

    /// One-time handshake with the drone
    pub async fn init(&self) -> Result<()> {
        self.ask("init", self.config.init_timeout, |reply| SessionRequest::Init { reply })
            .await
    }

    pub async fn take_off(&self) -> Result<()> {
        self.command("take off", SessionCommand::TakeOff).await
    }

    pub async fn land(&self) -> Result<()> {
        self.command("land", SessionCommand::Land).await
    }

    pub async fn emergency(&self) -> Result<()> {
        self.command("emergency", SessionCommand::Emergency).await
    }

    pub async fn flat_trim(&self) -> Result<()> {
        self.command("flat trim", SessionCommand::FlatTrim).await
    }

    /// Fly autonomously to a position
    pub async fn move_to(&self, latitude: f64, longitude: f64, altitude: f64) -> Result<()> {
        let target = Location::new(latitude, longitude, altitude);
        self.command("move to", SessionCommand::MoveTo(target)).await
    }

    pub async fn cancel_move_to(&self) -> Result<()> {
        self.command("cancel move to", SessionCommand::CancelMoveTo).await
    }

    pub async fn set_max_height(&self, meters: f32) -> Result<()> {
        self.command("set max height", SessionCommand::SetMaxHeight(meters))
            .await
    }

    pub async fn set_max_tilt(&self, degrees: f32) -> Result<()> {
        self.command("set max tilt", SessionCommand::SetMaxTilt(degrees))
            .await
    }

    pub async fn set_outdoor(&self, outdoor: bool) -> Result<()> {
        self.command("set outdoor", SessionCommand::SetOutdoor(outdoor))
            .await
    }

    /// Manual piloting; percentages in [-100, 100]
    pub async fn move_3d(&self, roll: i8, pitch: i8, yaw: i8, gaz: i8) -> Result<()> {
        self.command(
            "move 3d",
            SessionCommand::Move3d {
                roll,
                pitch,
                yaw,
                gaz,
            },
        )
        .await
    }

    pub async fn set_video_streaming(&self, enabled: bool) -> Result<()> {
        self.command("set video streaming", SessionCommand::SetVideoStreaming(enabled))
            .await
    }

    pub async fn take_picture(&self) -> Result<()> {
        self.command("take picture", SessionCommand::TakePicture).await
    }

    pub async fn flying_state(&self) -> Result<FlyingState> {
        self.property(PropertyType::FlyingState).await
    }

    pub async fn location(&self) -> Result<Location> {
        self.property(PropertyType::Location).await
    }

    pub async fn battery_percentage(&self) -> Result<u8> {
        self.property(PropertyType::Battery).await
    }

    pub async fn altitude(&self) -> Result<f64> {
        self.property(PropertyType::Altitude).await
    }

    pub async fn rotation(&self) -> Result<Rotation> {
        self.property(PropertyType::Rotation).await
    }

    pub async fn speed(&self) -> Result<Speed> {
        self.property(PropertyType::Speed).await
    }

    pub async fn version(&self) -> Result<DroneVersion> {
        self.property(PropertyType::Version).await
    }

    /// Last complete video frame
    pub async fn image(&self) -> Result<Bytes> {
        self.property(PropertyType::Image).await
    }
}
