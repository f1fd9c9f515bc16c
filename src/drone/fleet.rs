//! Fleet: one initialized commander per drone, opened through a driver
//! chosen by drone type

use super::commander::DroneCommander;
use super::session::DroneSession;
use crate::config::CommanderConfig;
use crate::error::{FleetError, Result};
use crate::transport::{TcpConnector, TransportConnector};
use async_trait::async_trait;
use skyfleet_shared::{Drone, DroneId, DroneType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Knows how to open a session to some drone types
#[async_trait]
pub trait DroneDriver: Send + Sync {
    fn supported_types(&self) -> Vec<DroneType>;

    /// Open a session; the caller initializes it
    async fn connect(&self, drone: &Drone, config: CommanderConfig) -> Result<DroneCommander>;
}

/// Parrot Bebop reachable over the network
pub struct BebopDriver<C = TcpConnector> {
    connector: C,
}

impl<C: TransportConnector> BebopDriver<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

impl Default for BebopDriver {
    fn default() -> Self {
        Self::new(TcpConnector::default())
    }
}

#[async_trait]
impl<C: TransportConnector> DroneDriver for BebopDriver<C> {
    fn supported_types(&self) -> Vec<DroneType> {
        vec![DroneType::bebop()]
    }

    async fn connect(&self, drone: &Drone, config: CommanderConfig) -> Result<DroneCommander> {
        let stream = self
            .connector
            .connect(&drone.address)
            .await
            .map_err(|e| FleetError::transport(format!("{}: {:#}", self.connector.name(), e)))?;
        Ok(DroneSession::spawn(&drone.name, stream, config))
    }
}

pub struct Fleet {
    drivers: HashMap<DroneType, Arc<dyn DroneDriver>>,
    commanders: Mutex<HashMap<DroneId, DroneCommander>>,
    config: CommanderConfig,
}

impl Fleet {
    pub fn new(config: CommanderConfig) -> Self {
        Self {
            drivers: HashMap::new(),
            commanders: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Register a driver for every type it supports
    pub fn with_driver(mut self, driver: Arc<dyn DroneDriver>) -> Self {
        for drone_type in driver.supported_types() {
            self.drivers.insert(drone_type, driver.clone());
        }
        self
    }

    pub fn supports(&self, drone_type: &DroneType) -> bool {
        self.drivers.contains_key(drone_type)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<DroneId, DroneCommander>> {
        // A panic while holding the guard leaves the map itself intact
        self.commanders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Commander that is already open, if any
    pub fn cached(&self, drone_id: DroneId) -> Option<DroneCommander> {
        self.cache()
            .get(&drone_id)
            .filter(|c| !c.is_closed())
            .cloned()
    }

    /// Commander for a drone, connecting and initializing it on first use
    pub async fn commander(&self, drone: &Drone) -> Result<DroneCommander> {
        if let Some(commander) = self.cached(drone.id) {
            return Ok(commander);
        }
        let driver = self
            .drivers
            .get(&drone.drone_type)
            .ok_or_else(|| FleetError::UnsupportedDroneType(drone.drone_type.to_string()))?;

        info!(
            "[FLEET] connecting to drone {} ({}) at {}",
            drone.id, drone.drone_type, drone.address
        );
        let commander = driver.connect(drone, self.config.clone()).await?;
        commander.init().await?;

        self.cache().insert(drone.id, commander.clone());
        Ok(commander)
    }

    /// Drop a commander after a transport failure so the next use reconnects
    pub fn forget(&self, drone_id: DroneId) {
        if self.cache().remove(&drone_id).is_some() {
            warn!("[FLEET] dropped session of drone {}", drone_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfleet_shared::DroneStatus;

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let fleet = Fleet::new(CommanderConfig::default()).with_driver(Arc::new(BebopDriver::default()));
        let drone = Drone::new(
            "mystery",
            DroneStatus::Available,
            DroneType::new("Acme", "X1"),
            "10.0.0.1:1",
        );
        assert!(fleet.supports(&DroneType::bebop()));
        assert_eq!(
            fleet.commander(&drone).await.unwrap_err(),
            FleetError::UnsupportedDroneType("Acme/X1".into())
        );
    }

    #[tokio::test]
    async fn test_unreachable_bebop_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let fleet = Fleet::new(CommanderConfig::default()).with_driver(Arc::new(BebopDriver::default()));
        let drone = Drone::new("bebop", DroneStatus::Available, DroneType::bebop(), address);
        assert!(matches!(
            fleet.commander(&drone).await,
            Err(FleetError::Transport(_))
        ));
        assert!(fleet.cached(drone.id).is_none());
    }

    /// Collects formatted log lines
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connection_logs_carry_fleet_tag() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let fleet = Fleet::new(CommanderConfig::default()).with_driver(Arc::new(BebopDriver::default()));
        let drone = Drone::new("bebop", DroneStatus::Available, DroneType::bebop(), address);
        assert!(fleet.commander(&drone).await.is_err());

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("[FLEET] connecting to drone"), "{}", logs);
    }
}
