//! Driver that backs a drone with simulated firmware instead of a network link

use super::firmware::SimulatedDrone;
use crate::config::{CommanderConfig, SimConfig};
use crate::drone::{DroneCommander, DroneDriver, DroneSession};
use crate::error::Result;
use async_trait::async_trait;
use skyfleet_shared::{Drone, DroneType, Location};
use tracing::debug;

/// Address prefix of simulated drones: `sim:<latitude>,<longitude>`
pub const SIM_ADDRESS_PREFIX: &str = "sim:";

pub struct SimulatorDriver {
    config: SimConfig,
}

impl SimulatorDriver {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Where a drone starts; the configured home unless its address says otherwise
    pub fn home_of(&self, address: &str) -> Location {
        parse_address(address).unwrap_or(self.config.home)
    }
}

/// Address for a simulated drone parked at `location`
pub fn address(location: &Location) -> String {
    format!("{}{},{}", SIM_ADDRESS_PREFIX, location.latitude, location.longitude)
}

fn parse_address(address: &str) -> Option<Location> {
    let (lat, lon) = address.strip_prefix(SIM_ADDRESS_PREFIX)?.split_once(',')?;
    Some(Location::new(
        lat.trim().parse().ok()?,
        lon.trim().parse().ok()?,
        0.0,
    ))
}

#[async_trait]
impl DroneDriver for SimulatorDriver {
    fn supported_types(&self) -> Vec<DroneType> {
        vec![DroneType::simulator()]
    }

    async fn connect(&self, drone: &Drone, config: CommanderConfig) -> Result<DroneCommander> {
        let home = self.home_of(&drone.address);
        debug!("[SIM] starting firmware for {} at {:?}", drone.name, home);
        let link = SimulatedDrone::new(&drone.name, home, self.config.clone()).spawn();
        Ok(DroneSession::spawn(&drone.name, link, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip_and_fallback() {
        let driver = SimulatorDriver::new(SimConfig::default());
        let spot = Location::new(50.5, 4.25, 0.0);
        assert_eq!(driver.home_of(&address(&spot)), spot);
        assert_eq!(driver.home_of("sim:"), SimConfig::default().home);
        assert_eq!(driver.home_of("192.168.42.1:44444"), SimConfig::default().home);
    }
}
