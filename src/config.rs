//! Runtime configuration
//!
//! Every section has a `Default`. `FleetConfig::from_env` overrides single
//! values from `SKYFLEET_*` variables and keeps the default when a variable
//! is missing or does not parse.

use skyfleet_shared::{safety, Location};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub scheduler: SchedulerConfig,
    pub pilot: PilotConfig,
    pub commander: CommanderConfig,
    pub sim: SimConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Relay takeoff/landing requests between pilots (shared airspace mode)
    pub link_control_tower: bool,
    /// How long a graceful stop waits for pilots to report
    pub stop_grace: Duration,
    /// At or below this battery level a flight is aborted
    pub battery_critical_percent: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            link_control_tower: true,
            stop_grace: Duration::from_secs(10),
            battery_critical_percent: safety::BATTERY_CRITICAL_PERCENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PilotConfig {
    /// Cruising altitude used when none is given, in meters
    pub default_altitude: f64,
    /// Height limit pushed to the drone before take-off, in meters
    pub max_height: f32,
    /// Battery level at which the pilot warns the scheduler
    pub battery_warning_percent: u8,
    /// How long to wait for a take-off grant before giving up the flight
    pub grant_timeout: Duration,
    /// How long a stopping pilot waits for the drone to touch down
    pub landing_timeout: Duration,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            default_altitude: 3.0,
            max_height: 10.0,
            battery_warning_percent: safety::BATTERY_WARNING_PERCENT,
            grant_timeout: Duration::from_secs(60),
            landing_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommanderConfig {
    /// Deadline for ordinary commands and property queries
    pub request_timeout: Duration,
    /// Deadline for session initialization
    pub init_timeout: Duration,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(safety::COMMAND_TIMEOUT_MS),
            init_timeout: Duration::from_millis(safety::INIT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Horizontal speed of simulated drones in m/s
    pub speed: f64,
    /// Physics step
    pub tick: Duration,
    /// Where simulated drones are parked
    pub home: Location,
    /// Battery drained per second of flight, in percent
    pub battery_drain_per_sec: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speed: 5.0,
            tick: Duration::from_millis(100),
            home: Location::new(50.8503, 4.3517, 0.0),
            battery_drain_per_sec: 0.1,
        }
    }
}

fn var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

fn var_ms(name: &str) -> Option<Duration> {
    var::<u64>(name).map(Duration::from_millis)
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            scheduler: SchedulerConfig {
                link_control_tower: var("SKYFLEET_LINK_CONTROL_TOWER")
                    .unwrap_or(d.scheduler.link_control_tower),
                stop_grace: var_ms("SKYFLEET_STOP_GRACE_MS").unwrap_or(d.scheduler.stop_grace),
                battery_critical_percent: var("SKYFLEET_BATTERY_CRITICAL")
                    .unwrap_or(d.scheduler.battery_critical_percent),
            },
            pilot: PilotConfig {
                default_altitude: var("SKYFLEET_DEFAULT_ALTITUDE")
                    .unwrap_or(d.pilot.default_altitude),
                max_height: var("SKYFLEET_MAX_HEIGHT").unwrap_or(d.pilot.max_height),
                battery_warning_percent: var("SKYFLEET_BATTERY_WARNING")
                    .unwrap_or(d.pilot.battery_warning_percent),
                grant_timeout: var_ms("SKYFLEET_GRANT_TIMEOUT_MS").unwrap_or(d.pilot.grant_timeout),
                landing_timeout: var_ms("SKYFLEET_LANDING_TIMEOUT_MS")
                    .unwrap_or(d.pilot.landing_timeout),
            },
            commander: CommanderConfig {
                request_timeout: var_ms("SKYFLEET_REQUEST_TIMEOUT_MS")
                    .unwrap_or(d.commander.request_timeout),
                init_timeout: var_ms("SKYFLEET_INIT_TIMEOUT_MS")
                    .unwrap_or(d.commander.init_timeout),
            },
            sim: SimConfig {
                speed: var("SKYFLEET_SIM_SPEED").unwrap_or(d.sim.speed),
                tick: var_ms("SKYFLEET_SIM_TICK_MS").unwrap_or(d.sim.tick),
                home: Location::new(
                    var("SKYFLEET_SIM_HOME_LAT").unwrap_or(d.sim.home.latitude),
                    var("SKYFLEET_SIM_HOME_LON").unwrap_or(d.sim.home.longitude),
                    0.0,
                ),
                battery_drain_per_sec: var("SKYFLEET_SIM_BATTERY_DRAIN")
                    .unwrap_or(d.sim.battery_drain_per_sec),
            },
        }
    }
}
