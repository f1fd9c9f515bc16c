//! SkyFleet: schedules assignments over a drone fleet and flies them with
//! pilots that share the airspace through a control tower.

pub mod config;
pub mod drone;
pub mod error;
pub mod events;
pub mod flight;
pub mod persistence;
pub mod scheduler;
pub mod sim;
pub mod transport;

pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use scheduler::{SchedulerHandle, SchedulerRegistry, StrategyKind};
