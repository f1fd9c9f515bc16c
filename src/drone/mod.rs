//! Drone sessions and the command facade over them

pub mod commander;
pub mod fleet;
pub mod property;
pub mod session;
pub mod video;

pub use commander::DroneCommander;
pub use fleet::{BebopDriver, DroneDriver, Fleet};
pub use property::{PropertyType, PropertyValue};
pub use session::{DroneSession, SessionCommand, SessionRequest};
