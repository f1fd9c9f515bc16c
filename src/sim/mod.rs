//! In-process drone simulation

pub mod driver;
pub mod firmware;

pub use driver::SimulatorDriver;
pub use firmware::SimulatedDrone;
