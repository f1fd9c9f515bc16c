//! Flight coordination: pilots and the control tower relaying between them

pub mod control_tower;
pub mod messages;
pub mod pilot;

pub use control_tower::ControlTower;
pub use messages::{FlightControlMessage, LocationMessage, PilotMessage, PilotReport, RequestType};
pub use pilot::{FlightPhase, Pilot, PilotHandle};
