//! Fleet scheduler: matches pending assignments with available drones and
//! supervises the resulting flights

mod actor;
pub mod handle;
pub mod registry;
pub mod strategy;

pub use handle::SchedulerHandle;
pub use registry::SchedulerRegistry;
pub use strategy::{NearestDroneStrategy, PriorityStrategy, SchedulingStrategy, StrategyKind};
