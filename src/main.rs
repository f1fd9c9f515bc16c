use skyfleet::config::FleetConfig;
use skyfleet::drone::{BebopDriver, Fleet};
use skyfleet::events::{SchedulerEventKind, Subscriber};
use skyfleet::persistence::{InMemoryRepository, Repository};
use skyfleet::sim::{driver, SimulatorDriver};
use skyfleet::{SchedulerRegistry, StrategyKind};
use skyfleet_shared::{Assignment, Checkpoint, Drone, DroneStatus, DroneType, Location};
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Simulated drones parked around the configured home
const DEMO_DRONES: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = FleetConfig::from_env();
    info!("SkyFleet starting");
    info!("  control tower: {}", config.scheduler.link_control_tower);
    info!("  cruising altitude: {} m", config.pilot.default_altitude);

    let repo = Arc::new(InMemoryRepository::new());
    let home = config.sim.home;
    let mut drone_ids = Vec::new();
    for i in 0..DEMO_DRONES {
        // About 15 m apart on a west-east line
        let parked = Location::new(home.latitude, home.longitude + 0.0002 * i as f64, 0.0);
        let drone = repo
            .insert_drone(Drone::new(
                format!("sim-{}", i + 1),
                DroneStatus::Available,
                DroneType::simulator(),
                driver::address(&parked),
            ))
            .await?;
        drone_ids.push(drone.id);
    }

    let route = vec![
        Checkpoint::new(50.85, 4.35, 10.0),
        Checkpoint::new(home.latitude, home.longitude, 10.0),
    ];
    let demo = repo
        .insert_assignment(Assignment::new(route, "demo").with_priority(1))
        .await?;
    info!("Seeded {} drones and assignment {}", drone_ids.len(), demo.id);

    let fleet = Arc::new(
        Fleet::new(config.commander.clone())
            .with_driver(Arc::new(SimulatorDriver::new(config.sim.clone())))
            .with_driver(Arc::new(BebopDriver::default())),
    );
    let registry = SchedulerRegistry::new(repo, fleet, config);
    let scheduler = registry.start(StrategyKind::Nearest)?;

    let (subscriber, mut events) = Subscriber::channel();
    for kind in SchedulerEventKind::ALL {
        scheduler.subscribe(kind, subscriber.clone())?;
    }
    // The stream closes once the scheduler is gone
    drop(subscriber);
    for id in drone_ids {
        scheduler.add_drone(id)?;
    }
    scheduler.schedule()?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => info!("Event: {:?}", event),
                None => {
                    warn!("Scheduler event stream closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    match registry.stop() {
        Ok(task) => task.await?,
        Err(e) => warn!("Stop: {}", e),
    }
    while let Ok(event) = events.try_recv() {
        info!("Event: {:?}", event);
    }
    Ok(())
}
