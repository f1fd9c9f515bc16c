//! Lifecycle of the one scheduler instance

use super::actor::Scheduler;
use super::handle::SchedulerHandle;
use super::strategy::{SchedulingStrategy, StrategyKind};
use crate::config::FleetConfig;
use crate::drone::Fleet;
use crate::error::{FleetError, Result};
use crate::persistence::Repository;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::info;

struct Running {
    handle: SchedulerHandle,
    /// Handed out by `stop`; the slot stays taken until the task ends
    task: Option<JoinHandle<()>>,
    watch: AbortHandle,
}

impl Running {
    fn is_alive(&self) -> bool {
        !self.watch.is_finished()
    }

    fn is_stopping(&self) -> bool {
        self.task.is_none()
    }
}

/// Starts, stops and hands out the running scheduler. At most one runs at a
/// time, and a stopping scheduler counts as running until it has landed its
/// flights.
pub struct SchedulerRegistry {
    repo: Arc<dyn Repository>,
    fleet: Arc<Fleet>,
    config: FleetConfig,
    slot: Mutex<Option<Running>>,
}

impl SchedulerRegistry {
    pub fn new(repo: Arc<dyn Repository>, fleet: Arc<Fleet>, config: FleetConfig) -> Self {
        Self {
            repo,
            fleet,
            config,
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Running>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self, kind: StrategyKind) -> Result<SchedulerHandle> {
        self.start_with_strategy(kind.build(self.fleet.clone()))
    }

    /// Start with a custom drone selection strategy
    pub fn start_with_strategy(
        &self,
        strategy: Arc<dyn SchedulingStrategy>,
    ) -> Result<SchedulerHandle> {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(Running::is_alive) {
            return Err(FleetError::AlreadyStarted);
        }
        let (handle, task) = Scheduler::spawn(
            self.repo.clone(),
            self.fleet.clone(),
            strategy,
            &self.config,
        );
        *slot = Some(Running {
            handle: handle.clone(),
            watch: task.abort_handle(),
            task: Some(task),
        });
        Ok(handle)
    }

    /// Ask the scheduler to land every flight and terminate. Await the
    /// returned handle to wait for it; a new scheduler can only be started
    /// once it has ended.
    pub fn stop(&self) -> Result<JoinHandle<()>> {
        let mut slot = self.slot();
        let running = slot
            .as_mut()
            .filter(|r| r.is_alive())
            .ok_or(FleetError::NotStarted)?;
        let task = running.task.take().ok_or(FleetError::NotStarted)?;
        info!("[SCHEDULER] stop requested");
        // A scheduler that went away on its own is simply joined
        let _ = running.handle.stop();
        Ok(task)
    }

    pub fn scheduler(&self) -> Result<SchedulerHandle> {
        self.slot()
            .as_ref()
            .filter(|r| r.is_alive() && !r.is_stopping())
            .map(|r| r.handle.clone())
            .ok_or(FleetError::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommanderConfig;
    use crate::events::{SchedulerEvent, SchedulerEventKind, Subscriber};
    use crate::persistence::InMemoryRepository;
    use std::time::Duration;

    fn registry() -> SchedulerRegistry {
        SchedulerRegistry::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(Fleet::new(CommanderConfig::default())),
            FleetConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_not_started_until_started() {
        let registry = registry();
        assert!(matches!(registry.scheduler(), Err(FleetError::NotStarted)));
        assert!(matches!(registry.stop(), Err(FleetError::NotStarted)));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let registry = registry();
        registry.start(StrategyKind::Priority).unwrap();
        assert!(matches!(
            registry.start(StrategyKind::Nearest),
            Err(FleetError::AlreadyStarted)
        ));
        assert!(registry.scheduler().is_ok());
    }

    #[tokio::test]
    async fn test_stop_terminates_and_allows_restart() {
        let registry = registry();
        let handle = registry.start(StrategyKind::Priority).unwrap();
        let (subscriber, mut events) = Subscriber::channel();
        handle
            .subscribe(SchedulerEventKind::SchedulerStopped, subscriber)
            .unwrap();

        let task = registry.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events.recv().await, Some(SchedulerEvent::SchedulerStopped));

        assert!(matches!(registry.scheduler(), Err(FleetError::NotStarted)));
        assert_eq!(handle.schedule(), Err(FleetError::NotStarted));
        assert!(registry.start(StrategyKind::Priority).is_ok());
    }

    #[tokio::test]
    async fn test_restart_waits_for_stopping_scheduler() {
        let registry = registry();
        registry.start(StrategyKind::Priority).unwrap();

        let task = registry.stop().unwrap();
        assert!(matches!(registry.scheduler(), Err(FleetError::NotStarted)));
        assert!(matches!(registry.stop(), Err(FleetError::NotStarted)));
        assert!(matches!(
            registry.start(StrategyKind::Priority),
            Err(FleetError::AlreadyStarted)
        ));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.start(StrategyKind::Priority).is_ok());
    }
}
