//! Periodic task reconciliation against the resource manager.

use crate::error::Result;
use crate::facade::FacadeService;
use jobmesh_mesos::{SchedulerDriver, TaskState, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            enabled: true,
        }
    }
}

/// Asks the master to resend task states so missed updates get applied
pub struct ReconcileService {
    facade: Arc<FacadeService>,
    driver: Arc<dyn SchedulerDriver>,
    lock: Mutex<()>,
    config: ReconcileConfig,
}

impl ReconcileService {
    pub fn new(
        facade: Arc<FacadeService>,
        driver: Arc<dyn SchedulerDriver>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            facade,
            driver,
            lock: Mutex::new(()),
            config,
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        if !self.config.enabled {
            info!("Reconciliation disabled");
            return;
        }
        info!("Starting reconciliation loop (interval {:?})", self.config.interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Reconciliation loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    let _guard = self.lock.lock().await;
                    if let Err(e) = self.explicit_locked().await {
                        error!("Explicit reconciliation failed: {}", e);
                    }
                    if let Err(e) = self.implicit_locked().await {
                        error!("Implicit reconciliation failed: {}", e);
                    }
                }
            }
        }
    }

    /// Reconcile every task the scheduler believes is running
    pub async fn explicit_reconcile(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.explicit_locked().await
    }

    /// Ask for the state of every task the master knows about
    pub async fn implicit_reconcile(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.implicit_locked().await
    }

    async fn explicit_locked(&self) -> Result<()> {
        let statuses: Vec<TaskStatus> = self
            .facade
            .get_all_running_tasks()
            .into_values()
            .flatten()
            .map(|context| {
                TaskStatus::new(context.id(), TaskState::TaskRunning)
                    .with_agent_id(context.agent_id())
            })
            .collect();

        if statuses.is_empty() {
            debug!("No running tasks to reconcile");
            return Ok(());
        }
        info!("Reconciling {} running tasks", statuses.len());
        self.driver.reconcile_tasks(statuses).await?;
        Ok(())
    }

    async fn implicit_locked(&self) -> Result<()> {
        debug!("Requesting implicit reconciliation");
        self.driver.reconcile_tasks(Vec::new()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::facade;
    use jobmesh_core::{ExecutionType, TaskContext};
    use jobmesh_mesos::RecordingDriver;

    fn service() -> (Arc<FacadeService>, Arc<RecordingDriver>, ReconcileService) {
        let facade = facade();
        let driver = Arc::new(RecordingDriver::new());
        let service = ReconcileService::new(facade.clone(), driver.clone(), ReconcileConfig::default());
        (facade, driver, service)
    }

    #[tokio::test]
    async fn test_explicit_without_running_tasks_makes_no_call() {
        let (_facade, driver, service) = service();
        service.explicit_reconcile().await.unwrap();
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_lists_running_tasks() {
        let (facade, driver, service) = service();
        for item in 0..2 {
            facade
                .add_running(
                    &TaskContext::new("test_job", vec![item], ExecutionType::Ready).with_agent_id("S0"),
                )
                .unwrap();
        }

        service.explicit_reconcile().await.unwrap();

        let calls = driver.reconcile_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        for status in &calls[0] {
            assert_eq!(status.state, TaskState::TaskRunning);
            assert_eq!(status.agent_id.as_ref().unwrap().as_str(), "S0");
        }
    }

    #[tokio::test]
    async fn test_implicit_sends_empty_list() {
        let (_facade, driver, service) = service();
        service.implicit_reconcile().await.unwrap();
        assert_eq!(driver.reconcile_calls(), vec![Vec::<TaskStatus>::new()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_runs_both() {
        let (_facade, driver, service) = service();
        let service = Arc::new(service);
        let token = CancellationToken::new();

        let handle = tokio::spawn({
            let service = service.clone();
            let token = token.clone();
            async move { service.run(token).await }
        });

        tokio::time::sleep(Duration::from_secs(601)).await;
        token.cancel();
        handle.await.unwrap();

        // Nothing running, so only the implicit call
        assert_eq!(driver.reconcile_calls().len(), 1);
    }
}
