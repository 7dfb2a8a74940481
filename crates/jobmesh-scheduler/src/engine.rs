//! Applies resource-manager events to scheduler state.

use crate::error::Result;
use crate::event_bus::TraceEventBus;
use crate::facade::FacadeService;
use crate::offer_buffer::OfferBuffer;
use crate::solver::TaskAssigner;
use crate::statistics::TaskStatistics;
use jobmesh_core::{JobStatusTraceEvent, TaskContext};
use jobmesh_mesos::{ClusterState, SchedulerDriver, SchedulerEvent, TaskState, TaskStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Daemon executors report the start of a run with this message
const DAEMON_BEGIN: &str = "BEGIN";
/// and its end with this one
const DAEMON_COMPLETE: &str = "COMPLETE";

/// Scheduler callback handler
pub struct SchedulerEngine {
    facade: Arc<FacadeService>,
    offers: Arc<OfferBuffer>,
    assigner: Arc<dyn TaskAssigner>,
    driver: Arc<dyn SchedulerDriver>,
    cluster_state: Arc<dyn ClusterState>,
    events: TraceEventBus,
    statistics: Arc<TaskStatistics>,
}

impl SchedulerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        facade: Arc<FacadeService>,
        offers: Arc<OfferBuffer>,
        assigner: Arc<dyn TaskAssigner>,
        driver: Arc<dyn SchedulerDriver>,
        cluster_state: Arc<dyn ClusterState>,
        events: TraceEventBus,
        statistics: Arc<TaskStatistics>,
    ) -> Self {
        Self {
            facade,
            offers,
            assigner,
            driver,
            cluster_state,
            events,
            statistics,
        }
    }

    pub fn statistics(&self) -> &Arc<TaskStatistics> {
        &self.statistics
    }

    /// Apply events until the channel closes or the token is cancelled
    pub async fn run(&self, mut rx: mpsc::Receiver<SchedulerEvent>, token: CancellationToken) {
        info!("Starting scheduler engine");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler engine shutting down");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        info!("Event channel closed, stopping scheduler engine");
                        break;
                    };
                    if let Err(e) = self.handle(event).await {
                        error!("Failed to handle scheduler event: {}", e);
                    }
                }
            }
        }
    }

    /// Apply one event
    pub async fn handle(&self, event: SchedulerEvent) -> Result<()> {
        match event {
            SchedulerEvent::Subscribed {
                framework_id,
                master,
            } => {
                info!(framework_id = %framework_id, master = ?master, "Subscribed");
                self.facade
                    .registry()
                    .save_framework_id(framework_id.as_str())?;
                self.assigner.expire_all_leases();
                self.offers.clear();
                self.cluster_state
                    .on_subscribed(framework_id.as_str(), master.as_deref());
            }
            SchedulerEvent::Offers(offers) => {
                debug!("Received {} offers", offers.len());
                self.offers.extend(offers);
            }
            SchedulerEvent::Rescind(offer_id) => {
                debug!(offer_id = %offer_id, "Offer rescinded");
                self.assigner.expire_lease(&offer_id);
                self.offers.remove(&offer_id);
            }
            SchedulerEvent::Update(status) => self.status_update(status).await?,
            SchedulerEvent::AgentLost(agent_id) => {
                warn!(agent_id = %agent_id, "Agent lost");
                self.assigner.expire_leases_by_agent(&agent_id);
                let dropped = self.offers.remove_by_agent(&agent_id);
                if dropped > 0 {
                    debug!(agent_id = %agent_id, "Dropped {} buffered offers", dropped);
                }
            }
            SchedulerEvent::ExecutorLost {
                executor_id,
                agent_id,
                status,
            } => {
                warn!(executor_id = %executor_id, agent_id = %agent_id, ?status, "Executor lost");
            }
            SchedulerEvent::Message {
                agent_id,
                executor_id,
                data,
            } => {
                debug!(
                    agent_id = %agent_id,
                    executor_id = %executor_id,
                    "Framework message ({} bytes)",
                    data.len()
                );
            }
            SchedulerEvent::Error(message) => error!("Resource manager error: {}", message),
            SchedulerEvent::Heartbeat => debug!("Heartbeat"),
            SchedulerEvent::Disconnected => warn!("Disconnected from resource manager"),
        }
        Ok(())
    }

    async fn status_update(&self, status: TaskStatus) -> Result<()> {
        let task_id = status.task_id.as_str().to_string();
        let message = status.message.clone().unwrap_or_default();
        debug!(task_id = %task_id, state = %status.state, message = %message, "Task status update");

        match task_id.parse::<TaskContext>() {
            Ok(context) => {
                self.events.publish(JobStatusTraceEvent::from_task(
                    &context,
                    status.state.into(),
                    message.clone(),
                ));
                self.apply_status(&context, &status, &message).await?;
            }
            Err(e) => warn!(task_id = %task_id, "Ignoring update for unparseable task id: {}", e),
        }

        if let (Some(uuid), Some(agent_id)) = (&status.uuid, &status.agent_id) {
            if let Err(e) = self.driver.acknowledge(agent_id, &status.task_id, uuid).await {
                warn!(task_id = %task_id, "Failed to acknowledge status update: {}", e);
            }
        }
        Ok(())
    }

    async fn apply_status(&self, context: &TaskContext, status: &TaskStatus, message: &str) -> Result<()> {
        match status.state {
            TaskState::TaskRunning => {
                if self.facade.registry().job(context.job_name())?.is_none() {
                    warn!(task_id = %context, "Job configuration gone, killing task");
                    if let Err(e) = self
                        .driver
                        .kill_task(&status.task_id, status.agent_id.as_ref())
                        .await
                    {
                        warn!(task_id = %context, "Failed to kill task: {}", e);
                    }
                    return Ok(());
                }
                match message {
                    DAEMON_BEGIN => self.facade.update_daemon_status(context, false)?,
                    DAEMON_COMPLETE => {
                        self.facade.update_daemon_status(context, true)?;
                        self.statistics.task_run_successfully();
                    }
                    _ => {}
                }
            }
            TaskState::TaskFinished => {
                if self.facade.remove_running(context)? {
                    self.release(context);
                    self.statistics.task_run_successfully();
                } else {
                    debug!(task_id = %context, "Finished task was not running");
                }
            }
            TaskState::TaskKilled => {
                warn!(task_id = %context, "Task killed: {}", message);
                self.facade.remove_running(context)?;
                self.facade.add_daemon_job_to_ready_queue(context.job_name())?;
                self.release(context);
            }
            TaskState::TaskFailed
            | TaskState::TaskError
            | TaskState::TaskLost
            | TaskState::TaskDropped
            | TaskState::TaskGone
            | TaskState::TaskGoneByOperator => {
                warn!(
                    task_id = %context,
                    state = %status.state,
                    reason = ?status.reason,
                    "Task ended abnormally: {}",
                    message
                );
                self.facade.remove_running(context)?;
                self.facade.record_failover_task(context)?;
                self.release(context);
                self.statistics.task_run_failed();
            }
            TaskState::TaskUnknown | TaskState::TaskUnreachable => {
                warn!(task_id = %context, state = %status.state, "Task state unknown");
                self.statistics.task_run_failed();
            }
            TaskState::TaskStaging | TaskState::TaskStarting | TaskState::TaskKilling => {}
        }
        Ok(())
    }

    /// Forget where the task ran and tell the assigner
    fn release(&self, context: &TaskContext) {
        let task_id = context.id();
        let Some(hostname) = self.facade.pop_mapping(&task_id) else {
            return;
        };
        match TaskContext::id_for_unassigned_agent(&task_id) {
            Ok(request_id) => self.assigner.unassign(&request_id, &hostname),
            Err(e) => warn!(task_id = %task_id, "Cannot derive placement id: {}", e),
        }
    }
}
