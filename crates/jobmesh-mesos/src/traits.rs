use crate::error::Result;
use crate::protocol::{AgentId, OfferId, TaskId, TaskInfo, TaskStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Calls the scheduler makes against the resource manager
///
/// Implemented over HTTP by `HttpSchedulerDriver` and in memory by
/// `RecordingDriver` for tests.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Accept the offers and launch the tasks on them
    async fn launch_tasks(&self, offer_ids: &[OfferId], tasks: Vec<TaskInfo>) -> Result<()>;

    /// Return offers unused
    async fn decline_offers(&self, offer_ids: &[OfferId]) -> Result<()>;

    /// Kill a task, optionally pinned to the agent it runs on
    async fn kill_task(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> Result<()>;

    /// Ask the master to resend the status of these tasks (all tasks when empty)
    async fn reconcile_tasks(&self, statuses: Vec<TaskStatus>) -> Result<()>;

    /// Acknowledge a status update carrying an acknowledgement uuid
    async fn acknowledge(&self, agent_id: &AgentId, task_id: &TaskId, uuid: &[u8]) -> Result<()>;
}

/// One executor known to the master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStateInfo {
    pub id: String,
    pub slave_id: String,
}

/// Where an app's executor keeps its sandbox on an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    pub hostname: String,
    pub path: String,
}

/// Read-only view of the cluster's live executors
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Executors of this framework, optionally only those of one app
    async fn executors(&self, app_name: Option<&str>) -> Result<Vec<ExecutorStateInfo>>;

    /// Sandbox locations of an app's executors.
    ///
    /// Agents whose state cannot be read contribute no entries.
    async fn sandbox(&self, app_name: &str) -> Result<Vec<Sandbox>>;

    /// Record the framework id and the master that accepted the subscription
    fn on_subscribed(&self, _framework_id: &str, _master: Option<&str>) {}
}
