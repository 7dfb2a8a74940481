use crate::error::{MesosError, Result};
use crate::protocol::{AgentId, OfferId, TaskId, TaskInfo, TaskStatus};
use crate::traits::{ClusterState, ExecutorStateInfo, Sandbox, SchedulerDriver};
use async_trait::async_trait;
use jobmesh_core::context::app_name_from_executor_id;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A call accepted by `RecordingDriver`
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Launch {
        offer_ids: Vec<OfferId>,
        tasks: Vec<TaskInfo>,
    },
    Decline {
        offer_ids: Vec<OfferId>,
    },
    Kill {
        task_id: TaskId,
        agent_id: Option<AgentId>,
    },
    Reconcile {
        statuses: Vec<TaskStatus>,
    },
    Acknowledge {
        agent_id: AgentId,
        task_id: TaskId,
        uuid: Vec<u8>,
    },
}

/// In-memory driver that records every call for assertions
///
/// Launches can be made to fail to exercise the submit-then-record path.
#[derive(Default)]
pub struct RecordingDriver {
    calls: Mutex<Vec<DriverCall>>,
    fail_launches: AtomicBool,
    failing_agents: Mutex<HashSet<String>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Reject launches carrying a task for this agent
    pub fn fail_launches_on(&self, agent_id: impl Into<String>) {
        self.failing_agents.lock().insert(agent_id.into());
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Tasks of every accepted launch, in submission order
    pub fn launched_tasks(&self) -> Vec<TaskInfo> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Launch { tasks, .. } => Some(tasks.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn declined_offers(&self) -> Vec<OfferId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Decline { offer_ids } => Some(offer_ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn killed_tasks(&self) -> Vec<TaskId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Kill { task_id, .. } => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reconcile_calls(&self) -> Vec<Vec<TaskStatus>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Reconcile { statuses } => Some(statuses.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn acknowledged(&self) -> Vec<TaskId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Acknowledge { task_id, .. } => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall) {
        debug!("Recording driver call: {:?}", call);
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl SchedulerDriver for RecordingDriver {
    async fn launch_tasks(&self, offer_ids: &[OfferId], tasks: Vec<TaskInfo>) -> Result<()> {
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(MesosError::unexpected_status("ACCEPT", 503, "launch rejected"));
        }
        let rejected = {
            let failing = self.failing_agents.lock();
            tasks.iter().any(|task| failing.contains(task.agent_id.as_str()))
        };
        if rejected {
            return Err(MesosError::unexpected_status("ACCEPT", 503, "agent rejected launch"));
        }
        self.record(DriverCall::Launch {
            offer_ids: offer_ids.to_vec(),
            tasks,
        });
        Ok(())
    }

    async fn decline_offers(&self, offer_ids: &[OfferId]) -> Result<()> {
        self.record(DriverCall::Decline {
            offer_ids: offer_ids.to_vec(),
        });
        Ok(())
    }

    async fn kill_task(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> Result<()> {
        self.record(DriverCall::Kill {
            task_id: task_id.clone(),
            agent_id: agent_id.cloned(),
        });
        Ok(())
    }

    async fn reconcile_tasks(&self, statuses: Vec<TaskStatus>) -> Result<()> {
        self.record(DriverCall::Reconcile { statuses });
        Ok(())
    }

    async fn acknowledge(&self, agent_id: &AgentId, task_id: &TaskId, uuid: &[u8]) -> Result<()> {
        self.record(DriverCall::Acknowledge {
            agent_id: agent_id.clone(),
            task_id: task_id.clone(),
            uuid: uuid.to_vec(),
        });
        Ok(())
    }
}

/// Cluster state backed by a fixed executor list
#[derive(Default)]
pub struct StaticClusterState {
    executors: RwLock<Vec<ExecutorStateInfo>>,
    unavailable: AtomicBool,
}

impl StaticClusterState {
    pub fn new(executors: Vec<ExecutorStateInfo>) -> Self {
        Self {
            executors: RwLock::new(executors),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Register an app executor alive on an agent
    pub fn add_executor(&self, app_name: &str, agent_id: &str) {
        self.executors.write().push(ExecutorStateInfo {
            id: format!("{}{}{}", app_name, jobmesh_core::context::DELIMITER, agent_id),
            slave_id: agent_id.to_string(),
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterState for StaticClusterState {
    async fn executors(&self, app_name: Option<&str>) -> Result<Vec<ExecutorStateInfo>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MesosError::state_unavailable("cluster state disabled"));
        }
        Ok(self
            .executors
            .read()
            .iter()
            .filter(|executor| match app_name {
                Some(app) => app_name_from_executor_id(&executor.id) == app,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn sandbox(&self, app_name: &str) -> Result<Vec<Sandbox>> {
        Ok(self
            .executors(Some(app_name))
            .await?
            .into_iter()
            .map(|executor| Sandbox {
                hostname: executor.slave_id,
                path: format!("/executors/{}", executor.id),
            })
            .collect())
    }
}
