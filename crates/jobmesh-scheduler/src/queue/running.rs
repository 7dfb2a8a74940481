use crate::error::Result;
use crate::store::{scan_json, write_json};
use jobmesh_core::{MetaInfo, TaskContext};
use jobmesh_storage::{KVStore, KeyEncoder};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A launched task and, for daemon jobs, whether it is currently idle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub context: TaskContext,
    #[serde(default)]
    pub idle: bool,
}

type JobIndex = HashMap<String, HashMap<String, RunningTask>>;

/// Tasks submitted to the resource manager and not yet terminal.
///
/// The store is the source of truth; `load` rebuilds the in-memory index
/// used for lookups. The task-id → hostname mapping is memory only.
pub struct RunningQueue {
    store: Arc<dyn KVStore>,
    index: RwLock<JobIndex>,
    hosts: RwLock<HashMap<String, String>>,
}

impl RunningQueue {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self {
            store,
            index: RwLock::new(HashMap::new()),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the in-memory index from the store
    pub fn load(&self) -> Result<usize> {
        let tasks: Vec<RunningTask> = scan_json(self.store.as_ref(), KeyEncoder::RUNNING_PREFIX)?;
        let mut index = JobIndex::new();
        for task in tasks {
            index
                .entry(task.context.job_name().to_string())
                .or_default()
                .insert(task.context.id(), task);
        }
        let count = index.values().map(HashMap::len).sum();
        *self.index.write() = index;
        info!("Loaded {} running tasks", count);
        Ok(count)
    }

    /// Drop the in-memory state; stored entries are kept
    pub fn clear(&self) {
        self.index.write().clear();
        self.hosts.write().clear();
    }

    pub fn add(&self, context: &TaskContext) -> Result<()> {
        let task = RunningTask {
            context: context.clone(),
            idle: false,
        };
        let task_id = context.id();
        write_json(
            self.store.as_ref(),
            &KeyEncoder::running(context.job_name(), &task_id),
            &task,
        )?;
        self.index
            .write()
            .entry(context.job_name().to_string())
            .or_default()
            .insert(task_id, task);
        Ok(())
    }

    /// Mark a daemon task idle or busy; unknown tasks are ignored
    pub fn update_idle(&self, context: &TaskContext, idle: bool) -> Result<()> {
        let task_id = context.id();
        let mut index = self.index.write();
        let Some(task) = index
            .get_mut(context.job_name())
            .and_then(|tasks| tasks.get_mut(&task_id))
        else {
            debug!(task_id = %task_id, "Idle update for task that is not running");
            return Ok(());
        };
        task.idle = idle;
        write_json(
            self.store.as_ref(),
            &KeyEncoder::running(context.job_name(), &task_id),
            &*task,
        )
    }

    /// Returns whether the task was running
    pub fn remove(&self, context: &TaskContext) -> Result<bool> {
        let task_id = context.id();
        let mut index = self.index.write();
        let removed = match index.get_mut(context.job_name()) {
            Some(tasks) => {
                let removed = tasks.remove(&task_id).is_some();
                if tasks.is_empty() {
                    index.remove(context.job_name());
                }
                removed
            }
            None => false,
        };
        if removed {
            self.store
                .delete(KeyEncoder::running(context.job_name(), &task_id).as_bytes())?;
        }
        Ok(removed)
    }

    pub fn remove_job(&self, job_name: &str) -> Result<()> {
        self.store
            .delete_prefix(KeyEncoder::running_job_prefix(job_name).as_bytes())?;
        self.index.write().remove(job_name);
        Ok(())
    }

    pub fn is_job_running(&self, job_name: &str) -> bool {
        self.index
            .read()
            .get(job_name)
            .is_some_and(|tasks| !tasks.is_empty())
    }

    /// Whether any running task of the job covers one of the meta's shards
    pub fn is_task_running(&self, meta_info: &MetaInfo) -> bool {
        let index = self.index.read();
        let Some(tasks) = index.get(meta_info.job_name()) else {
            return false;
        };
        tasks.values().any(|task| {
            task.context
                .meta_info()
                .sharding_items()
                .iter()
                .any(|item| meta_info.sharding_items().contains(item))
        })
    }

    pub fn running_tasks(&self, job_name: &str) -> Vec<RunningTask> {
        self.index
            .read()
            .get(job_name)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every running task grouped by job
    pub fn all_tasks(&self) -> HashMap<String, Vec<TaskContext>> {
        self.index
            .read()
            .iter()
            .map(|(job_name, tasks)| {
                (
                    job_name.clone(),
                    tasks.values().map(|task| task.context.clone()).collect(),
                )
            })
            .collect()
    }

    pub fn add_mapping(&self, task_id: &str, hostname: &str) {
        self.hosts
            .write()
            .insert(task_id.to_string(), hostname.to_string());
    }

    pub fn pop_mapping(&self, task_id: &str) -> Option<String> {
        self.hosts.write().remove(task_id)
    }
}
