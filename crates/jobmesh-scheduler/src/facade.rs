//! Single entry point for reading and mutating queue state.

use crate::error::Result;
use crate::queue::{FailoverQueue, QueueConfig, ReadyQueue, RunningQueue};
use crate::registry::ConfigRegistry;
use jobmesh_core::{CloudJobConfiguration, ExecutionType, JobContext, MetaInfo, TaskContext};
use jobmesh_storage::KVStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Queue and configuration facade shared by the launch cycle, the event
/// engine and the reconciliation loop
pub struct FacadeService {
    store: Arc<dyn KVStore>,
    registry: Arc<ConfigRegistry>,
    ready: ReadyQueue,
    running: Arc<RunningQueue>,
    failover: FailoverQueue,
}

impl FacadeService {
    pub fn new(store: Arc<dyn KVStore>, config: QueueConfig) -> Self {
        let running = Arc::new(RunningQueue::new(store.clone()));
        Self {
            registry: Arc::new(ConfigRegistry::new(store.clone())),
            ready: ReadyQueue::new(store.clone(), running.clone(), config.clone()),
            failover: FailoverQueue::new(store.clone(), running.clone(), config),
            running,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    pub fn running(&self) -> &RunningQueue {
        &self.running
    }

    pub fn ready(&self) -> &ReadyQueue {
        &self.ready
    }

    pub fn failover(&self) -> &FailoverQueue {
        &self.failover
    }

    /// Load the running index from the store
    pub fn start(&self) -> Result<()> {
        let count = self.running.load()?;
        info!("Facade started with {} running tasks", count);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.clear();
        info!("Facade stopped");
    }

    /// Failover contexts first, then ready contexts of the remaining jobs
    pub fn get_eligible_job_context(&self) -> Result<Vec<JobContext>> {
        let failover = self.failover.eligible_job_contexts(&self.registry)?;
        let excluded: HashSet<String> = failover
            .iter()
            .map(|context| context.job_name().to_string())
            .collect();
        let ready = self.ready.eligible_job_contexts(&excluded, &self.registry)?;

        let mut contexts = failover;
        contexts.extend(ready);
        Ok(contexts)
    }

    /// Drop launched tasks from the ready and failover queues in one write.
    ///
    /// A ready job loses one pending launch however many of its shards
    /// were launched.
    pub fn remove_launch_tasks_from_queue(&self, launched: &[TaskContext]) -> Result<()> {
        let mut failover_metas = Vec::new();
        let mut ready_jobs = HashSet::new();
        for context in launched {
            match context.execution_type() {
                ExecutionType::Failover => failover_metas.push(context.meta_info().clone()),
                ExecutionType::Ready => {
                    ready_jobs.insert(context.job_name().to_string());
                }
            }
        }
        let mut ops = FailoverQueue::removal_ops(&failover_metas);
        ops.extend(self.ready.removal_ops(&ready_jobs)?);
        self.store.write_batch(ops)?;
        Ok(())
    }

    pub fn add_running(&self, context: &TaskContext) -> Result<()> {
        self.running.add(context)
    }

    /// Record whether a daemon task is idle
    pub fn update_daemon_status(&self, context: &TaskContext, idle: bool) -> Result<()> {
        self.running.update_idle(context, idle)
    }

    /// Returns whether the task was running
    pub fn remove_running(&self, context: &TaskContext) -> Result<bool> {
        self.running.remove(context)
    }

    /// Queue a failed task for relaunch when its job allows it
    pub fn record_failover_task(&self, context: &TaskContext) -> Result<bool> {
        let Some(job) = self.registry.job(context.job_name())? else {
            debug!(task_id = %context, "Job configuration gone, no failover");
            return Ok(false);
        };
        if self.is_disabled(&job)? {
            debug!(task_id = %context, "Job disabled, no failover");
            return Ok(false);
        }
        if !job.failover && !job.is_daemon() {
            debug!(task_id = %context, "Failover not enabled for job");
            return Ok(false);
        }
        self.failover.add(context)
    }

    /// Queue a shard whose submission failed while its job's other shards
    /// launched. It never ran, so the job's failover flag does not apply.
    pub fn record_unlaunched_task(&self, context: &TaskContext) -> Result<bool> {
        self.failover.add(context)
    }

    /// Put a killed daemon job back in the ready queue
    pub fn add_daemon_job_to_ready_queue(&self, job_name: &str) -> Result<()> {
        let Some(job) = self.registry.job(job_name)? else {
            return Ok(());
        };
        if self.is_disabled(&job)? {
            debug!(job_name = %job_name, "Job disabled, not requeueing");
            return Ok(());
        }
        self.ready.add_daemon(&job)
    }

    /// Queue a launch of a registered job according to its execution type
    pub fn enqueue_job(&self, job_name: &str) -> Result<()> {
        let job = self.registry.job(job_name)?.ok_or_else(|| {
            crate::error::SchedulerError::config_not_found("job", job_name)
        })?;
        if job.is_daemon() {
            self.ready.add_daemon(&job)
        } else {
            self.ready.add_transient(&job)
        }
    }

    /// Queue every enabled daemon job that is not running
    pub fn bootstrap_daemon_jobs(&self) -> Result<usize> {
        let mut queued = 0;
        for job in self.registry.jobs()? {
            if job.is_daemon() && !self.is_disabled(&job)? && !self.running.is_job_running(&job.job_name) {
                self.ready.add_daemon(&job)?;
                queued += 1;
            }
        }
        info!("Queued {} daemon jobs", queued);
        Ok(queued)
    }

    /// For ready contexts, whether any task of the job runs; for failover
    /// contexts, whether one of the task's shards runs
    pub fn is_running(&self, context: &TaskContext) -> bool {
        match context.execution_type() {
            ExecutionType::Ready => self.running.is_job_running(context.job_name()),
            ExecutionType::Failover => self.running.is_task_running(context.meta_info()),
        }
    }

    /// Whether the job or its app is disabled
    pub fn is_disabled(&self, job: &CloudJobConfiguration) -> Result<bool> {
        Ok(self.registry.is_job_disabled(&job.job_name)?
            || self.registry.is_app_disabled(&job.app_name)?)
    }

    pub fn get_all_running_tasks(&self) -> HashMap<String, Vec<TaskContext>> {
        self.running.all_tasks()
    }

    /// Id of the failed attempt a failover shard replaces
    pub fn failover_task_id(&self, meta: &MetaInfo) -> Result<Option<String>> {
        self.failover.task_id(meta)
    }

    pub fn add_mapping(&self, task_id: &str, hostname: &str) {
        self.running.add_mapping(task_id, hostname);
    }

    pub fn pop_mapping(&self, task_id: &str) -> Option<String> {
        self.running.pop_mapping(task_id)
    }
}
