use crate::error::Result;
use crate::queue::{QueueConfig, RunningQueue};
use crate::registry::ConfigRegistry;
use crate::store::{read_json, scan_json, write_json};
use jobmesh_core::{from_json_slice, to_json_vec, CloudJobConfiguration, ExecutionType, JobContext};
use jobmesh_storage::{KVStore, KeyEncoder, WriteOp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pending launches of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEntry {
    pub job_name: String,
    pub count: u32,
}

/// Jobs with shards waiting to be launched
pub struct ReadyQueue {
    store: Arc<dyn KVStore>,
    running: Arc<RunningQueue>,
    config: QueueConfig,
}

impl ReadyQueue {
    pub fn new(store: Arc<dyn KVStore>, running: Arc<RunningQueue>, config: QueueConfig) -> Self {
        Self {
            store,
            running,
            config,
        }
    }

    /// Queue one more launch of a transient job
    pub fn add_transient(&self, job: &CloudJobConfiguration) -> Result<()> {
        if job.is_daemon() {
            debug!(job_name = %job.job_name, "Not a transient job, skipping");
            return Ok(());
        }
        let key = KeyEncoder::ready(&job.job_name);
        let existing: Option<ReadyEntry> = read_json(self.store.as_ref(), &key)?;
        if existing.is_none() && self.is_full()? {
            warn!(job_name = %job.job_name, "Ready queue is full, dropping trigger");
            return Ok(());
        }

        let mut failure = None;
        self.store.update_with(key.as_bytes(), &mut |current: Option<&[u8]>| {
            let count = match current.map(from_json_slice::<ReadyEntry>) {
                Some(Ok(entry)) => entry.count,
                Some(Err(e)) => {
                    failure = Some(e);
                    return current.map(|bytes| bytes.to_vec());
                }
                None => 0,
            };
            let entry = ReadyEntry {
                job_name: job.job_name.clone(),
                count: count + 1,
            };
            match to_json_vec(&entry) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    failure = Some(e);
                    current.map(|bytes| bytes.to_vec())
                }
            }
        })?;
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Queue a daemon job once; nothing happens if it is queued or running
    pub fn add_daemon(&self, job: &CloudJobConfiguration) -> Result<()> {
        if !job.is_daemon() {
            debug!(job_name = %job.job_name, "Not a daemon job, skipping");
            return Ok(());
        }
        if self.running.is_job_running(&job.job_name) {
            debug!(job_name = %job.job_name, "Daemon job already running");
            return Ok(());
        }
        let key = KeyEncoder::ready(&job.job_name);
        if self.store.exists(key.as_bytes())? {
            return Ok(());
        }
        if self.is_full()? {
            warn!(job_name = %job.job_name, "Ready queue is full, dropping daemon job");
            return Ok(());
        }
        write_json(
            self.store.as_ref(),
            &key,
            &ReadyEntry {
                job_name: job.job_name.clone(),
                count: 1,
            },
        )
    }

    /// Consume one pending launch of each job
    /// Take one pending launch from each job
    pub fn remove(&self, job_names: &HashSet<String>) -> Result<()> {
        self.store.write_batch(self.removal_ops(job_names)?)?;
        Ok(())
    }

    pub(crate) fn removal_ops(&self, job_names: &HashSet<String>) -> Result<Vec<WriteOp>> {
        let mut ops = Vec::new();
        for job_name in job_names {
            let key = KeyEncoder::ready(job_name);
            let Some(entry) = read_json::<ReadyEntry>(self.store.as_ref(), &key)? else {
                continue;
            };
            if entry.count <= 1 {
                ops.push(WriteOp::delete(key));
            } else {
                let value = to_json_vec(&ReadyEntry {
                    count: entry.count - 1,
                    ..entry
                })?;
                ops.push(WriteOp::put(key, value));
            }
        }
        Ok(ops)
    }

    pub fn remove_job(&self, job_name: &str) -> Result<()> {
        self.store.delete(KeyEncoder::ready(job_name).as_bytes())?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<ReadyEntry>> {
        scan_json(self.store.as_ref(), KeyEncoder::READY_PREFIX)
    }

    /// Pending launch count of a job, 0 when not queued
    pub fn count(&self, job_name: &str) -> Result<u32> {
        Ok(read_json::<ReadyEntry>(self.store.as_ref(), &KeyEncoder::ready(job_name))?
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    /// One context per queued job that is neither excluded nor running.
    ///
    /// Entries whose job configuration no longer exists are purged.
    pub fn eligible_job_contexts(
        &self,
        excluded: &HashSet<String>,
        registry: &ConfigRegistry,
    ) -> Result<Vec<JobContext>> {
        let mut contexts = Vec::new();
        for entry in self.entries()? {
            if excluded.contains(&entry.job_name) {
                continue;
            }
            let Some(config) = registry.job(&entry.job_name)? else {
                warn!(job_name = %entry.job_name, "Job configuration gone, purging ready entry");
                self.remove_job(&entry.job_name)?;
                continue;
            };
            if self.running.is_job_running(&entry.job_name) {
                debug!(job_name = %entry.job_name, "Job still running, leaving it queued");
                continue;
            }
            contexts.push(JobContext::from_config(config, ExecutionType::Ready));
        }
        Ok(contexts)
    }

    fn is_full(&self) -> Result<bool> {
        Ok(self
            .store
            .keys_with_prefix(KeyEncoder::READY_PREFIX.as_bytes())?
            .len()
            >= self.config.job_state_queue_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{daemon_job, in_memory_store, job};
    use jobmesh_core::TaskContext;

    struct Fixture {
        registry: ConfigRegistry,
        running: Arc<RunningQueue>,
        ready: ReadyQueue,
    }

    fn fixture(limit: usize) -> Fixture {
        let store = in_memory_store();
        let running = Arc::new(RunningQueue::new(store.clone()));
        Fixture {
            registry: ConfigRegistry::new(store.clone()),
            ready: ReadyQueue::new(
                store,
                running.clone(),
                QueueConfig {
                    job_state_queue_size: limit,
                },
            ),
            running,
        }
    }

    #[test]
    fn test_transient_counts_accumulate() {
        let f = fixture(10);
        let config = job("test_job");
        f.ready.add_transient(&config).unwrap();
        f.ready.add_transient(&config).unwrap();
        assert_eq!(f.ready.count("test_job").unwrap(), 2);

        let names: HashSet<String> = ["test_job".to_string()].into();
        f.ready.remove(&names).unwrap();
        assert_eq!(f.ready.count("test_job").unwrap(), 1);
        f.ready.remove(&names).unwrap();
        assert_eq!(f.ready.count("test_job").unwrap(), 0);
        assert!(f.ready.entries().unwrap().is_empty());
    }

    #[test]
    fn test_kind_mismatch_ignored() {
        let f = fixture(10);
        f.ready.add_transient(&daemon_job("daemon")).unwrap();
        f.ready.add_daemon(&job("transient")).unwrap();
        assert!(f.ready.entries().unwrap().is_empty());
    }

    #[test]
    fn test_daemon_set_once_and_not_while_running() {
        let f = fixture(10);
        let config = daemon_job("daemon");
        f.ready.add_daemon(&config).unwrap();
        f.ready.add_daemon(&config).unwrap();
        assert_eq!(f.ready.count("daemon").unwrap(), 1);

        f.ready.remove_job("daemon").unwrap();
        f.running
            .add(&TaskContext::new("daemon", vec![0], ExecutionType::Ready))
            .unwrap();
        f.ready.add_daemon(&config).unwrap();
        assert_eq!(f.ready.count("daemon").unwrap(), 0);
    }

    #[test]
    fn test_queue_size_limit() {
        let f = fixture(1);
        f.ready.add_transient(&job("a")).unwrap();
        f.ready.add_transient(&job("b")).unwrap();
        // Existing entries still accumulate when the queue is full
        f.ready.add_transient(&job("a")).unwrap();

        assert_eq!(f.ready.count("a").unwrap(), 2);
        assert_eq!(f.ready.count("b").unwrap(), 0);
    }

    #[test]
    fn test_eligible_contexts() {
        let f = fixture(10);
        f.registry.add_job(&job("queued")).unwrap();
        f.registry.add_job(&job("excluded")).unwrap();
        f.registry.add_job(&job("running")).unwrap();
        for name in ["queued", "excluded", "running", "orphan"] {
            f.ready.add_transient(&job(name)).unwrap();
        }
        f.running
            .add(&TaskContext::new("running", vec![0], ExecutionType::Ready))
            .unwrap();

        let excluded: HashSet<String> = ["excluded".to_string()].into();
        let contexts = f.ready.eligible_job_contexts(&excluded, &f.registry).unwrap();

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].job_name(), "queued");
        assert_eq!(contexts[0].assigned_sharding_items, vec![0, 1, 2]);
        assert_eq!(contexts[0].execution_type, ExecutionType::Ready);

        // The orphan entry was purged, the others kept
        assert_eq!(f.ready.count("orphan").unwrap(), 0);
        assert_eq!(f.ready.count("running").unwrap(), 1);
        assert_eq!(f.ready.count("excluded").unwrap(), 1);
    }
}
