use crate::error::Result;
use crate::queue::{QueueConfig, RunningQueue};
use crate::registry::ConfigRegistry;
use crate::store::{read_json, scan_json, write_json};
use jobmesh_core::{ExecutionType, JobContext, MetaInfo, TaskContext};
use jobmesh_storage::{KVStore, KeyEncoder, WriteOp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A shard waiting to be relaunched after an abnormal end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEntry {
    pub job_name: String,
    /// `MetaInfo` in its `{job}@-@{items}` form
    pub meta_info: String,
    /// Id of the attempt that failed
    pub original_task_id: String,
}

impl FailoverEntry {
    fn meta(&self) -> Option<MetaInfo> {
        self.meta_info.parse().ok()
    }
}

pub struct FailoverQueue {
    store: Arc<dyn KVStore>,
    running: Arc<RunningQueue>,
    config: QueueConfig,
}

impl FailoverQueue {
    pub fn new(store: Arc<dyn KVStore>, running: Arc<RunningQueue>, config: QueueConfig) -> Self {
        Self {
            store,
            running,
            config,
        }
    }

    /// Queue the shards of a failed task; returns whether an entry was written
    pub fn add(&self, context: &TaskContext) -> Result<bool> {
        let meta_info = context.meta_info();
        if self.running.is_task_running(meta_info) {
            debug!(task_id = %context, "Shard is running again, not queueing failover");
            return Ok(false);
        }
        let key = KeyEncoder::failover(context.job_name(), &meta_info.to_string());
        if self.store.exists(key.as_bytes())? {
            debug!(task_id = %context, "Shard already queued for failover");
            return Ok(false);
        }
        let size = self
            .store
            .keys_with_prefix(KeyEncoder::FAILOVER_PREFIX.as_bytes())?
            .len();
        if size >= self.config.job_state_queue_size {
            warn!(task_id = %context, "Failover queue is full ({} entries), dropping", size);
            return Ok(false);
        }

        write_json(
            self.store.as_ref(),
            &key,
            &FailoverEntry {
                job_name: context.job_name().to_string(),
                meta_info: meta_info.to_string(),
                original_task_id: context.id(),
            },
        )?;
        info!(task_id = %context, "Queued for failover");
        Ok(true)
    }

    pub fn entries(&self) -> Result<Vec<FailoverEntry>> {
        scan_json(self.store.as_ref(), KeyEncoder::FAILOVER_PREFIX)
    }

    /// One failover context per job, covering its queued shards that are not running.
    ///
    /// Entries whose job configuration no longer exists are purged.
    pub fn eligible_job_contexts(&self, registry: &ConfigRegistry) -> Result<Vec<JobContext>> {
        let mut items_by_job: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for entry in self.entries()? {
            let Some(meta) = entry.meta() else {
                warn!(meta_info = %entry.meta_info, "Unparseable failover entry, dropping");
                self.store.delete(
                    KeyEncoder::failover(&entry.job_name, &entry.meta_info).as_bytes(),
                )?;
                continue;
            };
            if self.running.is_task_running(&meta) {
                continue;
            }
            items_by_job
                .entry(entry.job_name)
                .or_default()
                .extend_from_slice(meta.sharding_items());
        }

        let mut contexts = Vec::new();
        for (job_name, mut items) in items_by_job {
            let Some(config) = registry.job(&job_name)? else {
                warn!(job_name = %job_name, "Job configuration gone, purging failover entries");
                self.remove_job(&job_name)?;
                continue;
            };
            items.sort_unstable();
            items.dedup();
            contexts.push(JobContext::new(config, items, ExecutionType::Failover));
        }
        Ok(contexts)
    }

    pub fn remove(&self, metas: &[MetaInfo]) -> Result<()> {
        self.store.write_batch(Self::removal_ops(metas))?;
        Ok(())
    }

    /// Deletes of every entry covering the given shards
    pub(crate) fn removal_ops(metas: &[MetaInfo]) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        for meta in metas {
            // Entries are stored per single shard
            for item in meta.sharding_items() {
                let single = MetaInfo::new(meta.job_name(), vec![*item]);
                ops.push(WriteOp::delete(KeyEncoder::failover(
                    meta.job_name(),
                    &single.to_string(),
                )));
            }
            if meta.sharding_items().len() > 1 {
                ops.push(WriteOp::delete(KeyEncoder::failover(
                    meta.job_name(),
                    &meta.to_string(),
                )));
            }
        }
        ops
    }

    /// Id of the failed attempt a shard is being relaunched for
    pub fn task_id(&self, meta: &MetaInfo) -> Result<Option<String>> {
        let key = KeyEncoder::failover(meta.job_name(), &meta.to_string());
        Ok(read_json::<FailoverEntry>(self.store.as_ref(), &key)?
            .map(|entry| entry.original_task_id))
    }

    pub fn remove_job(&self, job_name: &str) -> Result<()> {
        self.store
            .delete_prefix(KeyEncoder::failover_job_prefix(job_name).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{in_memory_store, job};

    struct Fixture {
        registry: ConfigRegistry,
        running: Arc<RunningQueue>,
        failover: FailoverQueue,
    }

    fn fixture(limit: usize) -> Fixture {
        let store = in_memory_store();
        let running = Arc::new(RunningQueue::new(store.clone()));
        Fixture {
            registry: ConfigRegistry::new(store.clone()),
            failover: FailoverQueue::new(
                store,
                running.clone(),
                QueueConfig {
                    job_state_queue_size: limit,
                },
            ),
            running,
        }
    }

    fn failed(job: &str, item: u32) -> TaskContext {
        TaskContext::new(job, vec![item], ExecutionType::Ready).with_agent_id("S0")
    }

    #[test]
    fn test_add_records_original_task_id() {
        let f = fixture(10);
        let context = failed("test_job", 1);

        assert!(f.failover.add(&context).unwrap());
        assert!(!f.failover.add(&failed("test_job", 1)).unwrap());

        let meta = MetaInfo::new("test_job", vec![1]);
        assert_eq!(f.failover.task_id(&meta).unwrap(), Some(context.id()));
        assert_eq!(f.failover.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_add_skips_running_shard_and_respects_limit() {
        let f = fixture(1);
        f.running.add(&failed("test_job", 0)).unwrap();
        assert!(!f.failover.add(&failed("test_job", 0)).unwrap());

        assert!(f.failover.add(&failed("test_job", 1)).unwrap());
        assert!(!f.failover.add(&failed("test_job", 2)).unwrap());
    }

    #[test]
    fn test_eligible_contexts_group_shards() {
        let f = fixture(10);
        f.registry.add_job(&job("test_job")).unwrap();
        f.failover.add(&failed("test_job", 2)).unwrap();
        f.failover.add(&failed("test_job", 0)).unwrap();
        f.failover.add(&failed("orphan", 0)).unwrap();

        let contexts = f.failover.eligible_job_contexts(&f.registry).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].job_name(), "test_job");
        assert_eq!(contexts[0].assigned_sharding_items, vec![0, 2]);
        assert_eq!(contexts[0].execution_type, ExecutionType::Failover);

        // Orphan purged
        assert_eq!(f.failover.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_remove() {
        let f = fixture(10);
        f.failover.add(&failed("test_job", 0)).unwrap();
        f.failover.add(&failed("test_job", 1)).unwrap();

        f.failover
            .remove(&[MetaInfo::new("test_job", vec![0])])
            .unwrap();
        let entries = f.failover.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].meta_info, "test_job@-@1");

        f.failover.remove_job("test_job").unwrap();
        assert!(f.failover.entries().unwrap().is_empty());
    }
}
