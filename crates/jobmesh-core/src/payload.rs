//! Data handed to the worker-side execution engine with every launch.
//!
//! The field set of these types is a compatibility contract with the
//! executor: renaming or removing a field breaks running workers.

use crate::config::{CloudAppConfiguration, CloudJobConfiguration};
use crate::context::TaskContext;
use crate::error::{JobMeshError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shard execution context for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingContexts {
    pub task_id: String,
    pub job_name: String,
    pub sharding_total_count: u32,
    pub job_parameter: String,
    /// Shard item -> per-shard parameter, only for the items this task runs
    pub sharding_item_parameters: BTreeMap<u32, String>,
    pub job_event_sampling_count: u32,
}

impl ShardingContexts {
    pub fn for_task(
        task: &TaskContext,
        job: &CloudJobConfiguration,
        app: &CloudAppConfiguration,
    ) -> Self {
        let parameters = job.sharding_item_parameter_map();
        let sharding_item_parameters = task
            .meta_info()
            .sharding_items()
            .iter()
            .map(|item| (*item, parameters.get(item).cloned().unwrap_or_default()))
            .collect();

        Self {
            task_id: task.id(),
            job_name: job.job_name.clone(),
            sharding_total_count: job.sharding_total_count,
            job_parameter: job.job_parameter.clone(),
            sharding_item_parameters,
            job_event_sampling_count: app.event_trace_sampling_count,
        }
    }
}

/// Job configuration fields the executor needs, as a flat string map
pub fn job_config_context(job: &CloudJobConfiguration) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    context.insert("job_type".to_string(), job.job_type.to_string());
    context.insert("job_class".to_string(), job.job_class.clone());
    context.insert("job_name".to_string(), job.job_name.clone());
    context.insert(
        "job_execution_type".to_string(),
        job.job_execution_type.to_string(),
    );
    // Daemon executors schedule themselves from the cron expression
    let cron = if job.is_daemon() {
        job.cron.clone()
    } else {
        String::new()
    };
    context.insert("cron".to_string(), cron);
    context.insert(
        "streaming_process".to_string(),
        job.streaming_process.to_string(),
    );
    context.insert(
        "script_command_line".to_string(),
        job.script_command_line.clone(),
    );
    context.insert(
        "executor_service_handler".to_string(),
        job.job_executor_service_handler_type.clone(),
    );
    context.insert(
        "error_handler".to_string(),
        job.job_error_handler_type.clone(),
    );
    context
}

/// Everything a custom executor receives in the task's data field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchPayload {
    pub sharding_contexts: ShardingContexts,
    pub job_config_context: BTreeMap<String, String>,
}

impl LaunchPayload {
    pub fn new(
        task: &TaskContext,
        job: &CloudJobConfiguration,
        app: &CloudAppConfiguration,
    ) -> Self {
        Self {
            sharding_contexts: ShardingContexts::for_task(task, job, app),
            job_config_context: job_config_context(job),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            JobMeshError::serialization_error(
                format!("Failed to serialize launch payload: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| {
            JobMeshError::serialization_error(
                format!("Failed to deserialize launch payload: {}", e),
                Some(Box::new(e)),
            )
        })
    }
}
