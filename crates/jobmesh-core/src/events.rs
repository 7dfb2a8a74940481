use crate::context::{ExecutionType, TaskContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Component that produced a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    CloudScheduler,
    CloudExecutor,
}

/// Lifecycle state recorded in a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceState {
    TaskStaging,
    TaskStarting,
    TaskRunning,
    TaskKilling,
    TaskFinished,
    TaskFailed,
    TaskKilled,
    TaskError,
    TaskLost,
    TaskDropped,
    TaskUnreachable,
    TaskGone,
    TaskGoneByOperator,
    TaskUnknown,
}

/// A task lifecycle trace event published on the scheduler's event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusTraceEvent {
    pub id: String,
    pub job_name: String,
    /// Task id of the failed attempt this launch replaces, if any
    pub original_task_id: Option<String>,
    pub task_id: String,
    pub slave_id: String,
    pub source: Source,
    pub execution_type: ExecutionType,
    pub sharding_items: Vec<u32>,
    pub state: TraceState,
    pub message: String,
    pub creation_time: DateTime<Utc>,
}

impl JobStatusTraceEvent {
    /// Create a scheduler-sourced event for a task context
    pub fn from_task(context: &TaskContext, state: TraceState, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_name: context.job_name().to_string(),
            original_task_id: None,
            task_id: context.id(),
            slave_id: context.agent_id().to_string(),
            source: Source::CloudScheduler,
            execution_type: context.execution_type(),
            sharding_items: context.meta_info().sharding_items().to_vec(),
            state,
            message: message.into(),
            creation_time: Utc::now(),
        }
    }

    /// Link this event to the attempt it replaces
    pub fn with_original_task_id(mut self, original_task_id: impl Into<String>) -> Self {
        self.original_task_id = Some(original_task_id.into());
        self
    }
}
