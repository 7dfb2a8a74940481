use crate::config::CloudJobConfiguration;
use crate::error::{JobMeshError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the segments of a task identifier
pub const DELIMITER: &str = "@-@";

/// Agent placeholder for a task context that has not been placed yet
pub const UNASSIGNED_AGENT: &str = "unassigned-slave";

/// Why a shard is being launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionType {
    /// A fresh launch taken from the ready queue
    Ready,
    /// A relaunch of a shard that terminated abnormally
    Failover,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Failover => write!(f, "FAILOVER"),
        }
    }
}

impl FromStr for ExecutionType {
    type Err = JobMeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "READY" => Ok(Self::Ready),
            "FAILOVER" => Ok(Self::Failover),
            other => Err(JobMeshError::invalid_task_id(
                other,
                "unknown execution type",
            )),
        }
    }
}

/// Reject names that would break task identifiers or storage keys
pub fn validate_job_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(JobMeshError::invalid_job_name(name, "name is empty"));
    }
    if name.contains(DELIMITER) {
        return Err(JobMeshError::invalid_job_name(
            name,
            format!("name contains the separator '{}'", DELIMITER),
        ));
    }
    if name.contains('/') {
        return Err(JobMeshError::invalid_job_name(name, "name contains '/'"));
    }
    Ok(())
}

/// Job name plus the shard indices a task covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaInfo {
    job_name: String,
    sharding_items: Vec<u32>,
}

impl MetaInfo {
    pub fn new(job_name: impl Into<String>, sharding_items: Vec<u32>) -> Self {
        Self {
            job_name: job_name.into(),
            sharding_items,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn sharding_items(&self) -> &[u32] {
        &self.sharding_items
    }
}

impl fmt::Display for MetaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.job_name,
            DELIMITER,
            join_items(&self.sharding_items)
        )
    }
}

impl FromStr for MetaInfo {
    type Err = JobMeshError;

    fn from_str(s: &str) -> Result<Self> {
        let (job_name, items) = s
            .split_once(DELIMITER)
            .ok_or_else(|| JobMeshError::invalid_task_id(s, "meta info has no separator"))?;

        Ok(Self {
            job_name: job_name.to_string(),
            sharding_items: parse_items(s, items)?,
        })
    }
}

fn join_items(items: &[u32]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_items(source: &str, raw: &str) -> Result<Vec<u32>> {
    if raw.is_empty() {
        return Err(JobMeshError::invalid_task_id(source, "no sharding items"));
    }
    raw.split(',')
        .map(|item| {
            item.parse::<u32>().map_err(|e| {
                JobMeshError::invalid_task_id(source, format!("bad sharding item '{}': {}", item, e))
            })
        })
        .collect()
}

/// Runtime identity of one execution attempt of one or more shards.
///
/// The `Display` form is the task identifier handed to the resource
/// manager; status callbacks rebuild the context from it with `FromStr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskContext {
    meta_info: MetaInfo,
    execution_type: ExecutionType,
    agent_id: String,
    uuid: String,
}

impl TaskContext {
    /// Create an unplaced task context with a fresh uniqueness token
    pub fn new(
        job_name: impl Into<String>,
        sharding_items: Vec<u32>,
        execution_type: ExecutionType,
    ) -> Self {
        Self {
            meta_info: MetaInfo::new(job_name, sharding_items),
            execution_type,
            agent_id: UNASSIGNED_AGENT.to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Bind this context to the agent it was placed on
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn id(&self) -> String {
        self.to_string()
    }

    pub fn meta_info(&self) -> &MetaInfo {
        &self.meta_info
    }

    pub fn job_name(&self) -> &str {
        self.meta_info.job_name()
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.execution_type
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Task name shown by the resource manager (the id without its token)
    pub fn task_name(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.meta_info, DELIMITER, self.execution_type, DELIMITER, self.agent_id
        )
    }

    /// Executor id of `app_name` on this context's agent
    pub fn executor_id(&self, app_name: &str) -> String {
        format!("{}{}{}", app_name, DELIMITER, self.agent_id)
    }

    /// The id this task had before placement, as known to the solver
    pub fn id_for_unassigned_agent(task_id: &str) -> Result<String> {
        let context: TaskContext = task_id.parse()?;
        Ok(context.with_agent_id(UNASSIGNED_AGENT).id())
    }
}

/// App name encoded in an executor id produced by [`TaskContext::executor_id`]
pub fn app_name_from_executor_id(executor_id: &str) -> &str {
    executor_id
        .split_once(DELIMITER)
        .map(|(app, _)| app)
        .unwrap_or(executor_id)
}

impl fmt::Display for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{meta}{d}{kind}{d}{agent}{d}{uuid}",
            meta = self.meta_info,
            kind = self.execution_type,
            agent = self.agent_id,
            uuid = self.uuid,
            d = DELIMITER
        )
    }
}

impl FromStr for TaskContext {
    type Err = JobMeshError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(DELIMITER).collect();
        if parts.len() != 5 {
            return Err(JobMeshError::invalid_task_id(
                s,
                format!("expected 5 segments, found {}", parts.len()),
            ));
        }

        if parts[0].is_empty() || parts[3].is_empty() || parts[4].is_empty() {
            return Err(JobMeshError::invalid_task_id(s, "empty segment"));
        }

        Ok(Self {
            meta_info: MetaInfo::new(parts[0], parse_items(s, parts[1])?),
            execution_type: parts[2].parse()?,
            agent_id: parts[3].to_string(),
            uuid: parts[4].to_string(),
        })
    }
}

impl TryFrom<String> for TaskContext {
    type Error = JobMeshError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TaskContext> for String {
    fn from(value: TaskContext) -> Self {
        value.to_string()
    }
}

/// One job's pending-execution intent for a single scheduling cycle
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub job_config: CloudJobConfiguration,
    pub assigned_sharding_items: Vec<u32>,
    pub execution_type: ExecutionType,
}

impl JobContext {
    pub fn new(
        job_config: CloudJobConfiguration,
        assigned_sharding_items: Vec<u32>,
        execution_type: ExecutionType,
    ) -> Self {
        Self {
            job_config,
            assigned_sharding_items,
            execution_type,
        }
    }

    /// Context covering every shard of the job
    pub fn from_config(job_config: CloudJobConfiguration, execution_type: ExecutionType) -> Self {
        let items = (0..job_config.sharding_total_count).collect();
        Self::new(job_config, items, execution_type)
    }

    pub fn job_name(&self) -> &str {
        &self.job_config.job_name
    }
}
