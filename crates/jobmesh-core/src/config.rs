use crate::context::validate_job_name;
use crate::error::{JobMeshError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a cloud job is run on its executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudJobExecutionType {
    /// Run to completion, one launch per trigger
    Transient,
    /// Long-running, reports idle/busy through status messages
    Daemon,
}

impl fmt::Display for CloudJobExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Daemon => write!(f, "DAEMON"),
        }
    }
}

/// Kind of job logic the worker runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Simple,
    Dataflow,
    Script,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "SIMPLE"),
            Self::Dataflow => write!(f, "DATAFLOW"),
            Self::Script => write!(f, "SCRIPT"),
        }
    }
}

/// Declarative definition of a sharded cloud job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudJobConfiguration {
    pub job_name: String,
    pub app_name: String,
    #[serde(default)]
    pub cron: String,
    pub sharding_total_count: u32,
    /// Per-shard parameters in `0=a,1=b` form
    #[serde(default)]
    pub sharding_item_parameters: String,
    #[serde(default)]
    pub job_parameter: String,
    #[serde(default)]
    pub failover: bool,
    #[serde(default)]
    pub misfire: bool,
    #[serde(default)]
    pub description: String,
    /// CPU cores requested per shard
    pub cpu_count: f64,
    /// Memory in MB requested per shard
    pub memory_mb: f64,
    pub job_execution_type: CloudJobExecutionType,
    pub job_type: JobType,
    #[serde(default)]
    pub job_class: String,
    #[serde(default)]
    pub script_command_line: String,
    #[serde(default)]
    pub streaming_process: bool,
    #[serde(default)]
    pub job_executor_service_handler_type: String,
    #[serde(default)]
    pub job_error_handler_type: String,
}

impl CloudJobConfiguration {
    /// Check the fields the scheduler relies on
    pub fn validate(&self) -> Result<()> {
        validate_job_name(&self.job_name)?;

        if self.app_name.is_empty() {
            return Err(JobMeshError::invalid_configuration(
                &self.job_name,
                "app_name is empty",
                "Every job must reference a registered app",
            ));
        }

        if self.sharding_total_count == 0 {
            return Err(JobMeshError::invalid_configuration(
                &self.job_name,
                "sharding_total_count must be at least 1",
                "Set sharding_total_count to the number of shards to launch",
            ));
        }

        if self.cpu_count < 0.0 || self.memory_mb < 0.0 {
            return Err(JobMeshError::invalid_configuration(
                &self.job_name,
                "resource requests must not be negative",
                "Use cpu_count >= 0 and memory_mb >= 0",
            ));
        }

        if self.job_type == JobType::Script && self.script_command_line.is_empty() {
            return Err(JobMeshError::invalid_configuration(
                &self.job_name,
                "script jobs need a script_command_line",
                "Set script_command_line to the command the worker should run",
            ));
        }

        Ok(())
    }

    pub fn is_daemon(&self) -> bool {
        self.job_execution_type == CloudJobExecutionType::Daemon
    }

    /// Parse `sharding_item_parameters` into an item -> parameter map.
    ///
    /// Malformed pairs are skipped.
    pub fn sharding_item_parameter_map(&self) -> BTreeMap<u32, String> {
        parse_sharding_item_parameters(&self.sharding_item_parameters)
    }
}

/// Parse a `0=a,1=b` parameter string
pub fn parse_sharding_item_parameters(raw: &str) -> BTreeMap<u32, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (item, value) = pair.split_once('=')?;
            let item = item.trim().parse::<u32>().ok()?;
            Some((item, value.trim().to_string()))
        })
        .collect()
}

/// Declarative definition of the application bundle jobs run inside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAppConfiguration {
    pub app_name: String,
    /// Where the executor fetches the app bundle from
    pub app_url: String,
    pub bootstrap_script: String,
    /// Executor overhead in CPU cores, paid once per node
    #[serde(default = "default_app_cpu")]
    pub cpu_count: f64,
    /// Executor overhead in MB, paid once per node
    #[serde(default = "default_app_memory")]
    pub memory_mb: f64,
    #[serde(default = "default_true")]
    pub app_cache_enable: bool,
    #[serde(default)]
    pub event_trace_sampling_count: u32,
}

fn default_app_cpu() -> f64 {
    1.0
}

fn default_app_memory() -> f64 {
    128.0
}

fn default_true() -> bool {
    true
}

impl CloudAppConfiguration {
    pub fn validate(&self) -> Result<()> {
        validate_job_name(&self.app_name).map_err(|_| {
            JobMeshError::invalid_configuration(
                &self.app_name,
                "app name is empty or contains a reserved separator",
                "App names must be non-empty and must not contain '@-@' or '/'",
            )
        })?;

        if self.app_url.is_empty() {
            return Err(JobMeshError::invalid_configuration(
                &self.app_name,
                "app_url is empty",
                "Point app_url at the downloadable app bundle",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn job(name: &str) -> CloudJobConfiguration {
        CloudJobConfiguration {
            job_name: name.to_string(),
            app_name: "test_app".to_string(),
            cron: "0/30 * * * * ?".to_string(),
            sharding_total_count: 3,
            sharding_item_parameters: "0=a,1=b,2=c".to_string(),
            job_parameter: String::new(),
            failover: true,
            misfire: false,
            description: String::new(),
            cpu_count: 1.0,
            memory_mb: 128.0,
            job_execution_type: CloudJobExecutionType::Transient,
            job_type: JobType::Simple,
            job_class: "org.example.TestJob".to_string(),
            script_command_line: String::new(),
            streaming_process: false,
            job_executor_service_handler_type: String::new(),
            job_error_handler_type: String::new(),
        }
    }

    #[test]
    fn test_parse_sharding_item_parameters() {
        let map = parse_sharding_item_parameters("0=Beijing, 1=Shanghai,bad,x=y,2=");
        assert_eq!(map.len(), 3);
        assert_eq!(map[&0], "Beijing");
        assert_eq!(map[&1], "Shanghai");
        assert_eq!(map[&2], "");
    }

    #[test]
    fn test_validate_rejects_zero_shards() {
        let mut config = job("test_job");
        config.sharding_total_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_script_without_command() {
        let mut config = job("test_job");
        config.job_type = JobType::Script;
        assert!(config.validate().is_err());

        config.script_command_line = "/bin/run.sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_job_yaml_defaults() {
        let yaml = r#"
job_name: yaml_job
app_name: yaml_app
sharding_total_count: 2
cpu_count: 0.5
memory_mb: 64
job_execution_type: DAEMON
job_type: SIMPLE
"#;
        let config: CloudJobConfiguration = serde_yaml::from_str(yaml).unwrap();
        assert!(config.is_daemon());
        assert!(!config.failover);
        assert!(config.sharding_item_parameters.is_empty());
    }

    #[test]
    fn test_app_yaml_defaults() {
        let yaml = r#"
app_name: yaml_app
app_url: http://repo/yaml_app.tar.gz
bootstrap_script: bin/start.sh
"#;
        let app: CloudAppConfiguration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(app.cpu_count, 1.0);
        assert_eq!(app.memory_mb, 128.0);
        assert!(app.app_cache_enable);
        assert!(app.validate().is_ok());
    }
}
