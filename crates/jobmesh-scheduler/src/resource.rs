//! Per-offer hardware accounting and launch descriptor construction.

use crate::error::{Result, SchedulerError};
use jobmesh_core::{
    CloudAppConfiguration, CloudJobConfiguration, CloudJobExecutionType, JobType, LaunchPayload,
    ShardingContexts, TaskContext,
};
use jobmesh_mesos::{
    AgentId, CommandInfo, CommandUri, ExecutorId, ExecutorInfo, Offer, OfferId, Resource, TaskId,
    TaskInfo,
};

pub const CPUS: &str = "cpus";
pub const MEM: &str = "mem";

/// Float sums of fractional CPUs must not fail an exact fit
const EPSILON: f64 = 1e-9;

/// How a task is started on its agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    /// Plain shell command with the sharding contexts as its last argument
    Command,
    /// The app's executor, receiving the launch payload as task data
    CustomExecutor,
}

impl LaunchKind {
    pub fn for_job(job: &CloudJobConfiguration) -> Self {
        match (job.job_execution_type, job.job_type) {
            (CloudJobExecutionType::Transient, JobType::Script) => LaunchKind::Command,
            _ => LaunchKind::CustomExecutor,
        }
    }
}

/// Available and reserved CPU/memory of one offer for one cycle
///
/// Reservations are tentative until `commit`, which moves them out of the
/// available amount.
#[derive(Debug, Clone)]
pub struct HardwareResource {
    offer: Offer,
    available_cpu: f64,
    available_memory_mb: f64,
    reserved_cpu: f64,
    reserved_memory_mb: f64,
}

impl HardwareResource {
    pub fn new(offer: Offer) -> Self {
        let available_cpu = offer.scalar(CPUS);
        let available_memory_mb = offer.scalar(MEM);
        Self {
            offer,
            available_cpu,
            available_memory_mb,
            reserved_cpu: 0.0,
            reserved_memory_mb: 0.0,
        }
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn offer_id(&self) -> &OfferId {
        &self.offer.id
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.offer.agent_id
    }

    pub fn hostname(&self) -> &str {
        &self.offer.hostname
    }

    pub fn available_cpu(&self) -> f64 {
        self.available_cpu
    }

    pub fn available_memory_mb(&self) -> f64 {
        self.available_memory_mb
    }

    pub fn reserved_cpu(&self) -> f64 {
        self.reserved_cpu
    }

    pub fn reserved_memory_mb(&self) -> f64 {
        self.reserved_memory_mb
    }

    /// How many of `expected` shards of this size fit in the available amount
    pub fn calculate_sharding_count(
        &self,
        expected: u32,
        cpu_per_shard: f64,
        memory_per_shard: f64,
    ) -> u32 {
        let by_cpu = fit_count(self.available_cpu, cpu_per_shard, expected);
        let by_memory = fit_count(self.available_memory_mb, memory_per_shard, expected);
        by_cpu.min(by_memory)
    }

    pub fn can_reserve(&self, cpu: f64, memory_mb: f64) -> bool {
        self.reserved_cpu + cpu <= self.available_cpu + EPSILON
            && self.reserved_memory_mb + memory_mb <= self.available_memory_mb + EPSILON
    }

    /// Tentatively set aside resources; nothing changes on failure
    pub fn reserve(&mut self, cpu: f64, memory_mb: f64) -> Result<()> {
        if self.reserved_cpu + cpu > self.available_cpu + EPSILON {
            return Err(SchedulerError::insufficient_resources(
                self.offer.id.as_str(),
                CPUS,
                cpu,
                self.available_cpu - self.reserved_cpu,
            ));
        }
        if self.reserved_memory_mb + memory_mb > self.available_memory_mb + EPSILON {
            return Err(SchedulerError::insufficient_resources(
                self.offer.id.as_str(),
                MEM,
                memory_mb,
                self.available_memory_mb - self.reserved_memory_mb,
            ));
        }

        self.reserved_cpu += cpu;
        self.reserved_memory_mb += memory_mb;
        Ok(())
    }

    /// Move all reservations out of the available amount
    pub fn commit(&mut self) {
        self.available_cpu -= self.reserved_cpu;
        self.available_memory_mb -= self.reserved_memory_mb;
        self.reserved_cpu = 0.0;
        self.reserved_memory_mb = 0.0;
    }

    /// Launch descriptor for a task placed on this offer's agent
    pub fn build_launch_descriptor(
        &self,
        task: &TaskContext,
        job: &CloudJobConfiguration,
        app: &CloudAppConfiguration,
    ) -> Result<TaskInfo> {
        let mut info = TaskInfo {
            name: task.task_name(),
            task_id: TaskId::new(task.id()),
            agent_id: self.offer.agent_id.clone(),
            resources: vec![
                Resource::scalar(CPUS, job.cpu_count),
                Resource::scalar(MEM, job.memory_mb),
            ],
            command: None,
            executor: None,
            data: None,
        };

        match LaunchKind::for_job(job) {
            LaunchKind::Command => {
                let contexts = serde_json::to_string(&ShardingContexts::for_task(task, job, app))
                    .map_err(|e| {
                        SchedulerError::internal_error(format!(
                            "Failed to serialize sharding contexts: {}",
                            e
                        ))
                    })?;
                info.command = Some(CommandInfo {
                    uris: vec![app_uri(app)],
                    shell: true,
                    value: format!("{} {}", job.script_command_line, shell_quote(&contexts)),
                });
            }
            LaunchKind::CustomExecutor => {
                info.executor = Some(ExecutorInfo {
                    executor_id: ExecutorId::new(task.executor_id(&app.app_name)),
                    name: Some(app.app_name.clone()),
                    command: CommandInfo {
                        uris: vec![app_uri(app)],
                        shell: true,
                        value: app.bootstrap_script.clone(),
                    },
                    resources: vec![
                        Resource::scalar(CPUS, app.cpu_count),
                        Resource::scalar(MEM, app.memory_mb),
                    ],
                });
                info.data = Some(LaunchPayload::new(task, job, app).to_bytes()?);
            }
        }

        Ok(info)
    }
}

fn fit_count(available: f64, per_shard: f64, expected: u32) -> u32 {
    if per_shard <= 0.0 {
        return expected;
    }
    let fits = ((available + EPSILON) / per_shard).floor();
    if fits <= 0.0 {
        0
    } else {
        (fits as u32).min(expected)
    }
}

fn app_uri(app: &CloudAppConfiguration) -> CommandUri {
    CommandUri {
        value: app.app_url.clone(),
        executable: false,
        extract: true,
        cache: app.app_cache_enable,
    }
}

/// Single-quote a value for `sh -c`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{app, job};
    use jobmesh_core::ExecutionType;

    fn resource(cpus: Option<f64>, mem: Option<f64>) -> HardwareResource {
        let mut resources = Vec::new();
        if let Some(cpus) = cpus {
            resources.push(Resource::scalar(CPUS, cpus));
        }
        if let Some(mem) = mem {
            resources.push(Resource::scalar(MEM, mem));
        }
        HardwareResource::new(Offer::new("offer-1", "S0", "host0", resources))
    }

    #[test]
    fn test_calculate_sharding_count() {
        assert_eq!(resource(Some(10.0), Some(1280.0)).calculate_sharding_count(5, 1.0, 128.0), 5);
        assert_eq!(resource(Some(5.0), Some(1280.0)).calculate_sharding_count(5, 1.0, 128.0), 5);
        assert_eq!(resource(Some(10.0), Some(512.0)).calculate_sharding_count(5, 1.0, 128.0), 4);
        assert_eq!(resource(None, Some(1280.0)).calculate_sharding_count(5, 1.0, 128.0), 0);
        assert_eq!(resource(Some(10.0), None).calculate_sharding_count(5, 1.0, 128.0), 0);
        assert_eq!(resource(Some(0.3), Some(100.0)).calculate_sharding_count(3, 0.1, 0.0), 3);
    }

    #[test]
    fn test_reserve_and_commit() {
        let mut hw = resource(Some(4.0), Some(1024.0));

        hw.reserve(1.5, 256.0).unwrap();
        hw.reserve(1.0, 256.0).unwrap();
        assert_eq!(hw.reserved_cpu(), 2.5);
        assert_eq!(hw.reserved_memory_mb(), 512.0);
        assert_eq!(hw.available_cpu(), 4.0);

        hw.commit();
        assert_eq!(hw.available_cpu(), 1.5);
        assert_eq!(hw.available_memory_mb(), 512.0);
        assert_eq!(hw.reserved_cpu(), 0.0);
        assert_eq!(hw.reserved_memory_mb(), 0.0);
    }

    #[test]
    fn test_failed_reserve_leaves_state_unchanged() {
        let mut hw = resource(Some(2.0), Some(512.0));
        hw.reserve(1.0, 256.0).unwrap();

        let err = hw.reserve(0.5, 512.0).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InsufficientResources { ref resource, .. } if resource == MEM
        ));
        assert!(hw.reserve(1.5, 1.0).is_err());

        assert_eq!(hw.reserved_cpu(), 1.0);
        assert_eq!(hw.reserved_memory_mb(), 256.0);
        assert!(hw.can_reserve(1.0, 256.0));
        assert!(!hw.can_reserve(1.0, 257.0));
    }

    #[test]
    fn test_fractional_cpu_exact_fit() {
        let mut hw = resource(Some(0.3), Some(300.0));
        for _ in 0..3 {
            hw.reserve(0.1, 100.0).unwrap();
        }
        assert!(!hw.can_reserve(0.1, 0.0));
    }

    #[test]
    fn test_launch_kind_selection() {
        let mut config = job("test_job");
        assert_eq!(LaunchKind::for_job(&config), LaunchKind::CustomExecutor);

        config.job_type = JobType::Script;
        assert_eq!(LaunchKind::for_job(&config), LaunchKind::Command);

        config.job_execution_type = CloudJobExecutionType::Daemon;
        assert_eq!(LaunchKind::for_job(&config), LaunchKind::CustomExecutor);
    }

    #[test]
    fn test_custom_executor_descriptor() {
        let hw = resource(Some(4.0), Some(1024.0));
        let task = TaskContext::new("test_job", vec![1], ExecutionType::Ready).with_agent_id("S0");

        let info = hw
            .build_launch_descriptor(&task, &job("test_job"), &app("test_app"))
            .unwrap();

        assert_eq!(info.task_id.as_str(), task.id());
        assert_eq!(info.agent_id.as_str(), "S0");
        assert!(info.command.is_none());
        let executor = info.executor.as_ref().unwrap();
        assert_eq!(executor.executor_id.as_str(), "test_app@-@S0");
        assert_eq!(executor.command.value, "bin/start.sh");
        assert!(executor.command.uris[0].extract);
        assert!(!executor.command.uris[0].executable);

        let payload = LaunchPayload::from_bytes(info.data.as_ref().unwrap()).unwrap();
        assert_eq!(payload.sharding_contexts.task_id, task.id());
        assert_eq!(payload.sharding_contexts.sharding_item_parameters[&1], "b");

        // Building a descriptor does not touch the reservation state
        assert_eq!(hw.reserved_cpu(), 0.0);
    }

    #[test]
    fn test_command_descriptor_quotes_contexts() {
        let hw = resource(Some(4.0), Some(1024.0));
        let mut config = job("script_job");
        config.job_type = JobType::Script;
        config.script_command_line = "bin/run.sh".to_string();
        config.job_parameter = "it's".to_string();
        let task = TaskContext::new("script_job", vec![0], ExecutionType::Ready).with_agent_id("S0");

        let info = hw
            .build_launch_descriptor(&task, &config, &app("test_app"))
            .unwrap();

        assert!(info.executor.is_none());
        assert!(info.data.is_none());
        let command = info.command.unwrap();
        assert!(command.shell);
        assert!(command.value.starts_with("bin/run.sh '{"));
        assert!(command.value.contains(r"it'\''s"));
        assert_eq!(command.uris[0].value, "http://repo/test_app.tar.gz");
    }
}
