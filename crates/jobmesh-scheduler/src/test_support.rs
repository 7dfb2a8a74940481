//! Fixtures shared by the unit tests of this crate

use crate::facade::FacadeService;
use crate::queue::QueueConfig;
use jobmesh_core::{CloudAppConfiguration, CloudJobConfiguration, CloudJobExecutionType, JobType};
use jobmesh_storage::{KVStore, RedbBackend};
use std::sync::Arc;

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

pub(crate) fn daemon_job(name: &str) -> CloudJobConfiguration {
    let mut config = job(name);
    config.job_execution_type = CloudJobExecutionType::Daemon;
    config
}

pub(crate) fn app(name: &str) -> CloudAppConfiguration {
    CloudAppConfiguration {
        app_name: name.to_string(),
        app_url: format!("http://repo/{}.tar.gz", name),
        bootstrap_script: "bin/start.sh".to_string(),
        cpu_count: 1.0,
        memory_mb: 128.0,
        app_cache_enable: true,
        event_trace_sampling_count: 0,
    }
}

pub(crate) fn in_memory_store() -> Arc<dyn KVStore> {
    Arc::new(RedbBackend::in_memory().unwrap())
}

/// Facade over an in-memory store with `test_app` registered
pub(crate) fn facade() -> Arc<FacadeService> {
    let facade = Arc::new(FacadeService::new(in_memory_store(), QueueConfig::default()));
    facade.registry().add_app(&app("test_app")).unwrap();
    facade.start().unwrap();
    facade
}
