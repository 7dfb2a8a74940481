/// Key encoder for the scheduler's storage layout
///
/// ```text
/// config/job/{job}
/// config/app/{app}
/// state/ready/{job}
/// state/running/{job}/{task_id}
/// state/failover/{job}/{meta_info}
/// state/disable/job/{job}
/// state/disable/app/{app}
/// framework/id
/// ```
///
/// Job and app names never contain `/`, so a `{job}/` prefix selects exactly
/// one job's entries.
pub struct KeyEncoder;

impl KeyEncoder {
    pub const JOB_CONFIG_PREFIX: &'static str = "config/job/";
    pub const APP_CONFIG_PREFIX: &'static str = "config/app/";
    pub const READY_PREFIX: &'static str = "state/ready/";
    pub const RUNNING_PREFIX: &'static str = "state/running/";
    pub const FAILOVER_PREFIX: &'static str = "state/failover/";
    pub const DISABLED_JOB_PREFIX: &'static str = "state/disable/job/";
    pub const DISABLED_APP_PREFIX: &'static str = "state/disable/app/";
    pub const FRAMEWORK_ID: &'static str = "framework/id";

    pub fn job_config(job_name: &str) -> String {
        format!("{}{}", Self::JOB_CONFIG_PREFIX, job_name)
    }

    pub fn app_config(app_name: &str) -> String {
        format!("{}{}", Self::APP_CONFIG_PREFIX, app_name)
    }

    pub fn ready(job_name: &str) -> String {
        format!("{}{}", Self::READY_PREFIX, job_name)
    }

    pub fn running(job_name: &str, task_id: &str) -> String {
        format!("{}{}/{}", Self::RUNNING_PREFIX, job_name, task_id)
    }

    /// Prefix covering every running task of one job
    pub fn running_job_prefix(job_name: &str) -> String {
        format!("{}{}/", Self::RUNNING_PREFIX, job_name)
    }

    pub fn failover(job_name: &str, meta_info: &str) -> String {
        format!("{}{}/{}", Self::FAILOVER_PREFIX, job_name, meta_info)
    }

    /// Prefix covering every failover entry of one job
    pub fn failover_job_prefix(job_name: &str) -> String {
        format!("{}{}/", Self::FAILOVER_PREFIX, job_name)
    }

    pub fn disabled_job(job_name: &str) -> String {
        format!("{}{}", Self::DISABLED_JOB_PREFIX, job_name)
    }

    pub fn disabled_app(app_name: &str) -> String {
        format!("{}{}", Self::DISABLED_APP_PREFIX, app_name)
    }

    /// Last path segment of a key under `prefix`, if the key belongs to it
    pub fn strip_prefix<'a>(key: &'a [u8], prefix: &str) -> Option<&'a str> {
        let key = std::str::from_utf8(key).ok()?;
        key.strip_prefix(prefix)
    }
}
