//! YAML bootstrap file of apps and jobs

use jobmesh_core::{from_yaml, CloudAppConfiguration, CloudJobConfiguration};
use jobmesh_scheduler::FacadeService;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Apps and jobs to register, plus transient jobs to trigger once
#[derive(Debug, Default, Deserialize)]
pub struct BootstrapFile {
    #[serde(default)]
    pub apps: Vec<CloudAppConfiguration>,
    #[serde(default)]
    pub jobs: Vec<CloudJobConfiguration>,
    /// Job names queued for one launch after registration
    #[serde(default)]
    pub trigger: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub apps: usize,
    pub jobs: usize,
    pub triggered: usize,
}

impl BootstrapFile {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("Failed to read '{}': {}", path.display(), e))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> miette::Result<Self> {
        from_yaml(raw).map_err(|e| miette::miette!("Invalid bootstrap file: {}", e))
    }

    /// Register apps before jobs, then queue the triggered jobs
    pub fn apply(&self, facade: &FacadeService) -> miette::Result<ImportSummary> {
        let registry = facade.registry();
        for app in &self.apps {
            registry
                .add_app(app)
                .map_err(|e| miette::miette!("Failed to register app '{}': {}", app.app_name, e))?;
        }
        for job in &self.jobs {
            if registry
                .app(&job.app_name)
                .map_err(|e| miette::miette!("Failed to read app '{}': {}", job.app_name, e))?
                .is_none()
            {
                return Err(miette::miette!(
                    help = "List the app under `apps` or import it first",
                    "Job '{}' references unknown app '{}'",
                    job.job_name,
                    job.app_name
                ));
            }
            registry
                .add_job(job)
                .map_err(|e| miette::miette!("Failed to register job '{}': {}", job.job_name, e))?;
        }
        for job_name in &self.trigger {
            facade
                .enqueue_job(job_name)
                .map_err(|e| miette::miette!("Failed to trigger job '{}': {}", job_name, e))?;
        }

        let summary = ImportSummary {
            apps: self.apps.len(),
            jobs: self.jobs.len(),
            triggered: self.trigger.len(),
        };
        info!(
            apps = summary.apps,
            jobs = summary.jobs,
            triggered = summary.triggered,
            "Imported bootstrap file"
        );
        Ok(summary)
    }
}
