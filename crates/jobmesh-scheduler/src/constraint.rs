//! Placement constraint charging the executor overhead of apps not yet
//! running on a host.

use crate::registry::ConfigRegistry;
use crate::resource::{CPUS, MEM};
use crate::solver::{ConstraintResult, HostState, PlacementConstraint, TaskRequest};
use jobmesh_core::context::app_name_from_executor_id;
use jobmesh_mesos::ClusterState;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const EPSILON: f64 = 1e-9;

/// Rejects a host when the tasks placed on it plus the one-time executor
/// overhead of every non-resident app exceed what the host offers
pub struct AppConstraint {
    registry: Arc<ConfigRegistry>,
    /// app name -> agent ids where its executor is alive
    residency: RwLock<HashMap<String, HashSet<String>>>,
}

/// Clears the residency cache when dropped
pub struct ResidencyGuard<'a> {
    constraint: &'a AppConstraint,
}

impl Drop for ResidencyGuard<'_> {
    fn drop(&mut self) {
        self.constraint.clear_residency();
    }
}

impl AppConstraint {
    pub fn new(registry: Arc<ConfigRegistry>) -> Self {
        Self {
            registry,
            residency: RwLock::new(HashMap::new()),
        }
    }

    /// Fill the residency cache for one cycle.
    ///
    /// A failed fetch leaves the cache empty, so every app is charged its
    /// overhead.
    pub async fn load_residency(&self, cluster_state: &dyn ClusterState) -> ResidencyGuard<'_> {
        match cluster_state.executors(None).await {
            Ok(executors) => {
                let mut residency: HashMap<String, HashSet<String>> = HashMap::new();
                for executor in executors {
                    residency
                        .entry(app_name_from_executor_id(&executor.id).to_string())
                        .or_default()
                        .insert(executor.slave_id);
                }
                debug!("Loaded residency of {} apps", residency.len());
                *self.residency.write() = residency;
            }
            Err(e) => {
                warn!("Failed to load executor residency, charging every app: {}", e);
                self.clear_residency();
            }
        }
        ResidencyGuard { constraint: self }
    }

    pub fn clear_residency(&self) {
        self.residency.write().clear();
    }

    pub fn is_resident(&self, app_name: &str, agent_id: &str) -> bool {
        self.residency
            .read()
            .get(app_name)
            .is_some_and(|agents| agents.contains(agent_id))
    }

    fn app_overhead(&self, job_name: &str) -> Option<(String, f64, f64)> {
        let job = match self.registry.job(job_name) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_name = %job_name, "Job configuration missing, constraint passes");
                return None;
            }
            Err(e) => {
                warn!(job_name = %job_name, "Failed to read job configuration: {}", e);
                return None;
            }
        };
        match self.registry.app(&job.app_name) {
            Ok(Some(app)) => Some((app.app_name, app.cpu_count, app.memory_mb)),
            Ok(None) => {
                warn!(app_name = %job.app_name, "App configuration missing, constraint passes");
                None
            }
            Err(e) => {
                warn!(app_name = %job.app_name, "Failed to read app configuration: {}", e);
                None
            }
        }
    }
}

impl PlacementConstraint for AppConstraint {
    fn name(&self) -> &str {
        "AppConstraint"
    }

    fn evaluate(&self, request: &TaskRequest, host: &HostState<'_>) -> ConstraintResult {
        let mut cpu = 0.0;
        let mut memory = 0.0;
        let mut counted_apps = HashSet::new();

        for task in host.assigned.iter().chain(std::iter::once(request)) {
            let Some((app_name, app_cpu, app_memory)) = self.app_overhead(&task.job_name) else {
                return ConstraintResult::pass();
            };
            cpu += task.cpu;
            memory += task.memory_mb;
            if !self.is_resident(&app_name, host.agent_id) && counted_apps.insert(app_name) {
                cpu += app_cpu;
                memory += app_memory;
            }
        }

        if cpu > host.available_cpu + EPSILON {
            return ConstraintResult::fail(format!(
                "{} needed {:.2}, host {} offers {:.2}",
                CPUS, cpu, host.hostname, host.available_cpu
            ));
        }
        if memory > host.available_memory_mb + EPSILON {
            return ConstraintResult::fail(format!(
                "{} needed {:.0}, host {} offers {:.0}",
                MEM, memory, host.hostname, host.available_memory_mb
            ));
        }
        ConstraintResult::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{app, in_memory_store, job};
    use jobmesh_mesos::StaticClusterState;

    fn constraint() -> AppConstraint {
        let registry = Arc::new(ConfigRegistry::new(in_memory_store()));
        registry.add_app(&app("test_app")).unwrap();
        registry.add_job(&job("test_job")).unwrap();
        AppConstraint::new(registry)
    }

    fn request(job_name: &str, item: u32) -> TaskRequest {
        TaskRequest {
            id: format!("{}@-@{}@-@READY@-@unassigned-slave@-@u", job_name, item),
            job_name: job_name.to_string(),
            cpu: 1.0,
            memory_mb: 128.0,
        }
    }

    fn host<'a>(cpu: f64, memory: f64, assigned: &'a [TaskRequest]) -> HostState<'a> {
        HostState {
            hostname: "host0",
            agent_id: "S0",
            available_cpu: cpu,
            available_memory_mb: memory,
            assigned,
            running_tasks: 0,
        }
    }

    #[test]
    fn test_overhead_charged_once_per_app() {
        let constraint = constraint();
        let assigned = vec![request("test_job", 0)];

        // 2 tasks + 1 executor = 3 cpu, 384 mem
        assert!(constraint
            .evaluate(&request("test_job", 1), &host(3.0, 384.0, &assigned))
            .satisfied);
        let result = constraint.evaluate(&request("test_job", 1), &host(2.5, 384.0, &assigned));
        assert!(!result.satisfied);
        assert!(result.reason.unwrap().contains("cpus"));
        assert!(!constraint
            .evaluate(&request("test_job", 1), &host(3.0, 383.0, &assigned))
            .satisfied);
    }

    #[tokio::test]
    async fn test_resident_app_not_charged() {
        let constraint = constraint();
        let cluster = StaticClusterState::default();
        cluster.add_executor("test_app", "S0");

        {
            let _guard = constraint.load_residency(&cluster).await;
            assert!(constraint.is_resident("test_app", "S0"));
            assert!(constraint
                .evaluate(&request("test_job", 0), &host(1.0, 128.0, &[]))
                .satisfied);
        }

        // Guard dropped, cache cleared
        assert!(!constraint.is_resident("test_app", "S0"));
        assert!(!constraint
            .evaluate(&request("test_job", 0), &host(1.0, 128.0, &[]))
            .satisfied);
    }

    #[tokio::test]
    async fn test_failed_fetch_charges_every_app() {
        let constraint = constraint();
        let cluster = StaticClusterState::default();
        cluster.add_executor("test_app", "S0");
        cluster.set_unavailable(true);

        let _guard = constraint.load_residency(&cluster).await;
        assert!(!constraint.is_resident("test_app", "S0"));
    }

    #[test]
    fn test_missing_config_passes() {
        let constraint = constraint();
        assert!(constraint
            .evaluate(&request("unknown_job", 0), &host(0.0, 0.0, &[]))
            .satisfied);
    }
}
