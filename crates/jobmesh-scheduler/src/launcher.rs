//! Periodic task launch cycle.
//!
//! Each cycle drains the offer buffer, asks the assigner to place every
//! pending shard, turns the accepted placements into launch descriptors and
//! submits them host by host. Queue state only changes for hosts whose
//! submission succeeded, except that shards of a READY job left behind by a
//! failed host move to the failover queue once the job's other shards run.

use crate::constraint::AppConstraint;
use crate::error::Result;
use crate::event_bus::TraceEventBus;
use crate::facade::FacadeService;
use crate::offer_buffer::OfferBuffer;
use crate::solver::{
    HostAssignment, PlacementConstraint, TaskAssigner, TaskAssignment, TaskRequest,
};
use jobmesh_core::{ExecutionType, JobContext, JobStatusTraceEvent, TaskContext, TraceState};
use jobmesh_mesos::{ClusterState, OfferId, SchedulerDriver, TaskInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Launch cycle timing
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub launched: usize,
    pub skipped: usize,
    pub failed_submissions: usize,
    pub declined_offers: usize,
}

/// A task ready for submission
struct PreparedTask {
    context: TaskContext,
    request_id: String,
    original_task_id: Option<String>,
    info: TaskInfo,
}

/// Everything one host assignment will submit
struct HostLaunch {
    hostname: String,
    offer_ids: Vec<OfferId>,
    tasks: Vec<PreparedTask>,
}

pub struct TaskLauncher {
    facade: Arc<FacadeService>,
    offers: Arc<OfferBuffer>,
    assigner: Arc<dyn TaskAssigner>,
    constraint: Arc<AppConstraint>,
    cluster_state: Arc<dyn ClusterState>,
    driver: Arc<dyn SchedulerDriver>,
    events: TraceEventBus,
    config: LaunchConfig,
}

impl TaskLauncher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        facade: Arc<FacadeService>,
        offers: Arc<OfferBuffer>,
        assigner: Arc<dyn TaskAssigner>,
        constraint: Arc<AppConstraint>,
        cluster_state: Arc<dyn ClusterState>,
        driver: Arc<dyn SchedulerDriver>,
        events: TraceEventBus,
        config: LaunchConfig,
    ) -> Self {
        Self {
            facade,
            offers,
            assigner,
            constraint,
            cluster_state,
            driver,
            events,
            config,
        }
    }

    /// Run cycles until the token is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting task launcher (interval {:?}, initial delay {:?})",
            self.config.interval, self.config.initial_delay
        );

        tokio::select! {
            _ = token.cancelled() => {
                info!("Task launcher cancelled before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }

        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Task launcher shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.launch_cycle().await {
                        Ok(report) if report.launched > 0 || report.failed_submissions > 0 => {
                            info!(
                                launched = report.launched,
                                skipped = report.skipped,
                                failed_submissions = report.failed_submissions,
                                declined_offers = report.declined_offers,
                                "Launch cycle complete"
                            );
                        }
                        Ok(report) => debug!(?report, "Launch cycle complete"),
                        Err(e) => error!("Launch cycle failed: {}", e),
                    }
                }
            }
        }
    }

    /// Run one launch cycle
    pub async fn launch_cycle(&self) -> Result<LaunchReport> {
        let mut report = LaunchReport::default();
        let contexts = self.facade.get_eligible_job_context()?;
        let offers = self.offers.drain();

        if contexts.is_empty() {
            // Still lease the offers so idle ones expire and get declined
            let result = self.assigner.schedule_once(&[], offers, &[]);
            report.declined_offers += self.decline(&result.expired_offers).await;
            return Ok(report);
        }

        let _residency = self
            .constraint
            .load_residency(self.cluster_state.as_ref())
            .await;

        let requests = build_requests(&contexts);
        let constraints: [&dyn PlacementConstraint; 1] = [self.constraint.as_ref()];
        let result = self.assigner.schedule_once(&requests, offers, &constraints);
        if !result.failures.is_empty() {
            debug!("{} tasks could not be placed this cycle", result.failures.len());
        }

        let violations = integrity_violations(&contexts, result.assignments.values());

        // Prepare every host before submitting any, so running checks see
        // the queue state from the start of the cycle
        let launches: Vec<HostLaunch> = result
            .assignments
            .values()
            .map(|host| self.prepare_host(host, &violations, &mut report))
            .collect();

        let mut launched = Vec::new();
        let mut unlaunched = Vec::new();
        for launch in launches {
            if launch.tasks.is_empty() {
                report.declined_offers += self.decline(&launch.offer_ids).await;
                continue;
            }
            self.submit(launch, &mut launched, &mut unlaunched, &mut report)
                .await;
        }

        if !launched.is_empty() {
            let contexts: Vec<TaskContext> =
                launched.iter().map(|(context, _)| context.clone()).collect();
            if let Err(e) = self.facade.remove_launch_tasks_from_queue(&contexts) {
                error!("Failed to remove {} launched tasks from queues: {}", contexts.len(), e);
            }
            self.requeue_unlaunched_shards(&contexts, &unlaunched);
            for (context, original_task_id) in launched {
                let mut event = JobStatusTraceEvent::from_task(&context, TraceState::TaskStaging, "");
                if let Some(original) = original_task_id {
                    event = event.with_original_task_id(original);
                }
                self.events.publish(event);
            }
        }

        report.declined_offers += self.decline(&result.expired_offers).await;
        Ok(report)
    }

    fn prepare_host(
        &self,
        host: &HostAssignment,
        violations: &HashSet<String>,
        report: &mut LaunchReport,
    ) -> HostLaunch {
        let mut tasks = Vec::new();
        for assignment in &host.tasks {
            match self.prepare_task(host, assignment, violations) {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(task_id = %assignment.request.id, "Failed to prepare task: {}", e);
                    report.skipped += 1;
                }
            }
        }

        HostLaunch {
            hostname: host.hostname.clone(),
            offer_ids: host.offer_ids(),
            tasks,
        }
    }

    /// Returns `None` when the task must not launch this cycle
    fn prepare_task(
        &self,
        host: &HostAssignment,
        assignment: &TaskAssignment,
        violations: &HashSet<String>,
    ) -> Result<Option<PreparedTask>> {
        let registry = self.facade.registry();
        let request_id = &assignment.request.id;
        let context: TaskContext = match request_id.parse() {
            Ok(context) => context,
            Err(e) => {
                warn!(task_id = %request_id, "Unparseable placement request: {}", e);
                return Ok(None);
            }
        };
        let job_name = context.job_name().to_string();

        if violations.contains(&job_name) {
            return Ok(None);
        }
        if self.facade.is_running(&context) {
            debug!(task_id = %request_id, "Already running, skipping");
            return Ok(None);
        }
        let Some(job) = registry.job(&job_name)? else {
            warn!(job_name = %job_name, "Job configuration missing, skipping task");
            return Ok(None);
        };
        if self.facade.is_disabled(&job)? {
            debug!(job_name = %job_name, "Job disabled, skipping task");
            return Ok(None);
        }
        let Some(app) = registry.app(&job.app_name)? else {
            warn!(app_name = %job.app_name, job_name = %job_name, "App configuration missing, skipping task");
            return Ok(None);
        };
        let Some(resource) = host.resource_for(&assignment.offer_id) else {
            warn!(offer_id = %assignment.offer_id, "Assigned offer not in host assignment");
            return Ok(None);
        };

        let placed = context.with_agent_id(host.agent_id.as_str());
        let info = match resource.build_launch_descriptor(&placed, &job, &app) {
            Ok(info) => info,
            Err(e) => {
                warn!(task_id = %placed, "Failed to build launch descriptor: {}", e);
                return Ok(None);
            }
        };
        let original_task_id = match placed.execution_type() {
            ExecutionType::Failover => self.facade.failover_task_id(placed.meta_info())?,
            ExecutionType::Ready => None,
        };

        self.facade.add_mapping(&placed.id(), &host.hostname);
        self.assigner.assign(request_id, &host.hostname);
        Ok(Some(PreparedTask {
            context: placed,
            request_id: request_id.clone(),
            original_task_id,
            info,
        }))
    }

    async fn submit(
        &self,
        launch: HostLaunch,
        launched: &mut Vec<(TaskContext, Option<String>)>,
        unlaunched: &mut Vec<TaskContext>,
        report: &mut LaunchReport,
    ) {
        let infos: Vec<TaskInfo> = launch.tasks.iter().map(|task| task.info.clone()).collect();

        match self.driver.launch_tasks(&launch.offer_ids, infos).await {
            Ok(()) => {
                info!(
                    hostname = %launch.hostname,
                    "Launched {} tasks on {} offers",
                    launch.tasks.len(),
                    launch.offer_ids.len()
                );
                for task in launch.tasks {
                    // The master already has the task; keep it out of the queues regardless
                    if let Err(e) = self.facade.add_running(&task.context) {
                        error!(task_id = %task.context, "Failed to record running task: {}", e);
                    }
                    report.launched += 1;
                    launched.push((task.context, task.original_task_id));
                }
            }
            Err(e) => {
                error!(hostname = %launch.hostname, "Failed to launch tasks: {}", e);
                report.failed_submissions += 1;
                for task in &launch.tasks {
                    if let Some(hostname) = self.facade.pop_mapping(&task.context.id()) {
                        self.assigner.unassign(&task.request_id, &hostname);
                    }
                }
                report.declined_offers += self.decline(&launch.offer_ids).await;
                unlaunched.extend(launch.tasks.into_iter().map(|task| task.context));
            }
        }
    }

    /// Shards of READY jobs whose other shards launched lost their ready
    /// entry with the launch; queue them for failover so they still run
    fn requeue_unlaunched_shards(&self, launched: &[TaskContext], unlaunched: &[TaskContext]) {
        let started: HashSet<&str> = launched
            .iter()
            .filter(|context| context.execution_type() == ExecutionType::Ready)
            .map(|context| context.job_name())
            .collect();

        for context in unlaunched {
            if context.execution_type() != ExecutionType::Ready
                || !started.contains(context.job_name())
            {
                continue;
            }
            match self.facade.record_unlaunched_task(context) {
                Ok(true) => warn!(task_id = %context, "Shard not launched with the rest of its job, queued for failover"),
                Ok(false) => warn!(task_id = %context, "Shard not launched with the rest of its job and not queued"),
                Err(e) => error!(task_id = %context, "Failed to queue unlaunched shard: {}", e),
            }
        }
    }

    /// Decline offers, logging failures; returns how many were declined
    async fn decline(&self, offer_ids: &[OfferId]) -> usize {
        if offer_ids.is_empty() {
            return 0;
        }
        match self.driver.decline_offers(offer_ids).await {
            Ok(()) => offer_ids.len(),
            Err(e) => {
                warn!("Failed to decline {} offers: {}", offer_ids.len(), e);
                0
            }
        }
    }
}

/// One placement request per shard of every job context
fn build_requests(contexts: &[JobContext]) -> Vec<TaskRequest> {
    contexts
        .iter()
        .flat_map(|job_context| {
            job_context
                .assigned_sharding_items
                .iter()
                .map(move |item| {
                    let task = TaskContext::new(
                        job_context.job_name(),
                        vec![*item],
                        job_context.execution_type,
                    );
                    TaskRequest {
                        id: task.id(),
                        job_name: job_context.job_name().to_string(),
                        cpu: job_context.job_config.cpu_count,
                        memory_mb: job_context.job_config.memory_mb,
                    }
                })
        })
        .collect()
}

/// READY jobs whose placed task count differs from their shard total
fn integrity_violations<'a>(
    contexts: &[JobContext],
    assignments: impl Iterator<Item = &'a HostAssignment>,
) -> HashSet<String> {
    let mut placed: HashMap<&str, u32> = HashMap::new();
    for host in assignments {
        for task in &host.tasks {
            *placed.entry(task.request.job_name.as_str()).or_default() += 1;
        }
    }

    contexts
        .iter()
        .filter(|context| context.execution_type == ExecutionType::Ready)
        .filter_map(|context| {
            let count = placed.get(context.job_name()).copied().unwrap_or(0);
            let expected = context.job_config.sharding_total_count;
            if count > 0 && count != expected {
                warn!(
                    job_name = %context.job_name(),
                    "Integrity violation: {} of {} shards placed, launching none this cycle",
                    count,
                    expected
                );
                Some(context.job_name().to_string())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use crate::solver::FirstFitAssigner;
    use crate::test_support::{app, facade, in_memory_store, job};
    use bytes::Bytes;
    use jobmesh_core::MetaInfo;
    use jobmesh_mesos::{Offer, RecordingDriver, Resource, StaticClusterState};
    use jobmesh_storage::{KVStore, KeyEncoder, StorageError, WriteOp};
    use parking_lot::Mutex;

    /// Store whose reads of one key fail until cleared
    struct FailingReads {
        inner: Arc<dyn KVStore>,
        failing_key: Mutex<Option<Vec<u8>>>,
    }

    impl FailingReads {
        fn new() -> Self {
            Self {
                inner: in_memory_store(),
                failing_key: Mutex::new(None),
            }
        }

        fn fail_reads_of(&self, key: Option<String>) {
            *self.failing_key.lock() = key.map(String::into_bytes);
        }
    }

    impl KVStore for FailingReads {
        fn get(&self, key: &[u8]) -> jobmesh_storage::Result<Option<Bytes>> {
            if self.failing_key.lock().as_deref() == Some(key) {
                return Err(StorageError::operation_failed(
                    "get",
                    std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable"),
                ));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> jobmesh_storage::Result<()> {
            self.inner.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> jobmesh_storage::Result<()> {
            self.inner.delete(key)
        }

        fn scan(&self, prefix: &[u8]) -> jobmesh_storage::Result<Vec<(Bytes, Bytes)>> {
            self.inner.scan(prefix)
        }

        fn keys_with_prefix(&self, prefix: &[u8]) -> jobmesh_storage::Result<Vec<Bytes>> {
            self.inner.keys_with_prefix(prefix)
        }

        fn delete_prefix(&self, prefix: &[u8]) -> jobmesh_storage::Result<usize> {
            self.inner.delete_prefix(prefix)
        }

        fn exists(&self, key: &[u8]) -> jobmesh_storage::Result<bool> {
            self.inner.exists(key)
        }

        fn write_batch(&self, ops: Vec<WriteOp>) -> jobmesh_storage::Result<()> {
            self.inner.write_batch(ops)
        }

        fn update_with(
            &self,
            key: &[u8],
            f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
        ) -> jobmesh_storage::Result<()> {
            self.inner.update_with(key, f)
        }
    }

    struct Harness {
        facade: Arc<FacadeService>,
        offers: Arc<OfferBuffer>,
        driver: Arc<RecordingDriver>,
        events: TraceEventBus,
        launcher: TaskLauncher,
    }

    fn harness() -> Harness {
        harness_with(facade())
    }

    fn harness_with(facade: Arc<FacadeService>) -> Harness {
        let offers = Arc::new(OfferBuffer::new());
        let driver = Arc::new(RecordingDriver::new());
        let events = TraceEventBus::default();
        let constraint = Arc::new(AppConstraint::new(facade.registry().clone()));
        let launcher = TaskLauncher::new(
            facade.clone(),
            offers.clone(),
            Arc::new(FirstFitAssigner::default()),
            constraint,
            Arc::new(StaticClusterState::default()),
            driver.clone(),
            events.clone(),
            LaunchConfig::default(),
        );
        Harness {
            facade,
            offers,
            driver,
            events,
            launcher,
        }
    }

    fn offer(id: &str, agent: &str, cpus: f64, mem: f64) -> Offer {
        Offer::new(
            id,
            agent,
            &format!("host-{}", agent),
            vec![Resource::scalar("cpus", cpus), Resource::scalar("mem", mem)],
        )
    }

    #[tokio::test]
    async fn test_launches_all_shards_of_ready_job() {
        let h = harness();
        h.facade.registry().add_job(&job("test_job")).unwrap();
        h.facade.enqueue_job("test_job").unwrap();
        h.offers.push(offer("o1", "S0", 10.0, 2048.0));
        let mut rx = h.events.subscribe();

        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report.launched, 3);
        let tasks = h.driver.launched_tasks();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|task| task.agent_id.as_str() == "S0"));
        assert_eq!(h.facade.get_all_running_tasks()["test_job"].len(), 3);
        assert_eq!(h.facade.ready().count("test_job").unwrap(), 0);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.state, TraceState::TaskStaging);
        assert_eq!(event.slave_id, "S0");
    }

    #[tokio::test]
    async fn test_partial_placement_is_integrity_violation() {
        let h = harness();
        h.facade.registry().add_job(&job("test_job")).unwrap();
        h.facade.enqueue_job("test_job").unwrap();
        // Room for the executor and two shards only
        h.offers.push(offer("o1", "S0", 3.0, 2048.0));

        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report.launched, 0);
        assert_eq!(report.skipped, 2);
        assert!(h.driver.launched_tasks().is_empty());
        assert_eq!(h.driver.declined_offers(), vec![OfferId::new("o1")]);
        assert_eq!(h.facade.ready().count("test_job").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failover_relaunch_carries_original_task_id() {
        let h = harness();
        h.facade.registry().add_job(&job("test_job")).unwrap();
        let failed = TaskContext::new("test_job", vec![1], ExecutionType::Ready).with_agent_id("S9");
        h.facade.record_failover_task(&failed).unwrap();
        h.offers.push(offer("o1", "S0", 4.0, 2048.0));
        let mut rx = h.events.subscribe();

        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report.launched, 1);
        assert!(h.facade.failover().entries().unwrap().is_empty());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.execution_type, ExecutionType::Failover);
        assert_eq!(event.original_task_id, Some(failed.id()));
    }

    #[tokio::test]
    async fn test_disabled_job_not_launched() {
        let h = harness();
        h.facade.registry().add_job(&job("test_job")).unwrap();
        h.facade.enqueue_job("test_job").unwrap();
        h.facade.registry().disable_job("test_job").unwrap();
        h.offers.push(offer("o1", "S0", 10.0, 2048.0));

        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report.launched, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(h.driver.declined_offers(), vec![OfferId::new("o1")]);
    }

    #[tokio::test]
    async fn test_no_work_keeps_offers_leased() {
        let h = harness();
        h.offers.push(offer("o1", "S0", 10.0, 2048.0));

        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report, LaunchReport::default());
        assert!(h.offers.is_empty());
        assert!(h.driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shards_of_failed_host_move_to_failover() {
        let h = harness();
        h.facade.registry().add_job(&job("test_job")).unwrap();
        h.facade.enqueue_job("test_job").unwrap();
        // Executor plus two shards on S0, executor plus one shard on S1
        h.offers.push(offer("o1", "S0", 3.0, 2048.0));
        h.offers.push(offer("o2", "S1", 2.0, 2048.0));
        h.driver.fail_launches_on("S1");

        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report.launched, 2);
        assert_eq!(report.failed_submissions, 1);
        assert_eq!(h.driver.declined_offers(), vec![OfferId::new("o2")]);
        let running = &h.facade.get_all_running_tasks()["test_job"];
        assert_eq!(running.len(), 2);
        assert_eq!(h.facade.ready().count("test_job").unwrap(), 0);

        let entries = h.facade.failover().entries().unwrap();
        assert_eq!(entries.len(), 1);
        let missing: MetaInfo = entries[0].meta_info.parse().unwrap();
        assert!(running
            .iter()
            .all(|task| task.meta_info().sharding_items() != missing.sharding_items()));

        // The left-behind shard relaunches on the next offer
        h.offers.push(offer("o3", "S2", 2.0, 2048.0));
        let report = h.launcher.launch_cycle().await.unwrap();
        assert_eq!(report.launched, 1);
        assert!(h.facade.failover().entries().unwrap().is_empty());
        assert_eq!(h.facade.get_all_running_tasks()["test_job"].len(), 3);
    }

    #[tokio::test]
    async fn test_store_error_declines_host_offers() {
        let store = Arc::new(FailingReads::new());
        let facade = Arc::new(FacadeService::new(store.clone(), QueueConfig::default()));
        facade.registry().add_app(&app("test_app")).unwrap();
        facade.registry().add_job(&job("test_job")).unwrap();
        facade.enqueue_job("test_job").unwrap();
        facade.start().unwrap();
        let h = harness_with(facade);
        h.offers.push(offer("o1", "S0", 10.0, 2048.0));

        store.fail_reads_of(Some(KeyEncoder::app_config("test_app")));
        let report = h.launcher.launch_cycle().await.unwrap();

        assert_eq!(report.launched, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(h.driver.declined_offers(), vec![OfferId::new("o1")]);
        assert_eq!(h.facade.ready().count("test_job").unwrap(), 1);

        store.fail_reads_of(None);
        h.offers.push(offer("o2", "S0", 10.0, 2048.0));
        let report = h.launcher.launch_cycle().await.unwrap();
        assert_eq!(report.launched, 3);
        assert_eq!(h.facade.ready().count("test_job").unwrap(), 0);
    }
}
