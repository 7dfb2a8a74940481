//! Placement of task requests onto leased offers.
//!
//! The launch cycle only depends on the `TaskAssigner` trait; the
//! `FirstFitAssigner` shipped here packs each job onto the hosts that can
//! hold most of its shards.

use crate::resource::HardwareResource;
use jobmesh_mesos::{AgentId, Offer, OfferId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One shard waiting for placement
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    /// Task id of the unplaced task context
    pub id: String,
    pub job_name: String,
    pub cpu: f64,
    pub memory_mb: f64,
}

/// A host as seen by placement constraints during one cycle
#[derive(Debug, Clone, Copy)]
pub struct HostState<'a> {
    pub hostname: &'a str,
    pub agent_id: &'a str,
    /// Total offered on the host this cycle, before any assignment
    pub available_cpu: f64,
    pub available_memory_mb: f64,
    /// Requests already tentatively assigned to the host this cycle
    pub assigned: &'a [TaskRequest],
    /// Tasks launched on the host in earlier cycles and not yet ended
    pub running_tasks: usize,
}

/// Outcome of a constraint check
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintResult {
    pub satisfied: bool,
    pub reason: Option<String>,
}

impl ConstraintResult {
    pub fn pass() -> Self {
        Self {
            satisfied: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            reason: Some(reason.into()),
        }
    }
}

/// Hard placement predicate evaluated per (request, host)
pub trait PlacementConstraint: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, request: &TaskRequest, host: &HostState<'_>) -> ConstraintResult;
}

/// A request placed on one offer
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub request: TaskRequest,
    pub hostname: String,
    pub agent_id: AgentId,
    pub offer_id: OfferId,
}

/// Everything placed on one host in a cycle
#[derive(Debug, Clone)]
pub struct HostAssignment {
    pub hostname: String,
    pub agent_id: AgentId,
    /// Committed accessor for each offer the host's launch consumes
    pub offers_used: Vec<HardwareResource>,
    pub tasks: Vec<TaskAssignment>,
}

impl HostAssignment {
    pub fn offer_ids(&self) -> Vec<OfferId> {
        self.offers_used
            .iter()
            .map(|resource| resource.offer_id().clone())
            .collect()
    }

    pub fn resource_for(&self, offer_id: &OfferId) -> Option<&HardwareResource> {
        self.offers_used
            .iter()
            .find(|resource| resource.offer_id() == offer_id)
    }
}

/// A request no host could take
#[derive(Debug, Clone)]
pub struct AssignmentFailure {
    pub request: TaskRequest,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulingResult {
    /// Keyed by hostname
    pub assignments: BTreeMap<String, HostAssignment>,
    pub failures: Vec<AssignmentFailure>,
    /// Leases held past their expiry; they should be declined
    pub expired_offers: Vec<OfferId>,
}

/// Placement engine consumed by the launch cycle and the event handler
pub trait TaskAssigner: Send + Sync {
    /// Lease the new offers and place as many requests as possible.
    ///
    /// Offers consumed by an assignment leave the lease pool; the rest stay
    /// leased for later cycles until they expire.
    fn schedule_once(
        &self,
        requests: &[TaskRequest],
        offers: Vec<Offer>,
        constraints: &[&dyn PlacementConstraint],
    ) -> SchedulingResult;

    /// Record a launched task as running on a host.
    ///
    /// Implementations expose the count to constraints as
    /// `HostState::running_tasks`.
    fn assign(&self, request_id: &str, hostname: &str);

    /// Forget a task that ended
    fn unassign(&self, request_id: &str, hostname: &str);

    fn expire_lease(&self, offer_id: &OfferId);

    fn expire_all_leases(&self);

    fn expire_leases_by_agent(&self, agent_id: &AgentId);
}

/// Configuration for the first-fit assigner
#[derive(Debug, Clone)]
pub struct AssignerConfig {
    /// How long an unused offer stays leased before it is declined
    pub lease_ttl: Duration,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Lease {
    offer: Offer,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct AssignerState {
    leases: BTreeMap<OfferId, Lease>,
    running: HashMap<String, HashSet<String>>,
}

/// First-fit bin packing over the leased offers
#[derive(Debug, Default)]
pub struct FirstFitAssigner {
    config: AssignerConfig,
    state: Mutex<AssignerState>,
}

impl FirstFitAssigner {
    pub fn new(config: AssignerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AssignerState::default()),
        }
    }

    /// Number of offers currently leased
    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }

    /// Request ids recorded as running on a host
    pub fn running_on(&self, hostname: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .running
            .get(hostname)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

/// Offers of one host plus what has been placed there this cycle
struct HostSlot {
    hostname: String,
    agent_id: AgentId,
    total_cpu: f64,
    total_memory_mb: f64,
    resources: Vec<HardwareResource>,
    assigned: Vec<TaskRequest>,
    tasks: Vec<TaskAssignment>,
    running_tasks: usize,
}

impl HostSlot {
    fn fit_count(&self, expected: u32, cpu: f64, memory_mb: f64) -> u32 {
        self.resources
            .iter()
            .map(|resource| resource.calculate_sharding_count(expected, cpu, memory_mb))
            .sum()
    }

    fn state(&self) -> HostState<'_> {
        HostState {
            hostname: &self.hostname,
            agent_id: self.agent_id.as_str(),
            available_cpu: self.total_cpu,
            available_memory_mb: self.total_memory_mb,
            assigned: &self.assigned,
            running_tasks: self.running_tasks,
        }
    }
}

/// Try every offer of a host; returns the failing reason when none fits
fn place_on_host(
    slot: &mut HostSlot,
    request: &TaskRequest,
    constraints: &[&dyn PlacementConstraint],
) -> std::result::Result<(), String> {
    for constraint in constraints {
        let result = constraint.evaluate(request, &slot.state());
        if !result.satisfied {
            return Err(format!(
                "{}: {}",
                constraint.name(),
                result.reason.unwrap_or_default()
            ));
        }
    }

    let Some(resource) = slot
        .resources
        .iter_mut()
        .find(|resource| resource.can_reserve(request.cpu, request.memory_mb))
    else {
        return Err(format!("insufficient resources on {}", slot.hostname));
    };
    resource
        .reserve(request.cpu, request.memory_mb)
        .map_err(|e| e.to_string())?;

    let offer_id = resource.offer_id().clone();
    slot.assigned.push(request.clone());
    slot.tasks.push(TaskAssignment {
        request: request.clone(),
        hostname: slot.hostname.clone(),
        agent_id: slot.agent_id.clone(),
        offer_id,
    });
    Ok(())
}

impl TaskAssigner for FirstFitAssigner {
    fn schedule_once(
        &self,
        requests: &[TaskRequest],
        offers: Vec<Offer>,
        constraints: &[&dyn PlacementConstraint],
    ) -> SchedulingResult {
        let mut state = self.state.lock();
        let now = Instant::now();
        let mut result = SchedulingResult::default();

        for offer in offers {
            state.leases.insert(
                offer.id.clone(),
                Lease {
                    offer,
                    expires_at: now + self.config.lease_ttl,
                },
            );
        }

        let expired: Vec<OfferId> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for offer_id in &expired {
            state.leases.remove(offer_id);
        }
        result.expired_offers = expired;

        let mut slots: BTreeMap<String, HostSlot> = BTreeMap::new();
        let running = &state.running;
        for lease in state.leases.values() {
            let resource = HardwareResource::new(lease.offer.clone());
            let slot = slots
                .entry(lease.offer.hostname.clone())
                .or_insert_with(|| HostSlot {
                    hostname: lease.offer.hostname.clone(),
                    agent_id: lease.offer.agent_id.clone(),
                    total_cpu: 0.0,
                    total_memory_mb: 0.0,
                    resources: Vec::new(),
                    assigned: Vec::new(),
                    tasks: Vec::new(),
                    running_tasks: running
                        .get(&lease.offer.hostname)
                        .map_or(0, |ids| ids.len()),
                });
            slot.total_cpu += resource.available_cpu();
            slot.total_memory_mb += resource.available_memory_mb();
            slot.resources.push(resource);
        }

        // Requests of one job stay together so a job lands on as few hosts as possible
        let mut job_order: Vec<&str> = Vec::new();
        let mut by_job: HashMap<&str, Vec<&TaskRequest>> = HashMap::new();
        for request in requests {
            by_job
                .entry(request.job_name.as_str())
                .or_insert_with(|| {
                    job_order.push(request.job_name.as_str());
                    Vec::new()
                })
                .push(request);
        }

        for job_name in job_order {
            let group = &by_job[job_name];
            let first = group[0];
            let expected = group.len() as u32;

            let mut ranked: Vec<&String> = slots.keys().collect();
            ranked.sort_by_key(|hostname| {
                std::cmp::Reverse(slots[*hostname].fit_count(expected, first.cpu, first.memory_mb))
            });
            let ranked: Vec<String> = ranked.into_iter().cloned().collect();

            for request in group {
                let mut last_reason = "no offers available".to_string();
                let mut placed = false;
                for hostname in &ranked {
                    let Some(slot) = slots.get_mut(hostname) else {
                        continue;
                    };
                    match place_on_host(slot, request, constraints) {
                        Ok(()) => {
                            placed = true;
                            break;
                        }
                        Err(reason) => last_reason = reason,
                    }
                }
                if !placed {
                    debug!(task_id = %request.id, "Unable to place task: {}", last_reason);
                    result.failures.push(AssignmentFailure {
                        request: (*request).clone(),
                        reason: last_reason,
                    });
                }
            }

            for slot in slots.values_mut() {
                for resource in &mut slot.resources {
                    resource.commit();
                }
            }
        }

        for (hostname, slot) in slots {
            if slot.tasks.is_empty() {
                continue;
            }
            for resource in &slot.resources {
                state.leases.remove(resource.offer_id());
            }
            result.assignments.insert(
                hostname,
                HostAssignment {
                    hostname: slot.hostname,
                    agent_id: slot.agent_id,
                    offers_used: slot.resources,
                    tasks: slot.tasks,
                },
            );
        }

        if !requests.is_empty() {
            info!(
                "Placed {} of {} tasks on {} hosts ({} offers still leased)",
                requests.len() - result.failures.len(),
                requests.len(),
                result.assignments.len(),
                state.leases.len()
            );
        }

        result
    }

    fn assign(&self, request_id: &str, hostname: &str) {
        self.state
            .lock()
            .running
            .entry(hostname.to_string())
            .or_default()
            .insert(request_id.to_string());
    }

    fn unassign(&self, request_id: &str, hostname: &str) {
        let mut state = self.state.lock();
        if let Some(ids) = state.running.get_mut(hostname) {
            ids.remove(request_id);
            if ids.is_empty() {
                state.running.remove(hostname);
            }
        }
    }

    fn expire_lease(&self, offer_id: &OfferId) {
        if self.state.lock().leases.remove(offer_id).is_some() {
            debug!(offer_id = %offer_id, "Expired lease");
        }
    }

    fn expire_all_leases(&self) {
        let mut state = self.state.lock();
        debug!("Expiring all {} leases", state.leases.len());
        state.leases.clear();
    }

    fn expire_leases_by_agent(&self, agent_id: &AgentId) {
        let mut state = self.state.lock();
        state.leases.retain(|_, lease| &lease.offer.agent_id != agent_id);
    }
}
