//! Ready, running and failover queues.
//!
//! All three are durable in the key-value store. A shard is in at most one
//! of them at a time: the launch cycle moves it from ready/failover to
//! running, status callbacks move it out of running.

pub mod failover;
pub mod ready;
pub mod running;

pub use failover::{FailoverEntry, FailoverQueue};
pub use ready::{ReadyEntry, ReadyQueue};
pub use running::{RunningQueue, RunningTask};

/// Queue limits
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum entries in the ready queue and in the failover queue
    pub job_state_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            job_state_queue_size: 10_000,
        }
    }
}
