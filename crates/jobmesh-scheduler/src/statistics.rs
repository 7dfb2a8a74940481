use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Task run counters since scheduler start
#[derive(Debug)]
pub struct TaskStatistics {
    succeeded: AtomicU64,
    failed: AtomicU64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
}

impl Default for TaskStatistics {
    fn default() -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }
}

impl TaskStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_run_successfully(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_run_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }
}
