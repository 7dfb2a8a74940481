//! Jobmesh Scheduler - Offer matching and task lifecycle
//!
//! This crate provides:
//! - The offer buffer and per-offer hardware accounting
//! - Placement (`TaskAssigner`) with the app residency constraint
//! - Durable ready, running and failover queues behind a facade
//! - The launch cycle, the event engine and the reconciliation loop

pub mod constraint;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod facade;
pub mod launcher;
pub mod offer_buffer;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod resource;
pub mod solver;
pub mod statistics;
mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use constraint::{AppConstraint, ResidencyGuard};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use event_bus::TraceEventBus;
pub use facade::FacadeService;
pub use launcher::{LaunchConfig, LaunchReport, TaskLauncher};
pub use offer_buffer::OfferBuffer;
pub use queue::QueueConfig;
pub use reconcile::{ReconcileConfig, ReconcileService};
pub use registry::ConfigRegistry;
pub use resource::{HardwareResource, LaunchKind};
pub use solver::{
    AssignerConfig, FirstFitAssigner, HostAssignment, PlacementConstraint, SchedulingResult,
    TaskAssigner, TaskRequest,
};
pub use statistics::{StatisticsSnapshot, TaskStatistics};
