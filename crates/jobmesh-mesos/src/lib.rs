// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! Jobmesh Mesos - Resource-manager client for the Jobmesh scheduler
//!
//! This crate provides:
//! - Wire types of the v1 scheduler HTTP API
//! - The `SchedulerDriver` trait and its HTTP implementation
//! - RecordIO decoding of the subscription stream
//! - The cluster state reader (`StateClient`)
//! - In-memory test doubles

pub mod driver;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod recordio;
pub mod state;
pub mod traits;

// Re-export primary types
pub use driver::{FrameworkConfig, HttpSchedulerDriver};
pub use error::{MesosError, Result};
pub use mock::{DriverCall, RecordingDriver, StaticClusterState};
pub use protocol::{
    AgentId, CommandInfo, CommandUri, ExecutorId, ExecutorInfo, FrameworkId, Offer, OfferId,
    Resource, SchedulerEvent, TaskId, TaskInfo, TaskState, TaskStatus,
};
pub use state::{StateClient, StateClientConfig};
pub use traits::{ClusterState, ExecutorStateInfo, Sandbox, SchedulerDriver};
