// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// A reservation asked for more than the offer has left
    #[error("Insufficient {resource} on offer {offer_id}: requested {requested}, available {available}")]
    #[diagnostic(
        code(scheduler::insufficient_resources),
        help("Check `can_reserve` before reserving; a failed reservation leaves the offer unchanged")
    )]
    InsufficientResources {
        offer_id: String,
        resource: String,
        requested: f64,
        available: f64,
    },

    /// A job or app configuration is not registered
    #[error("{kind} configuration not found: {name}")]
    #[diagnostic(
        code(scheduler::config_not_found),
        help("Register the {kind} configuration (e.g. with `jobmesh import`) before scheduling it")
    )]
    ConfigNotFound {
        kind: String,
        name: String,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    #[diagnostic(
        code(scheduler::storage_error),
        help("Check the underlying storage system")
    )]
    StorageError(#[from] jobmesh_storage::StorageError),

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("A task id or configuration value is malformed")
    )]
    CoreError(#[from] jobmesh_core::JobMeshError),

    /// Resource-manager error
    #[error("Resource manager error: {0}")]
    #[diagnostic(
        code(scheduler::mesos_error),
        help("The call is retried on the next cycle; check master connectivity if this persists")
    )]
    MesosError(#[from] jobmesh_mesos::MesosError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create an InsufficientResources error
    pub fn insufficient_resources(
        offer_id: impl Into<String>,
        resource: impl Into<String>,
        requested: f64,
        available: f64,
    ) -> Self {
        Self::InsufficientResources {
            offer_id: offer_id.into(),
            resource: resource.into(),
            requested,
            available,
        }
    }

    /// Create a ConfigNotFound error
    pub fn config_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
