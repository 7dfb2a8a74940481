// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Jobmesh operations
#[derive(Error, Debug, Diagnostic)]
pub enum JobMeshError {
    /// A task identifier could not be parsed
    #[error("Invalid task id '{task_id}': {reason}")]
    #[diagnostic(
        code(jobmesh::invalid_task_id),
        help("Task ids have the form {{job}}@-@{{items}}@-@{{READY|FAILOVER}}@-@{{agent}}@-@{{uuid}}")
    )]
    InvalidTaskId {
        #[allow(unused)]
        task_id: String,
        #[allow(unused)]
        reason: String,
    },

    /// A job name cannot be used as part of a task identifier or storage key
    #[error("Invalid job name '{job_name}': {reason}")]
    #[diagnostic(
        code(jobmesh::invalid_job_name),
        help("Job names must be non-empty and must not contain '@-@' or '/'")
    )]
    InvalidJobName {
        #[allow(unused)]
        job_name: String,
        #[allow(unused)]
        reason: String,
    },

    /// A configuration is structurally invalid
    #[error("Invalid configuration for {name}: {reason}")]
    #[diagnostic(
        code(jobmesh::invalid_configuration),
        help("{suggestion}")
    )]
    InvalidConfiguration {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(jobmesh::serialization_error),
        help("Ensure the document format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, JobMeshError>;

impl JobMeshError {
    /// Create an InvalidTaskId error
    pub fn invalid_task_id(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTaskId {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidJobName error
    pub fn invalid_job_name(job_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJobName {
            job_name: job_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfiguration error
    pub fn invalid_configuration(
        name: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidConfiguration {
            name: name.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_task_id_display() {
        let err = JobMeshError::invalid_task_id("bad", "expected 5 segments");
        assert_eq!(
            err.to_string(),
            "Invalid task id 'bad': expected 5 segments"
        );
    }

    #[test]
    fn test_invalid_job_name_display() {
        let err = JobMeshError::invalid_job_name("a@-@b", "contains separator");
        assert!(err.to_string().contains("a@-@b"));
    }
}
