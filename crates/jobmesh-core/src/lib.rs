//! Jobmesh Core - Fundamental types for the Jobmesh cloud job scheduler
//!
//! This crate provides:
//! - Job and app configuration types
//! - Task identity (`TaskContext`) and its wire format
//! - Lifecycle trace events
//! - The launch payload handed to executors
//! - Error types with miette diagnostics

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod payload;

// Re-export commonly used types
pub use config::{CloudAppConfiguration, CloudJobConfiguration, CloudJobExecutionType, JobType};
pub use context::{ExecutionType, JobContext, MetaInfo, TaskContext};
pub use error::{JobMeshError, Result};
pub use events::{JobStatusTraceEvent, Source, TraceState};
pub use payload::{LaunchPayload, ShardingContexts};

/// Serialize a value to JSON bytes
pub fn to_json_vec<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        JobMeshError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON bytes
pub fn from_json_slice<T: for<'de> serde::Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| {
        JobMeshError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        JobMeshError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_helpers() {
        let context = TaskContext::new("test_job", vec![0], ExecutionType::Ready);
        let bytes = to_json_vec(&context).unwrap();
        let back: TaskContext = from_json_slice(&bytes).unwrap();
        assert_eq!(back, context);
    }

    #[test]
    fn test_yaml_error_is_serialization_error() {
        let result: Result<CloudAppConfiguration> = from_yaml("app_name: [unclosed");
        assert!(matches!(
            result,
            Err(JobMeshError::SerializationError { .. })
        ));
    }
}
