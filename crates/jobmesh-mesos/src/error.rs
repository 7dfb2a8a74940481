use miette::Diagnostic;
use thiserror::Error;

/// Error type for resource-manager and cluster-state operations
#[derive(Error, Debug, Diagnostic)]
pub enum MesosError {
    /// Transport-level HTTP failure
    #[error("HTTP request to {url} failed: {message}")]
    #[diagnostic(
        code(jobmesh::mesos::http_error),
        help("Check that the master at {url} is reachable from this host and that the timeout is long enough")
    )]
    HttpError {
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        message: String,
    },

    /// The master or agent answered with a non-success status
    #[error("{operation} failed with status {status}: {body}")]
    #[diagnostic(
        code(jobmesh::mesos::unexpected_status),
        help("The resource manager rejected the request. A 4xx usually means the call was malformed or the stream id is stale")
    )]
    UnexpectedStatus {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        body: String,
    },

    /// Response body could not be decoded
    #[error("Failed to decode {what}: {message}")]
    #[diagnostic(
        code(jobmesh::mesos::decode_error),
        help("The master may be running an incompatible API version")
    )]
    DecodeError {
        #[allow(unused)]
        what: String,
        #[allow(unused)]
        message: String,
    },

    /// A call was attempted before the subscription produced a stream id
    #[error("Scheduler is not subscribed to the master")]
    #[diagnostic(
        code(jobmesh::mesos::not_subscribed),
        help("Calls are only accepted after the SUBSCRIBED event; they will succeed once the driver reconnects")
    )]
    NotSubscribed,

    /// Cluster state could not be read
    #[error("Cluster state unavailable: {message}")]
    #[diagnostic(
        code(jobmesh::mesos::state_unavailable),
        help("The framework may not be registered yet, or the agent state endpoint is unreachable on the configured port")
    )]
    StateUnavailable {
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] jobmesh_core::JobMeshError),

    /// Internal error
    #[error("Internal resource-manager client error: {message}")]
    #[diagnostic(
        code(jobmesh::mesos::internal_error),
        help("This is likely a bug in jobmesh-mesos. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for resource-manager operations
pub type Result<T> = std::result::Result<T, MesosError>;

impl MesosError {
    pub fn http_error(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HttpError {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn unexpected_status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    pub fn decode_error(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DecodeError {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn state_unavailable(message: impl Into<String>) -> Self {
        Self::StateUnavailable {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
