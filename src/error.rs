//! Error types used by the cellvisor runtime, its services and collaborators.
//!
//! One enum per layer:
//!
//! - [`RuntimeError`] errors raised by the host orchestrating several cells.
//! - [`ServiceError`] outcomes of a single service invocation (message handler, scheduled job, background hook).
//! - [`CellError`] faults that terminate a cell run (escalated to the supervisor as `FatalError`).
//! - [`StorageError`] failures reported by queue/blob storage collaborators.
//! - [`DeploymentError`] publishing, reading and resolving deployments.
//! - [`LoadError`] failures while materializing a deployment inside an isolation boundary.
//!
//! Every enum provides `as_label` for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the cell host.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some cells remained stuck and were discarded.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the cells that did not shut down in time.
        stuck: Vec<String>,
    },

    /// Two cells were registered under the same name.
    #[error("duplicate cell name: {name}")]
    DuplicateCell {
        /// The conflicting cell name.
        name: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use cellvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::DuplicateCell { .. } => "runtime_duplicate_cell",
        }
    }
}

/// # Outcome of a failed service invocation.
///
/// Returned by message handlers, scheduled jobs and background hooks.
/// `Fail` and `Timeout` are retryable: the message goes back to the queue through
/// its visibility timeout. `Canceled` is the recoverable abort signal and makes the
/// message visible again immediately. `Fatal` escalates to the whole cell.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Invocation exceeded its execution timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error; the cell must be rebuilt.
    #[error("fatal error (cell restart): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Invocation failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Invocation was aborted because its cancellation token fired.
    #[error("context cancelled")]
    Canceled,
}

impl ServiceError {
    /// Shorthand for [`ServiceError::Fail`].
    pub fn fail(error: impl std::fmt::Display) -> Self {
        ServiceError::Fail {
            error: error.to_string(),
        }
    }

    /// Shorthand for [`ServiceError::Fatal`].
    pub fn fatal(error: impl std::fmt::Display) -> Self {
        ServiceError::Fatal {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use cellvisor::ServiceError;
    /// use std::time::Duration;
    ///
    /// let err = ServiceError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "service_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Timeout { .. } => "service_timeout",
            ServiceError::Fatal { .. } => "service_fatal",
            ServiceError::Fail { .. } => "service_failed",
            ServiceError::Canceled => "service_canceled",
        }
    }

    /// Indicates whether the failed work may be retried.
    ///
    /// Returns `true` for [`ServiceError::Fail`] and [`ServiceError::Timeout`].
    ///
    /// # Example
    /// ```
    /// use cellvisor::ServiceError;
    ///
    /// assert!(ServiceError::fail("boom").is_retryable());
    /// assert!(!ServiceError::fatal("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Fail { .. } | ServiceError::Timeout { .. })
    }
}

/// # Failure reported by a storage collaborator.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend is unreachable or returned a transient error.
    #[error("storage unavailable: {error}")]
    Unavailable {
        /// Backend-specific description.
        error: String,
    },

    /// Stored content could not be decoded.
    #[error("corrupt record {name}: {error}")]
    Corrupt {
        /// Record name.
        name: String,
        /// Decoder message.
        error: String,
    },

    /// Optimistic concurrency retries were exhausted.
    #[error("too many concurrent updates on {name}")]
    Contention {
        /// Record name.
        name: String,
    },
}

impl StorageError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StorageError::Unavailable { .. } => "storage_unavailable",
            StorageError::Corrupt { .. } => "storage_corrupt",
            StorageError::Contention { .. } => "storage_contention",
        }
    }
}

/// # Errors raised while publishing or resolving deployments.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DeploymentError {
    /// No head pointer has been published yet.
    #[error("no deployment head published")]
    NoHead,

    /// The requested deployment is not present in the index.
    #[error("unknown deployment: {name}")]
    UnknownDeployment {
        /// Requested deployment name.
        name: String,
    },

    /// A content-addressed artifact referenced by the index is missing.
    #[error("missing artifact: {name}")]
    MissingArtifact {
        /// Artifact name.
        name: String,
    },

    /// A record or artifact could not be (de)serialized.
    #[error("invalid {what}: {error}")]
    Invalid {
        /// What was being decoded.
        what: &'static str,
        /// Decoder message.
        error: String,
    },

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DeploymentError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeploymentError::NoHead => "deployment_no_head",
            DeploymentError::UnknownDeployment { .. } => "deployment_unknown",
            DeploymentError::MissingArtifact { .. } => "deployment_missing_artifact",
            DeploymentError::Invalid { .. } => "deployment_invalid",
            DeploymentError::Storage(_) => "deployment_storage",
        }
    }
}

/// # Failure to materialize a deployment inside an isolation boundary.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LoadError {
    /// The deployment references a service type no factory is registered for.
    #[error("service type `{type_id}` is not registered (service `{service}`)")]
    UnknownServiceType {
        /// Service name from the descriptor.
        service: String,
        /// Factory key.
        type_id: String,
    },

    /// Descriptor validation failed.
    #[error("invalid service descriptor `{service}`: {reason}")]
    InvalidDescriptor {
        /// Service name from the descriptor.
        service: String,
        /// Validation message.
        reason: String,
    },

    /// A factory refused to build its service.
    #[error("factory for `{service}` failed: {error}")]
    Factory {
        /// Service name from the descriptor.
        service: String,
        /// Factory message.
        error: String,
    },

    /// The isolation runtime could not be created.
    #[error("cannot create isolation boundary: {error}")]
    Boundary {
        /// Underlying I/O message.
        error: String,
    },

    /// The deployment content could not be read.
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

impl LoadError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LoadError::UnknownServiceType { .. } => "load_unknown_service_type",
            LoadError::InvalidDescriptor { .. } => "load_invalid_descriptor",
            LoadError::Factory { .. } => "load_factory",
            LoadError::Boundary { .. } => "load_boundary",
            LoadError::Deployment(_) => "load_deployment",
        }
    }
}

/// # Fault that terminates a cell run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CellError {
    /// A background service start/stop hook (or its body) failed.
    #[error("background service `{service}` failed: {error}")]
    Background {
        /// Service name.
        service: String,
        /// Underlying error.
        error: ServiceError,
    },

    /// A one-time setup hook failed during initialization.
    #[error("setup of `{service}` failed: {error}")]
    Setup {
        /// Service name.
        service: String,
        /// Underlying error.
        error: ServiceError,
    },

    /// A queued handler returned [`ServiceError::Fatal`].
    #[error("service `{service}` requested cell teardown: {error}")]
    Fatal {
        /// Service name.
        service: String,
        /// Underlying error.
        error: ServiceError,
    },

    /// Storage failed in a way the runners cannot recover from.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The deployment could not be materialized.
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl CellError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CellError::Background { .. } => "cell_background_failed",
            CellError::Setup { .. } => "cell_setup_failed",
            CellError::Fatal { .. } => "cell_fatal",
            CellError::Storage(_) => "cell_storage",
            CellError::Load(_) => "cell_load",
        }
    }
}
