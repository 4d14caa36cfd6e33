//! Error types for cloud adapters and the provisioning engine

use crate::graph::ResourceKind;
use thiserror::Error;

/// Retry classification of an adapter failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying (rate limits, timeouts, unreachable endpoints)
    Transient,
    /// Retrying cannot help (validation, quota, conflicts)
    Permanent,
}

/// Errors raised by a [`CloudProvider`](crate::CloudProvider) implementation
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Rate limit exceeded: {0}")]
    Throttled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Resource already exists: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn class(&self) -> FailureClass {
        match self {
            CloudError::Throttled(_) | CloudError::Timeout(_) | CloudError::Unavailable(_) => {
                FailureClass::Transient
            }
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Static problems found in a resource graph before anything is executed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate resource name: {0}")]
    DuplicateName(String),

    #[error("Invalid resource name '{0}': use letters, digits, '-' and '_'")]
    InvalidName(String),

    #[error("Resource '{node}' depends on unknown resource '{missing}'")]
    UnresolvedDependency { node: String, missing: String },

    #[error("Resource '{node}' has a malformed reference '{reference}'")]
    InvalidReference { node: String, reference: String },

    #[error(
        "Resource '{node}' parameter '{param}' must reference a {expected} resource, but '{target}' is a {actual}"
    )]
    WrongReferenceKind {
        node: String,
        param: String,
        target: String,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("Resource '{node}' ({kind}) is missing required parameter '{param}'")]
    MissingParameter {
        node: String,
        kind: ResourceKind,
        param: String,
    },

    #[error("Resource '{node}' parameter '{param}' is invalid: {reason}")]
    InvalidParameter {
        node: String,
        param: String,
        reason: String,
    },

    #[error("Listener '{listener}' has two routes with priority {priority}: '{first}' and '{second}'")]
    DuplicatePriority {
        listener: String,
        priority: u64,
        first: String,
        second: String,
    },
}

/// The dependency graph is not acyclic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dependency cycle detected: {}", .path.join(" -> "))]
pub struct CycleError {
    /// Names on the cycle; the first name is repeated at the end when a
    /// closed path could be reconstructed
    pub path: Vec<String>,
}

/// Recorded state of a resource no longer matches what the graph asks for
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Drift detected for '{name}' ({kind}): {reason}")]
pub struct DriftError {
    pub name: String,
    pub kind: ResourceKind,
    pub reason: String,
    pub recorded_fingerprint: String,
    pub desired_fingerprint: Option<String>,
}

/// Remote operation attempted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Resolve,
    Create,
    Describe,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Resolve => write!(f, "resolve"),
            Operation::Create => write!(f, "create"),
            Operation::Describe => write!(f, "describe"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Why a single node could not be realized or removed
#[derive(Error, Debug)]
pub enum ProvisionFailure {
    #[error(transparent)]
    Api(#[from] CloudError),

    #[error("still referenced by {}", .0.join(", "))]
    DependentsRemain(Vec<String>),

    #[error("output of '{0}' is not available")]
    MissingOutput(String),

    #[error("cancelled while waiting to retry")]
    Cancelled,
}

#[derive(Error, Debug)]
#[error("Failed to {operation} '{name}' ({kind}) after {attempts} attempt(s): {failure}")]
pub struct ProvisionError {
    pub name: String,
    pub kind: ResourceKind,
    pub operation: Operation,
    pub attempts: u32,
    #[source]
    pub failure: ProvisionFailure,
}

/// A plan stopped part-way; completed nodes stay recorded so a rerun resumes
#[derive(Error, Debug)]
#[error(
    "Plan aborted after {} of {} resource(s){}",
    .completed.len(),
    .completed.len() + .pending.len(),
    .failed.as_ref().map(|f| format!(" (failed at '{}')", f)).unwrap_or_default()
)]
pub struct PartialCompletionError {
    /// Completed in plan order (created, reused or deleted)
    pub completed: Vec<String>,
    /// Not yet completed, in plan order
    pub pending: Vec<String>,
    /// Node whose failure stopped the plan, if any
    pub failed: Option<String>,
    /// Root cause; `None` when the run was cancelled
    #[source]
    pub source: Option<Box<StackError>>,
}

/// Provisioning ledger (state file) errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("State is locked by {holder} since {since}")]
    Locked { holder: String, since: String },

    #[error("No record for '{0}'")]
    UnknownRecord(String),

    #[error("State IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Orchestrator error taxonomy
#[derive(Error, Debug)]
pub enum StackError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    PartialCompletion(#[from] PartialCompletionError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl StackError {
    /// Unwraps partial-completion wrappers down to the failure that caused them
    pub fn root_cause(&self) -> &StackError {
        match self {
            StackError::PartialCompletion(PartialCompletionError {
                source: Some(inner),
                ..
            }) => inner.root_cause(),
            other => other,
        }
    }
}

pub type StackResult<T> = std::result::Result<T, StackError>;
