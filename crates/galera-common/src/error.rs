//! Error types for the Galera operator
//!
//! Errors carry enough context (cluster key, resource kind) to be useful in
//! logs, and classify themselves as retryable or not so the sync loop can
//! decide between a backoff re-enqueue and dropping the work item.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Galera operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A work queue item that is not a valid `namespace/name` key
    #[error("invalid resource key: {key:?}")]
    InvalidKey {
        /// The offending key
        key: String,
    },

    /// A dependent resource the state machine needs is not visible (yet)
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "Pod")
        kind: String,
        /// `namespace/name` of the missing resource
        name: String,
    },

    /// Optimistic concurrency failure while writing status
    #[error("write conflict for {cluster}: {message}")]
    Conflict {
        /// Cluster key the write targeted
        cluster: String,
        /// What diverged
        message: String,
    },

    /// Validation error for CRD specs or state transitions
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Cluster key with the invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred (e.g. "queue", "patch", "reconciler")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create an invalid-key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create a not-found error for a dependent resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a write-conflict error
    pub fn conflict(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error without cluster context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            context: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Transient API failures, write conflicts and not-yet-visible dependent
    /// resources are retried with backoff. Malformed keys, validation and
    /// serialization failures need a code or config fix and are dropped.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::InvalidKey { .. } => false,
            Error::NotFound { .. } => true,
            Error::Conflict { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::NotFound { .. } => true,
            _ => false,
        }
    }

    /// Get the cluster key if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Conflict { cluster, .. } | Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
