//! Core error types for KILLPOINT.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The cluster could not be reached at all
    #[error("Cluster unreachable: {reason}")]
    ClusterUnreachable {
        /// What went wrong while talking to the cluster
        reason: String,
    },

    /// The cluster answered and refused the command
    #[error("Command rejected: {command}: {reason}")]
    CommandRejected {
        /// Command as issued
        command: String,
        /// Rejection text
        reason: String,
    },

    /// Topology snapshot violates a structural invariant
    #[error("Invalid topology: {reason}")]
    InvalidTopology {
        /// Which invariant failed
        reason: String,
    },

    /// Output from the cluster could not be parsed
    #[error("Parse error: {message}")]
    Parse {
        /// Parser message
        message: String,
    },

    /// Local I/O error (mount point, fixture files)
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path involved
        path: String,
        /// OS error text
        message: String,
    },

    /// Invalid harness configuration
    #[error("Invalid configuration for {field}: {reason}")]
    Config {
        /// Field name
        field: String,
        /// Reason
        reason: String,
    },
}

impl CoreError {
    /// Build an unreachable error from anything displayable
    #[must_use]
    pub fn unreachable(reason: impl std::fmt::Display) -> Self {
        Self::ClusterUnreachable {
            reason: reason.to_string(),
        }
    }

    /// Build an I/O error for a path
    #[must_use]
    pub fn io(path: impl std::fmt::Display, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether the error means the cluster could not be contacted
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::ClusterUnreachable { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}
