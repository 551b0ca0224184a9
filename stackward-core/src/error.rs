//! Error types for stackward.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stackward operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Main error type for stackward.
///
/// Each variant corresponds to one user-visible failure class; the CLI maps
/// them onto exit codes.
#[derive(Error, Debug)]
pub enum StackError {
    // Manifest validation errors. Raised before any cluster call and never
    // trigger rollback.
    #[error("Invalid manifest: {reason}")]
    Validation { reason: String },

    #[error("Service '{service}' uses mutable tag '{image}'; pin a version or pass --allow-latest")]
    LatestTagForbidden { service: String, image: String },

    #[error("Manifest read error: {path:?}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest parse error: {reason}")]
    ManifestParse { reason: String },

    // Cluster adapter errors.
    #[error("Cluster transport failure: {reason}")]
    Transport { reason: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Version conflict updating service {service}: token moved during update")]
    VersionConflict { service: String },

    // Executor errors. Trigger rollback of already-applied service actions.
    #[error("Failed to deploy {kind} {name}: {reason}")]
    Deploy { kind: &'static str, name: String, reason: String },

    // Convergence errors. Trigger rollback.
    #[error("Service {service} failed to converge: {reason}")]
    ConvergenceFailed { service: String, reason: String },

    #[error("Stack-wide failed-task budget exceeded: {failed} failed tasks across {services} service(s)")]
    FailureBudgetExceeded { failed: usize, services: usize },

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: std::time::Duration },

    #[error("Apply cancelled")]
    Cancelled,

    // Rollback errors. Surface alongside the originating error and never
    // re-trigger rollback.
    #[error("Rollback incomplete: {failed} of {attempted} action(s) failed")]
    RollbackPartial { attempted: usize, failed: usize },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StackError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Whether this error originated in manifest validation (pre-cluster).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::LatestTagForbidden { .. }
                | Self::ManifestRead { .. }
                | Self::ManifestParse { .. }
        )
    }

    /// Whether the apply deadline or a watcher deadline fired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
