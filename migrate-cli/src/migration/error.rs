//! Failure taxonomy for the migration engine
//!
//! Bundling and reconciliation errors abort their stage with no side
//! effects and are safe to retry. Execution errors past lock acquisition
//! always attempt rollback before surfacing; only a rollback failure is
//! escalated as unrecoverable.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use super::types::FailureKind;
use super::workflow::MigrationStep;

/// Engine-level failures with user-facing diagnostics.
#[derive(Debug)]
pub enum MigrationError {
    /// A bundled entity references an id that cannot be resolved in the
    /// source instance. Bundling aborts with no partial output.
    IncompleteGraph {
        missing: Uuid,
        required_by: Option<Uuid>,
    },
    /// The target lock was not acquired within the bounded wait. No
    /// changes were made and no rollback is needed.
    LockTimeout { scope: String, waited: Duration },
    /// An entity failed to apply. Rollback has been attempted.
    ApplyFailure {
        entity: String,
        source: anyhow::Error,
    },
    /// Rollback itself failed. The target may be inconsistent and requires
    /// manual intervention; reported distinctly from the apply failure.
    RollbackFailure {
        entity: String,
        source: anyhow::Error,
    },
    /// The final commit call failed. Treated like an apply failure.
    CommitFailure { source: anyhow::Error },
}

impl MigrationError {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::IncompleteGraph { .. } => None,
            Self::LockTimeout { .. } => Some(FailureKind::LockTimeout),
            Self::ApplyFailure { .. } => Some(FailureKind::Apply),
            Self::RollbackFailure { .. } => Some(FailureKind::Rollback),
            Self::CommitFailure { .. } => Some(FailureKind::Commit),
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteGraph {
                missing,
                required_by,
            } => match required_by {
                Some(parent) => write!(
                    f,
                    "incomplete entity graph: {missing} is required by {parent} but cannot be resolved in the source instance"
                ),
                None => write!(
                    f,
                    "incomplete entity graph: root entity {missing} cannot be resolved in the source instance"
                ),
            },
            Self::LockTimeout { scope, waited } => write!(
                f,
                "could not acquire lock on target '{scope}' within {:.1}s",
                waited.as_secs_f64()
            ),
            Self::ApplyFailure { entity, source } => {
                write!(f, "failed to apply '{entity}': {source}")
            }
            Self::RollbackFailure { entity, source } => write!(
                f,
                "rollback failed at '{entity}': {source}; target state may be inconsistent, manual intervention required"
            ),
            Self::CommitFailure { source } => write!(f, "commit failed: {source}"),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ApplyFailure { source, .. }
            | Self::RollbackFailure { source, .. }
            | Self::CommitFailure { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// A workflow transition was requested from a step that does not permit it.
#[derive(Debug, Clone)]
pub struct WorkflowError {
    pub step: MigrationStep,
    pub action: &'static str,
}

impl WorkflowError {
    pub fn new(step: MigrationStep, action: &'static str) -> Self {
        Self { step, action }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} while in the {} step",
            self.action,
            self.step.label()
        )
    }
}

impl std::error::Error for WorkflowError {}
