//! Cross-instance migration engine
//!
//! One migration attempt flows strictly forward through four stages:
//! bundle assembly ([`bundle`]), reconciliation ([`reconcile`]), atomic
//! execution ([`executor`]) and history ([`history`]), sequenced by the
//! [`workflow`] controller. [`types`] is the vocabulary shared by all of
//! them.

pub mod bundle;
pub mod error;
pub mod executor;
pub mod history;
pub mod reconcile;
pub mod types;
pub mod workflow;

pub use bundle::assemble;
pub use error::{MigrationError, WorkflowError};
pub use executor::TransactionExecutor;
pub use history::HistoryStore;
pub use reconcile::{ReconciledSet, reconcile};
pub use types::{
    Bundle, Entity, EntityKind, ExecutionOutcome, ExecutionRecord, FailureKind, LogLine,
    Outcome, ReconciledEntity, RollbackStatus, ScopeRef,
};
pub use workflow::{MigrationStep, Selection, WorkflowController};
