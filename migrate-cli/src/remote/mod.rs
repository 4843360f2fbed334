//! Remote instance accessors
//!
//! The engine never talks to an instance directly; it goes through the two
//! traits in this module. `SourceAccessor` is the read-only view bundling
//! walks, `TargetAccessor` adds the write surface the transaction executor
//! drives: lease-locked apply/revert/commit with unconditional release.
//!
//! Two implementations ship with the tool: an in-memory store
//! ([`memory::MemoryInstance`]) and a JSON snapshot file store with a
//! cross-process sidecar lock ([`file::FileInstance`]).

pub mod file;
pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::migration::types::{Entity, EntityKind, ScopeRef};

pub use file::{FileInstance, InstanceSnapshot};
pub use memory::{Faults, MemoryInstance};

/// Proof of holding the target's exclusive lease lock.
///
/// The token identifies this holder; an accessor rejects writes whose
/// handle does not match the live lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub token: Uuid,
    pub scope: String,
    pub lease: Duration,
}

/// The write operation to perform for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOp {
    Create,
    Update,
}

/// The inverse of an applied operation, replayed during rollback.
#[derive(Debug, Clone)]
pub enum RevertOp {
    /// Undo a create by removing the entity.
    Remove { id: Uuid },
    /// Undo an update by restoring the pre-apply entity.
    Restore { entity: Entity },
}

/// Read-only view over the source instance's entity graph.
#[async_trait]
pub trait SourceAccessor: Send + Sync {
    /// Resolve a scope reference to the ids of its root entities.
    async fn resolve_scope(&self, scope: &ScopeRef) -> Result<Vec<Uuid>>;

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    /// Ids this entity depends on (must be applied before it).
    async fn list_dependencies(&self, id: Uuid) -> Result<Vec<Uuid>>;
}

/// Read/write view over the target instance.
///
/// `acquire_lock` is a single non-blocking attempt: `Ok(None)` means a
/// live lease is held elsewhere. The bounded wait and retry pacing are the
/// executor's responsibility. A lease that outlives its duration may be
/// broken by the next acquirer, so a crashed holder cannot block the
/// target forever.
#[async_trait]
pub trait TargetAccessor: Send + Sync {
    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    async fn find_by_label(&self, kind: EntityKind, label: &str) -> Result<Option<Entity>>;

    async fn acquire_lock(&self, scope: &str, lease: Duration) -> Result<Option<LockHandle>>;

    async fn apply(&self, handle: &LockHandle, entity: &Entity, op: ApplyOp) -> Result<()>;

    async fn revert(&self, handle: &LockHandle, op: &RevertOp) -> Result<()>;

    /// Finalize every apply of this attempt. Failure here is treated like
    /// an apply failure by the executor and triggers rollback.
    async fn commit(&self, handle: &LockHandle) -> Result<()>;

    /// Release the lease. Called on every exit path, including after a
    /// failed rollback.
    async fn release(&self, handle: LockHandle) -> Result<()>;
}
