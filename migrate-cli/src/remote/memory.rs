//! In-memory instance store
//!
//! Backs the engine's tests and `--dry-run`-style flows with a fully
//! functional instance: entity graph, scope roots, and an expiring
//! in-process lease. Failures can be injected per operation to exercise
//! the executor's rollback paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use crate::migration::types::{Entity, EntityKind, ScopeRef};

use super::{ApplyOp, LockHandle, RevertOp, SourceAccessor, TargetAccessor};

/// Injectable failures for exercising failure and rollback paths.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail the apply of the entity with this label.
    pub fail_apply_label: Option<String>,
    /// Fail the commit call.
    pub fail_commit: bool,
    /// Fail every revert call.
    pub fail_revert: bool,
}

#[derive(Debug)]
struct Lease {
    token: Uuid,
    scope: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct StoreState {
    entities: HashMap<Uuid, Entity>,
    dependencies: HashMap<Uuid, Vec<Uuid>>,
    scopes: HashMap<String, Vec<Uuid>>,
    lease: Option<Lease>,
    faults: Faults,
    locks_acquired: u32,
    locks_released: u32,
}

/// An instance held entirely in memory.
#[derive(Debug)]
pub struct MemoryInstance {
    name: String,
    state: Mutex<StoreState>,
}

impl MemoryInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert_entity(&self, entity: Entity) {
        let mut state = self.state.lock().unwrap();
        state.entities.insert(entity.id, entity);
    }

    pub fn add_dependency(&self, from: Uuid, to: Uuid) {
        let mut state = self.state.lock().unwrap();
        state.dependencies.entry(from).or_default().push(to);
    }

    pub fn define_scope(&self, scope: &ScopeRef, roots: Vec<Uuid>) {
        let mut state = self.state.lock().unwrap();
        state.scopes.insert(scope.path(), roots);
    }

    pub fn scope_paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut paths: Vec<String> = state.scopes.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().unwrap().faults = faults;
    }

    /// Snapshot of all entities, sorted by id for stable comparison.
    pub fn entities_snapshot(&self) -> Vec<Entity> {
        let state = self.state.lock().unwrap();
        let mut entities: Vec<Entity> = state.entities.values().cloned().collect();
        entities.sort_by_key(|e| e.id);
        entities
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    pub fn lock_held(&self) -> bool {
        let state = self.state.lock().unwrap();
        match &state.lease {
            Some(lease) => lease.expires_at > Instant::now(),
            None => false,
        }
    }

    pub fn locks_acquired(&self) -> u32 {
        self.state.lock().unwrap().locks_acquired
    }

    pub fn locks_released(&self) -> u32 {
        self.state.lock().unwrap().locks_released
    }
}

impl StoreState {
    /// Writes require the handle to match the live, unexpired lease.
    fn check_lease(&self, handle: &LockHandle) -> Result<()> {
        match &self.lease {
            Some(lease) if lease.token == handle.token => {
                if lease.expires_at <= Instant::now() {
                    bail!("lease on '{}' expired", lease.scope);
                }
                Ok(())
            }
            Some(_) => bail!("lock is held by another migration attempt"),
            None => bail!("lock is not held"),
        }
    }
}

#[async_trait]
impl SourceAccessor for MemoryInstance {
    async fn resolve_scope(&self, scope: &ScopeRef) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        match state.scopes.get(&scope.path()) {
            Some(roots) => Ok(roots.clone()),
            None => bail!("unknown scope '{}' in instance '{}'", scope, self.name),
        }
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self.state.lock().unwrap().entities.get(&id).cloned())
    }

    async fn list_dependencies(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.dependencies.get(&id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TargetAccessor for MemoryInstance {
    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self.state.lock().unwrap().entities.get(&id).cloned())
    }

    async fn find_by_label(&self, kind: EntityKind, label: &str) -> Result<Option<Entity>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entities
            .values()
            .find(|e| e.kind == kind && e.label == label)
            .cloned())
    }

    async fn acquire_lock(&self, scope: &str, lease: Duration) -> Result<Option<LockHandle>> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = &state.lease {
            if existing.expires_at > Instant::now() {
                return Ok(None);
            }
            log::warn!(
                "breaking expired lease on '{}' held by {}",
                existing.scope,
                existing.token
            );
        }

        let token = Uuid::new_v4();
        state.lease = Some(Lease {
            token,
            scope: scope.to_string(),
            expires_at: Instant::now() + lease,
        });
        state.locks_acquired += 1;

        Ok(Some(LockHandle {
            token,
            scope: scope.to_string(),
            lease,
        }))
    }

    async fn apply(&self, handle: &LockHandle, entity: &Entity, op: ApplyOp) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_lease(handle)?;

        if let Some(label) = &state.faults.fail_apply_label {
            if entity.label == *label {
                bail!("injected apply failure for '{}'", label);
            }
        }

        match op {
            ApplyOp::Create => {
                if state.entities.contains_key(&entity.id) {
                    bail!("cannot create '{}': id already exists", entity.label);
                }
                state.entities.insert(entity.id, entity.clone());
            }
            ApplyOp::Update => {
                if !state.entities.contains_key(&entity.id) {
                    bail!("cannot update '{}': id not found", entity.label);
                }
                state.entities.insert(entity.id, entity.clone());
            }
        }
        Ok(())
    }

    async fn revert(&self, handle: &LockHandle, op: &RevertOp) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_lease(handle)?;

        if state.faults.fail_revert {
            bail!("injected revert failure");
        }

        match op {
            RevertOp::Remove { id } => {
                if state.entities.remove(id).is_none() {
                    bail!("cannot revert create of {id}: entity not found");
                }
            }
            RevertOp::Restore { entity } => {
                state.entities.insert(entity.id, entity.clone());
            }
        }
        Ok(())
    }

    async fn commit(&self, handle: &LockHandle) -> Result<()> {
        let state = self.state.lock().unwrap();
        state.check_lease(handle)?;

        if state.faults.fail_commit {
            bail!("injected commit failure");
        }
        Ok(())
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(lease) = &state.lease {
            if lease.token == handle.token {
                state.lease = None;
                state.locks_released += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(label: &str, kind: EntityKind) -> Entity {
        Entity::new(Uuid::new_v4(), label, kind)
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_while_leased() {
        let store = MemoryInstance::new("target");

        let handle = store
            .acquire_lock("target", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("first acquire succeeds");

        // Second acquirer is refused while the lease is live.
        assert!(
            store
                .acquire_lock("target", Duration::from_secs(60))
                .await
                .unwrap()
                .is_none()
        );

        store.release(handle).await.unwrap();
        assert!(!store.lock_held());
        assert!(
            store
                .acquire_lock("target", Duration::from_secs(60))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_broken() {
        let store = MemoryInstance::new("target");

        let stale = store
            .acquire_lock("target", Duration::from_millis(0))
            .await
            .unwrap()
            .expect("first acquire succeeds");

        // The stale lease no longer counts as held and a successor can
        // take over without a release from the crashed holder.
        assert!(!store.lock_held());
        let fresh = store
            .acquire_lock("target", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("stale lease is broken");
        assert_ne!(stale.token, fresh.token);
    }

    #[tokio::test]
    async fn test_writes_require_live_lease() {
        let store = MemoryInstance::new("target");
        let e = entity("User", EntityKind::ObjectType);

        let bogus = LockHandle {
            token: Uuid::new_v4(),
            scope: "target".into(),
            lease: Duration::from_secs(60),
        };
        assert!(store.apply(&bogus, &e, ApplyOp::Create).await.is_err());

        let handle = store
            .acquire_lock("target", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        store.apply(&handle, &e, ApplyOp::Create).await.unwrap();
        assert_eq!(store.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_revert_restores_pre_image() {
        let store = MemoryInstance::new("target");
        let mut e = entity("User", EntityKind::ObjectType);
        store.insert_entity(e.clone());

        let handle = store
            .acquire_lock("target", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let pre_image = e.clone();
        e.label = "Renamed".into();
        store.apply(&handle, &e, ApplyOp::Update).await.unwrap();

        store
            .revert(&handle, &RevertOp::Restore { entity: pre_image })
            .await
            .unwrap();

        let restored = TargetAccessor::get_entity(&store, e.id).await.unwrap().unwrap();
        assert_eq!(restored.label, "User");
    }
}
