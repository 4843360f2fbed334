//! JSON snapshot file store
//!
//! Backs an instance with a single JSON snapshot on disk: entities, their
//! dependency edges, and scope roots. Applies mutate memory only; `commit`
//! persists the snapshot atomically (temp file + rename), so the on-disk
//! pre-attempt state survives any failure before the commit call.
//!
//! The exclusive lock is a `<file>.lock` sidecar carrying the holder token
//! and an expiry timestamp. Another process sees the sidecar and backs
//! off; once the lease expires the sidecar may be replaced, so a crashed
//! holder cannot block the target indefinitely.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::migration::types::{Entity, EntityKind, ScopeRef};

use super::{ApplyOp, LockHandle, RevertOp, SourceAccessor, TargetAccessor};

/// On-disk shape of an instance snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub entities: Vec<Entity>,
    /// Entity id -> ids it depends on.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<Uuid, Vec<Uuid>>,
    /// Scope path -> root entity ids.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, Vec<Uuid>>,
}

/// Sidecar lease lock contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    token: Uuid,
    scope: String,
    holder: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FileState {
    entities: HashMap<Uuid, Entity>,
    dependencies: HashMap<Uuid, Vec<Uuid>>,
    scopes: HashMap<String, Vec<Uuid>>,
}

/// An instance backed by a JSON snapshot file.
#[derive(Debug)]
pub struct FileInstance {
    path: PathBuf,
    lock_path: PathBuf,
    state: Mutex<FileState>,
}

impl FileInstance {
    /// Load an instance snapshot from disk.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read instance snapshot: {}", path.display()))?;
        let snapshot: InstanceSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("invalid instance snapshot: {}", path.display()))?;
        Ok(Self::from_snapshot(path, snapshot))
    }

    /// Create a new instance file from a snapshot, persisting immediately.
    pub fn create(path: impl Into<PathBuf>, snapshot: InstanceSnapshot) -> Result<Self> {
        let instance = Self::from_snapshot(path.into(), snapshot);
        instance.persist()?;
        Ok(instance)
    }

    fn from_snapshot(path: PathBuf, snapshot: InstanceSnapshot) -> Self {
        let lock_path = lock_path_for(&path);
        let state = FileState {
            entities: snapshot.entities.into_iter().map(|e| (e.id, e)).collect(),
            dependencies: snapshot.dependencies.into_iter().collect(),
            scopes: snapshot.scopes.into_iter().collect(),
        };
        Self {
            path,
            lock_path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope_paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut paths: Vec<String> = state.scopes.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Current in-memory contents, entities sorted by id.
    pub fn snapshot(&self) -> InstanceSnapshot {
        let state = self.state.lock().unwrap();
        let mut entities: Vec<Entity> = state.entities.values().cloned().collect();
        entities.sort_by_key(|e| e.id);
        InstanceSnapshot {
            entities,
            dependencies: state.dependencies.iter().map(|(k, v)| (*k, v.clone())).collect(),
            scopes: state.scopes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Write the snapshot to disk via a temp file and rename, so a failed
    /// write never truncates the previous snapshot.
    fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let content = serde_json::to_string_pretty(&snapshot)
            .context("failed to serialize instance snapshot")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("failed to write snapshot: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace snapshot: {}", self.path.display()))?;
        Ok(())
    }

    fn read_lock_file(&self) -> Result<Option<LockFile>> {
        match fs::read_to_string(&self.lock_path) {
            Ok(content) => {
                let lock: LockFile = serde_json::from_str(&content).with_context(|| {
                    format!("corrupt lock file: {}", self.lock_path.display())
                })?;
                Ok(Some(lock))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| {
                format!("failed to read lock file: {}", self.lock_path.display())
            }),
        }
    }

    /// The handle must match the live sidecar lease.
    fn check_lease(&self, handle: &LockHandle) -> Result<()> {
        match self.read_lock_file()? {
            Some(lock) if lock.token == handle.token => {
                if lock.expires_at <= Utc::now() {
                    bail!("lease on '{}' expired", lock.scope);
                }
                Ok(())
            }
            Some(_) => bail!("lock is held by another migration attempt"),
            None => bail!("lock is not held"),
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

#[async_trait]
impl SourceAccessor for FileInstance {
    async fn resolve_scope(&self, scope: &ScopeRef) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        match state.scopes.get(&scope.path()) {
            Some(roots) => Ok(roots.clone()),
            None => bail!("unknown scope '{}' in {}", scope, self.path.display()),
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
impl TargetAccessor for FileInstance {
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
        if let Some(existing) = self.read_lock_file()? {
            if existing.expires_at > Utc::now() {
                return Ok(None);
            }
            log::warn!(
                "breaking expired lease on '{}' held by {} since {}",
                existing.scope,
                existing.holder,
                existing.acquired_at
            );
        }

        let token = Uuid::new_v4();
        let now = Utc::now();
        let lock = LockFile {
            token,
            scope: scope.to_string(),
            holder: format!("pid {}", std::process::id()),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(60)),
        };
        let content =
            serde_json::to_string_pretty(&lock).context("failed to serialize lock file")?;
        fs::write(&self.lock_path, content)
            .with_context(|| format!("failed to write lock file: {}", self.lock_path.display()))?;

        Ok(Some(LockHandle {
            token,
            scope: scope.to_string(),
            lease,
        }))
    }

    async fn apply(&self, handle: &LockHandle, entity: &Entity, op: ApplyOp) -> Result<()> {
        self.check_lease(handle)?;
        let mut state = self.state.lock().unwrap();

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
        self.check_lease(handle)?;
        let mut state = self.state.lock().unwrap();

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
        self.check_lease(handle)?;
        self.persist()
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        if let Some(lock) = self.read_lock_file()? {
            if lock.token == handle.token {
                fs::remove_file(&self.lock_path).with_context(|| {
                    format!("failed to remove lock file: {}", self.lock_path.display())
                })?;
            }
        }
        Ok(())
    }
}
