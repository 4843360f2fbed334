//! Core data types for cross-instance migration
//!
//! These types define the data model shared by the bundle assembler,
//! reconciliation engine and transaction executor: the migratable entity
//! vocabulary, identity rules, and the result shapes handed to the
//! surrounding UI layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of migratable entity kinds.
///
/// Declaration order is significant: it is the dependency ranking used to
/// keep bundle ordering deterministic (object types before the properties
/// and relations that reference them, templates after their constituents).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EntityKind {
    ObjectType,
    Property,
    Relation,
    Record,
    Enumeration,
    Template,
}

impl EntityKind {
    /// Dependency rank. Properties and relations share a rank: both depend
    /// on object types and nothing else orders them against each other.
    pub fn rank(&self) -> u8 {
        match self {
            Self::ObjectType => 0,
            Self::Property | Self::Relation => 1,
            Self::Record => 2,
            Self::Enumeration => 3,
            Self::Template => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ObjectType => "object type",
            Self::Property => "property",
            Self::Relation => "relation",
            Self::Record => "record",
            Self::Enumeration => "enumeration",
            Self::Template => "template",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A migratable entity.
///
/// `id` is globally unique and stable across instances once created.
/// `label` is the instance-local display name and is NOT guaranteed unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub label: String,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(id: Uuid, label: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id,
            label: label.into(),
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// Two entities are the same entity across instances iff their ids match.
    pub fn is_same(&self, other: &Entity) -> bool {
        self.id == other.id
    }

    /// Two entities are label-equivalent iff kind and label both match,
    /// independent of id.
    pub fn is_label_equivalent(&self, other: &Entity) -> bool {
        self.kind == other.kind && self.label == other.label
    }
}

/// A topologically ordered, dependency-closed set of entities for one
/// migration attempt. Immutable once assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    entities: Vec<Entity>,
    summary: BTreeMap<EntityKind, usize>,
}

impl Bundle {
    /// Build a bundle from entities already in apply order. The per-kind
    /// summary is derived here so it can never drift from the contents.
    pub(crate) fn new(entities: Vec<Entity>) -> Self {
        let mut summary = BTreeMap::new();
        for entity in &entities {
            *summary.entry(entity.kind).or_insert(0) += 1;
        }
        Self { entities, summary }
    }

    /// Entities in apply order (dependencies before dependents).
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Per-kind entity counts.
    pub fn summary(&self) -> &BTreeMap<EntityKind, usize> {
        &self.summary
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.summary.get(&kind).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Result of reconciling one bundled entity against the target instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Outcome {
    /// Not present in the target at all: created on apply.
    Missing,
    /// Id absent, but a target entity with the same kind and label exists.
    /// Additive: created under the source id, the target entity is left alone.
    LabelMatch,
    /// Id present in the target with a different label. Applying is an
    /// explicit override and updates the target entity.
    Conflict,
    /// Id present with a matching label. Idempotent no-op, never applied.
    Match,
}

impl Outcome {
    /// Whether entities with this outcome start selected.
    /// Missing/LabelMatch are additive and non-destructive; Conflict and
    /// Match are never applied silently.
    pub fn default_selected(&self) -> bool {
        matches!(self, Self::Missing | Self::LabelMatch)
    }

    /// Match entities can never be selected for apply.
    pub fn selectable(&self) -> bool {
        !matches!(self, Self::Match)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Missing => "Missing",
            Self::LabelMatch => "Label Match",
            Self::Conflict => "Conflict",
            Self::Match => "Match",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Missing => "+",
            Self::LabelMatch => "≈",
            Self::Conflict => "⚡",
            Self::Match => "✓",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A bundled entity together with its reconciliation outcome and the user's
/// apply selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledEntity {
    pub entity: Entity,
    pub outcome: Outcome,
    pub selected: bool,
}

/// Final status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Success,
    Failure,
}

/// What failed, when the attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Lock not acquired within the bounded wait. No target changes exist.
    LockTimeout,
    /// An entity apply failed; rollback was attempted.
    Apply,
    /// The final commit failed; rollback was attempted.
    Commit,
    /// Rollback itself failed. Target state may be inconsistent and
    /// requires manual intervention.
    Rollback,
}

/// Whether rollback ran for an attempt, and how it went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackStatus {
    /// Nothing had been applied, so there was nothing to revert.
    NotNeeded,
    /// Every applied operation was reverted; pre-attempt state restored.
    Completed,
    /// A revert failed. Target state may be inconsistent.
    Failed,
}

/// One timestamped line of the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Immutable record of one execution attempt. Created when execution starts,
/// finalized exactly once, then persisted as migration history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Local>,
    /// Set only when the commit call succeeded.
    pub committed_at: Option<DateTime<Local>>,
    pub outcome: ExecutionOutcome,
    /// The selected entities this attempt tried to apply, in apply order.
    pub attempted: Vec<ReconciledEntity>,
    /// Append-only log: one line per phase transition and per entity
    /// applied or reverted.
    pub log: Vec<LogLine>,
    /// How long the target lock was held, in milliseconds. Zero when the
    /// lock was never acquired.
    pub lock_held_ms: u64,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub rollback: RollbackStatus,
}

impl ExecutionRecord {
    pub fn entity_count(&self) -> usize {
        self.attempted.len()
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == ExecutionOutcome::Success
    }
}

/// Reference to a migration scope inside the source instance.
///
/// Opaque to the engine: the source accessor resolves it to root entities.
/// Mirrors the platform's use case → facility → checklist selection
/// hierarchy; narrower fields are optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRef {
    pub use_case: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<String>,
}

impl ScopeRef {
    pub fn use_case(use_case: impl Into<String>) -> Self {
        Self {
            use_case: use_case.into(),
            facility: None,
            checklist: None,
        }
    }

    pub fn facility(use_case: impl Into<String>, facility: impl Into<String>) -> Self {
        Self {
            use_case: use_case.into(),
            facility: Some(facility.into()),
            checklist: None,
        }
    }

    /// Canonical path form, also used as the scope key by stores.
    pub fn path(&self) -> String {
        let mut path = self.use_case.clone();
        if let Some(facility) = &self.facility {
            path.push('/');
            path.push_str(facility);
        }
        if let Some(checklist) = &self.checklist {
            path.push('/');
            path.push_str(checklist);
        }
        path
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(label: &str, kind: EntityKind) -> Entity {
        Entity::new(Uuid::new_v4(), label, kind)
    }

    #[test]
    fn test_kind_ranking() {
        assert!(EntityKind::ObjectType.rank() < EntityKind::Property.rank());
        assert_eq!(EntityKind::Property.rank(), EntityKind::Relation.rank());
        assert!(EntityKind::Relation.rank() < EntityKind::Record.rank());
        assert!(EntityKind::Record.rank() < EntityKind::Enumeration.rank());
        assert!(EntityKind::Enumeration.rank() < EntityKind::Template.rank());
    }

    #[test]
    fn test_same_identity_by_id_only() {
        let id = Uuid::new_v4();
        let a = Entity::new(id, "User", EntityKind::ObjectType);
        let b = Entity::new(id, "Renamed User", EntityKind::ObjectType);

        assert!(a.is_same(&b));
        assert!(!a.is_label_equivalent(&b));
    }

    #[test]
    fn test_label_equivalence_needs_kind_and_label() {
        let a = entity("Status", EntityKind::Enumeration);
        let b = entity("Status", EntityKind::Enumeration);
        let c = entity("Status", EntityKind::ObjectType);

        assert!(a.is_label_equivalent(&b));
        assert!(!a.is_same(&b));
        assert!(!a.is_label_equivalent(&c));
    }

    #[test]
    fn test_bundle_summary_counts() {
        let bundle = Bundle::new(vec![
            entity("User", EntityKind::ObjectType),
            entity("Order", EntityKind::ObjectType),
            entity("User.name", EntityKind::Property),
            entity("OrderFlow", EntityKind::Template),
        ]);

        assert_eq!(bundle.len(), 4);
        assert_eq!(bundle.count(EntityKind::ObjectType), 2);
        assert_eq!(bundle.count(EntityKind::Property), 1);
        assert_eq!(bundle.count(EntityKind::Template), 1);
        assert_eq!(bundle.count(EntityKind::Relation), 0);
    }

    #[test]
    fn test_default_selection_per_outcome() {
        assert!(Outcome::Missing.default_selected());
        assert!(Outcome::LabelMatch.default_selected());
        assert!(!Outcome::Conflict.default_selected());
        assert!(!Outcome::Match.default_selected());

        assert!(Outcome::Conflict.selectable());
        assert!(!Outcome::Match.selectable());
    }

    #[test]
    fn test_scope_path() {
        let scope = ScopeRef::facility("Onboarding", "Facility A");
        assert_eq!(scope.path(), "Onboarding/Facility A");
        assert_eq!(ScopeRef::use_case("Onboarding").path(), "Onboarding");
    }
}
