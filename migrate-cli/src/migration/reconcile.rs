//! Reconciliation engine
//!
//! Classifies every bundled entity against the target instance into one of
//! four outcomes and computes the default apply selection. This stage is
//! read-only and deterministic: re-running it on unchanged inputs yields
//! identical classifications.
//!
//! Classification precedence, per entity:
//! 1. id exists in target, label matches         -> Match
//! 2. id exists in target, label differs         -> Conflict
//! 3. id absent, no label-equivalent entity      -> Missing
//! 4. id absent, a label-equivalent entity exists-> LabelMatch

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::remote::TargetAccessor;

use super::types::{Bundle, EntityKind, Outcome, ReconciledEntity};

/// Classify every entity of the bundle. Output preserves bundle order and
/// cardinality: one entry per bundled entity, no drops.
pub async fn reconcile(bundle: &Bundle, target: &dyn TargetAccessor) -> Result<ReconciledSet> {
    let mut entries = Vec::with_capacity(bundle.len());

    for entity in bundle.entities() {
        let outcome = match target.get_entity(entity.id).await? {
            Some(existing) if existing.is_label_equivalent(entity) => Outcome::Match,
            Some(_) => Outcome::Conflict,
            None => match target.find_by_label(entity.kind, &entity.label).await? {
                Some(_) => Outcome::LabelMatch,
                None => Outcome::Missing,
            },
        };

        entries.push(ReconciledEntity {
            entity: entity.clone(),
            outcome,
            selected: outcome.default_selected(),
        });
    }

    let set = ReconciledSet { entries };
    log::info!("reconciled {} entities: {:?}", set.len(), set.counts());
    Ok(set)
}

/// The reconciled entities of one attempt, with the user's apply
/// selection. Selection is mutable until execution starts; the executor
/// reads it by reference and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledSet {
    entries: Vec<ReconciledEntity>,
}

impl ReconciledSet {
    /// Entries in bundle (apply) order.
    pub fn entries(&self) -> &[ReconciledEntity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of entities per outcome.
    pub fn counts(&self) -> BTreeMap<Outcome, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.outcome).or_insert(0) += 1;
        }
        counts
    }

    pub fn selected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.selected).count()
    }

    /// Selected entries, still in apply order.
    pub fn selected(&self) -> Vec<&ReconciledEntity> {
        self.entries.iter().filter(|e| e.selected).collect()
    }

    /// Entries filtered by outcome and/or kind, in apply order.
    pub fn filter(
        &self,
        outcome: Option<Outcome>,
        kind: Option<EntityKind>,
    ) -> Vec<&ReconciledEntity> {
        self.entries
            .iter()
            .filter(|e| outcome.is_none_or(|o| e.outcome == o))
            .filter(|e| kind.is_none_or(|k| e.entity.kind == k))
            .collect()
    }

    /// Flip one entity's selection. Match entities are never selectable.
    pub fn toggle(&mut self, id: Uuid) -> Result<bool> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.entity.id == id) else {
            bail!("no reconciled entity with id {id}");
        };
        if !entry.outcome.selectable() {
            bail!(
                "'{}' already matches the target and cannot be selected",
                entry.entity.label
            );
        }
        entry.selected = !entry.selected;
        Ok(entry.selected)
    }

    /// Set one entity's selection. Same rules as [`Self::toggle`].
    pub fn set_selected(&mut self, id: Uuid, selected: bool) -> Result<()> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.entity.id == id) else {
            bail!("no reconciled entity with id {id}");
        };
        if !entry.outcome.selectable() && selected {
            bail!(
                "'{}' already matches the target and cannot be selected",
                entry.entity.label
            );
        }
        entry.selected = selected;
        Ok(())
    }

    /// Select every entity with the given outcome. A no-op for Match.
    /// Returns the number of entries that changed.
    pub fn select_all(&mut self, outcome: Outcome) -> usize {
        if !outcome.selectable() {
            return 0;
        }
        self.set_all(outcome, true)
    }

    /// Deselect every entity with the given outcome.
    /// Returns the number of entries that changed.
    pub fn deselect_all(&mut self, outcome: Outcome) -> usize {
        self.set_all(outcome, false)
    }

    fn set_all(&mut self, outcome: Outcome, selected: bool) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.outcome == outcome && entry.selected != selected {
                entry.selected = selected;
                changed += 1;
            }
        }
        changed
    }
}
