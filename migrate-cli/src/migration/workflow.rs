//! Workflow controller
//!
//! Five-step sequencer over one migration attempt. Owns the attempt's
//! state (selection, bundle, reconciled set, execution record) and gates
//! which engine stage may run next; it contains no migration logic of its
//! own. Every transition is a guarded method, so invalid jumps (executing
//! without a reconciled set, packing before selecting) are rejected with a
//! typed error instead of being representable.
//!
//! Forward transitions happen only on stage completion. Going back
//! discards everything the abandoned stages produced: a partial execution
//! is never resumed, only restarted.

use std::sync::Arc;

use anyhow::Result;

use crate::config::MigrationConfig;
use crate::remote::{SourceAccessor, TargetAccessor};

use super::bundle;
use super::error::WorkflowError;
use super::executor::TransactionExecutor;
use super::reconcile::{self, ReconciledSet};
use super::types::{Bundle, ExecutionRecord, ScopeRef};

/// The wizard steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationStep {
    #[default]
    SourceTargetSelection,
    BundlePacking,
    ConflictResolution,
    Execution,
    Complete,
}

impl MigrationStep {
    pub fn number(&self) -> u8 {
        match self {
            Self::SourceTargetSelection => 1,
            Self::BundlePacking => 2,
            Self::ConflictResolution => 3,
            Self::Execution => 4,
            Self::Complete => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SourceTargetSelection => "Source & Target Selection",
            Self::BundlePacking => "Bundle Packing",
            Self::ConflictResolution => "Conflict Resolution",
            Self::Execution => "Execution",
            Self::Complete => "Complete",
        }
    }
}

/// The chosen source/target pair and migration scope.
pub struct Selection {
    pub source: Arc<dyn SourceAccessor>,
    pub target: Arc<dyn TargetAccessor>,
    pub scope: ScopeRef,
    pub source_name: String,
    pub target_name: String,
}

/// Sequencer for one migration attempt.
pub struct WorkflowController {
    config: MigrationConfig,
    step: MigrationStep,
    selection: Option<Selection>,
    bundle: Option<Bundle>,
    reconciled: Option<ReconciledSet>,
    record: Option<ExecutionRecord>,
    cancelled: bool,
}

impl WorkflowController {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            step: MigrationStep::default(),
            selection: None,
            bundle: None,
            reconciled: None,
            record: None,
            cancelled: false,
        }
    }

    pub fn step(&self) -> MigrationStep {
        self.step
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    pub fn reconciled(&self) -> Option<&ReconciledSet> {
        self.reconciled.as_ref()
    }

    pub fn record(&self) -> Option<&ExecutionRecord> {
        self.record.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn guard(&self, expected: MigrationStep, action: &'static str) -> Result<(), WorkflowError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(WorkflowError::new(self.step, action))
        }
    }

    /// Complete source/target selection and advance to bundle packing.
    pub fn select_source_target(&mut self, selection: Selection) -> Result<(), WorkflowError> {
        self.guard(MigrationStep::SourceTargetSelection, "select source and target")?;
        log::info!(
            "migrating '{}' from '{}' to '{}'",
            selection.scope,
            selection.source_name,
            selection.target_name
        );
        self.selection = Some(selection);
        self.step = MigrationStep::BundlePacking;
        Ok(())
    }

    /// Assemble the bundle. On failure the controller stays in
    /// BundlePacking; nothing was written anywhere, so retrying is safe.
    pub async fn pack_bundle(&mut self) -> Result<&Bundle> {
        self.guard(MigrationStep::BundlePacking, "pack the bundle")?;
        let selection = self.selection.as_ref().expect("selection set before packing");

        let bundle = bundle::assemble(selection.source.as_ref(), &selection.scope).await?;
        self.bundle = Some(bundle);
        self.step = MigrationStep::ConflictResolution;
        Ok(self.bundle.as_ref().unwrap())
    }

    /// Side-exit: abort the attempt during packing, without error. No
    /// target-side effects exist yet.
    pub fn cancel(&mut self) -> Result<(), WorkflowError> {
        self.guard(MigrationStep::BundlePacking, "cancel the attempt")?;
        log::info!("migration attempt cancelled during bundle packing");
        self.cancelled = true;
        self.step = MigrationStep::Complete;
        Ok(())
    }

    /// Run (or re-run) reconciliation against the target. Re-running
    /// resets the selection to the per-outcome defaults.
    pub async fn reconcile(&mut self) -> Result<&ReconciledSet> {
        self.guard(MigrationStep::ConflictResolution, "reconcile")?;
        let selection = self.selection.as_ref().expect("selection set before reconciling");
        let bundle = self.bundle.as_ref().expect("bundle packed before reconciling");

        let set = reconcile::reconcile(bundle, selection.target.as_ref()).await?;
        self.reconciled = Some(set);
        Ok(self.reconciled.as_ref().unwrap())
    }

    /// Mutable access to the selection set, only while conflict resolution
    /// is the active step. Once execution begins the set is frozen.
    pub fn reconciled_mut(&mut self) -> Option<&mut ReconciledSet> {
        if self.step == MigrationStep::ConflictResolution {
            self.reconciled.as_mut()
        } else {
            None
        }
    }

    /// Freeze the selection set and advance to execution.
    pub fn begin_execution(&mut self) -> Result<(), WorkflowError> {
        self.guard(MigrationStep::ConflictResolution, "begin execution")?;
        if self.reconciled.is_none() {
            return Err(WorkflowError::new(self.step, "execute without a reconciled set"));
        }
        self.step = MigrationStep::Execution;
        Ok(())
    }

    /// Run the transaction executor. Always finishes in Complete: the
    /// record carries success or failure.
    pub async fn execute(&mut self) -> Result<&ExecutionRecord, WorkflowError> {
        self.guard(MigrationStep::Execution, "execute")?;
        let selection = self.selection.as_ref().expect("selection set before executing");
        let reconciled = self.reconciled.as_ref().expect("reconciled set frozen before executing");

        let executor =
            TransactionExecutor::new(selection.target.as_ref(), self.config.lock.clone());
        let record = executor.run(&selection.target_name, reconciled).await;

        self.record = Some(record);
        self.step = MigrationStep::Complete;
        Ok(self.record.as_ref().unwrap())
    }

    /// Step backward, discarding everything the abandoned stages produced.
    pub fn back(&mut self) -> Result<(), WorkflowError> {
        match self.step {
            MigrationStep::ConflictResolution => {
                self.bundle = None;
                self.reconciled = None;
                self.step = MigrationStep::BundlePacking;
                Ok(())
            }
            MigrationStep::Execution => {
                self.record = None;
                self.step = MigrationStep::ConflictResolution;
                Ok(())
            }
            step => Err(WorkflowError::new(step, "go back")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::types::{Entity, EntityKind, ExecutionOutcome};
    use crate::remote::MemoryInstance;
    use uuid::Uuid;

    fn entity(label: &str, kind: EntityKind) -> Entity {
        Entity::new(Uuid::new_v4(), label, kind)
    }

    fn selection_with(source: Arc<MemoryInstance>, target: Arc<MemoryInstance>) -> Selection {
        Selection {
            source,
            target,
            scope: ScopeRef::use_case("Core"),
            source_name: "staging".into(),
            target_name: "production".into(),
        }
    }

    /// Source with two object types in scope, empty target.
    fn environment() -> (Arc<MemoryInstance>, Arc<MemoryInstance>) {
        let source = MemoryInstance::new("staging");
        let target = MemoryInstance::new("production");

        let user = entity("User", EntityKind::ObjectType);
        let order = entity("Order", EntityKind::ObjectType);
        let scope = ScopeRef::use_case("Core");
        source.define_scope(&scope, vec![user.id, order.id]);
        source.insert_entity(user);
        source.insert_entity(order);

        (Arc::new(source), Arc::new(target))
    }

    #[tokio::test]
    async fn test_full_forward_flow() {
        let (source, target) = environment();
        let mut controller = WorkflowController::new(MigrationConfig::default());
        assert_eq!(controller.step(), MigrationStep::SourceTargetSelection);

        controller
            .select_source_target(selection_with(source, target.clone()))
            .unwrap();
        assert_eq!(controller.step(), MigrationStep::BundlePacking);

        let bundle = controller.pack_bundle().await.unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(controller.step(), MigrationStep::ConflictResolution);

        let set = controller.reconcile().await.unwrap();
        assert_eq!(set.selected_count(), 2);

        controller.begin_execution().unwrap();
        assert_eq!(controller.step(), MigrationStep::Execution);

        let record = controller.execute().await.unwrap();
        assert_eq!(record.outcome, ExecutionOutcome::Success);
        assert_eq!(controller.step(), MigrationStep::Complete);
        assert_eq!(target.entity_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_jumps_are_rejected() {
        let (source, target) = environment();
        let mut controller = WorkflowController::new(MigrationConfig::default());

        // Nothing selected yet: packing, reconciling and executing are all
        // invalid from the first step.
        assert!(controller.pack_bundle().await.is_err());
        assert!(controller.reconcile().await.is_err());
        assert!(controller.begin_execution().is_err());
        assert!(controller.execute().await.is_err());
        assert!(controller.back().is_err());

        controller
            .select_source_target(selection_with(source.clone(), target.clone()))
            .unwrap();
        // Selecting twice is invalid.
        assert!(
            controller
                .select_source_target(selection_with(source, target))
                .is_err()
        );
        // Executing without a reconciled set is unreachable.
        assert!(controller.begin_execution().is_err());
    }

    #[tokio::test]
    async fn test_selection_is_frozen_during_execution() {
        let (source, target) = environment();
        let mut controller = WorkflowController::new(MigrationConfig::default());
        controller
            .select_source_target(selection_with(source, target))
            .unwrap();
        controller.pack_bundle().await.unwrap();
        controller.reconcile().await.unwrap();

        assert!(controller.reconciled_mut().is_some());
        controller.begin_execution().unwrap();
        assert!(controller.reconciled_mut().is_none());
    }

    #[tokio::test]
    async fn test_back_from_conflict_resolution_discards_downstream() {
        let (source, target) = environment();
        let mut controller = WorkflowController::new(MigrationConfig::default());
        controller
            .select_source_target(selection_with(source, target))
            .unwrap();
        controller.pack_bundle().await.unwrap();
        controller.reconcile().await.unwrap();

        controller.back().unwrap();
        assert_eq!(controller.step(), MigrationStep::BundlePacking);
        assert!(controller.bundle().is_none());
        assert!(controller.reconciled().is_none());

        // Packing again works and produces a fresh bundle.
        let bundle = controller.pack_bundle().await.unwrap();
        assert_eq!(bundle.len(), 2);
    }

    #[tokio::test]
    async fn test_back_from_execution_reopens_selection() {
        let (source, target) = environment();
        let mut controller = WorkflowController::new(MigrationConfig::default());
        controller
            .select_source_target(selection_with(source, target))
            .unwrap();
        controller.pack_bundle().await.unwrap();
        controller.reconcile().await.unwrap();
        controller.begin_execution().unwrap();

        controller.back().unwrap();
        assert_eq!(controller.step(), MigrationStep::ConflictResolution);
        assert!(controller.record().is_none());
        // The reconciled set survives and is editable again.
        assert!(controller.reconciled_mut().is_some());
    }

    #[tokio::test]
    async fn test_cancel_is_a_side_exit_from_packing_only() {
        let (source, target) = environment();
        let mut controller = WorkflowController::new(MigrationConfig::default());

        assert!(controller.cancel().is_err());

        controller
            .select_source_target(selection_with(source, target))
            .unwrap();
        controller.cancel().unwrap();

        assert_eq!(controller.step(), MigrationStep::Complete);
        assert!(controller.is_cancelled());
        assert!(controller.record().is_none());
    }

    #[tokio::test]
    async fn test_failed_packing_is_retryable() {
        let source = MemoryInstance::new("staging");
        let target = MemoryInstance::new("production");

        // Scope root depends on an entity that does not exist yet.
        let user = entity("User", EntityKind::ObjectType);
        let missing = Uuid::new_v4();
        source.add_dependency(user.id, missing);
        let scope = ScopeRef::use_case("Core");
        source.define_scope(&scope, vec![user.id]);
        source.insert_entity(user);

        let source = Arc::new(source);
        let mut controller = WorkflowController::new(MigrationConfig::default());
        controller
            .select_source_target(Selection {
                source: source.clone(),
                target: Arc::new(target),
                scope,
                source_name: "staging".into(),
                target_name: "production".into(),
            })
            .unwrap();

        assert!(controller.pack_bundle().await.is_err());
        assert_eq!(controller.step(), MigrationStep::BundlePacking);

        // Resolve the dangling dependency and retry.
        source.insert_entity(Entity::new(missing, "Profile", EntityKind::ObjectType));
        let bundle = controller.pack_bundle().await.unwrap();
        assert_eq!(bundle.len(), 2);
    }
}
