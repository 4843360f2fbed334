//! Transaction executor
//!
//! Applies the user-approved subset of a reconciled set to the target
//! instance as a single all-or-nothing unit:
//! Idle -> LockAcquiring -> Applying -> Committing -> Released on success,
//! with RollingBack before Released on any failure past lock acquisition.
//!
//! Every apply records its inverse in an undo journal; the first failure
//! stops further applies and replays the journal in reverse. The lock is
//! released on every exit path, including after a failed rollback. Each
//! phase transition and each entity applied or reverted appends a
//! timestamped line to the attempt's execution log.

use std::time::Instant;

use chrono::Local;
use rand::Rng;
use uuid::Uuid;

use crate::config::LockConfig;
use crate::remote::{ApplyOp, LockHandle, RevertOp, TargetAccessor};

use super::error::MigrationError;
use super::reconcile::ReconciledSet;
use super::types::{
    ExecutionOutcome, ExecutionRecord, LogLine, Outcome, ReconciledEntity, RollbackStatus,
};

/// Executor phases. `Released` is terminal; a new attempt starts from a
/// fresh `Idle` executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    LockAcquiring,
    Applying,
    Committing,
    RollingBack,
    Released,
}

pub struct TransactionExecutor<'a> {
    target: &'a dyn TargetAccessor,
    lock: LockConfig,
}

impl<'a> TransactionExecutor<'a> {
    pub fn new(target: &'a dyn TargetAccessor, lock: LockConfig) -> Self {
        Self { target, lock }
    }

    /// Run one attempt over the frozen selection. Never panics out of the
    /// attempt: every failure mode is captured in the returned record.
    pub async fn run(&self, scope: &str, reconciled: &ReconciledSet) -> ExecutionRecord {
        let attempted: Vec<ReconciledEntity> =
            reconciled.selected().into_iter().cloned().collect();

        let mut attempt = Attempt::begin(attempted);
        log::info!(
            "executing migration against '{scope}': {} selected entities",
            attempt.record.attempted.len()
        );

        let handle = match self.acquire(scope, &mut attempt).await {
            Some(handle) => handle,
            None => return attempt.finish(),
        };
        let lock_start = Instant::now();

        let failure = self.apply_all(&handle, &mut attempt).await;

        if let Some(failure) = failure {
            self.roll_back(&handle, &mut attempt, failure).await;
        } else {
            attempt.record.committed_at = Some(Local::now());
            attempt.record.outcome = ExecutionOutcome::Success;
        }

        self.release(handle, &mut attempt, lock_start).await;
        attempt.finish()
    }

    /// Bounded-wait lock acquisition with paced, optionally jittered
    /// retries. Returns None after logging the failure into the record.
    async fn acquire(&self, scope: &str, attempt: &mut Attempt) -> Option<LockHandle> {
        attempt.transition(Phase::LockAcquiring);
        attempt.log("Starting transaction execution...");
        attempt.log("Acquiring lock on target instance...");

        let deadline = Instant::now() + self.lock.acquire_timeout();
        loop {
            match self.target.acquire_lock(scope, self.lock.lease()).await {
                Ok(Some(handle)) => {
                    attempt.log(
                        "Lock acquired. Target instance is now read-only for other users.",
                    );
                    return Some(handle);
                }
                Ok(None) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        let err = MigrationError::LockTimeout {
                            scope: scope.to_string(),
                            waited: self.lock.acquire_timeout(),
                        };
                        attempt.log(format!("Error: {err}"));
                        attempt.log("Lock not acquired. No changes were made to the target instance.");
                        attempt.fail(err, RollbackStatus::NotNeeded);
                        return None;
                    }

                    let mut delay = self.lock.retry_delay();
                    if self.lock.jitter {
                        let jitter_ms = rand::rng().random_range(0..=self.lock.retry_delay_ms / 2);
                        delay += std::time::Duration::from_millis(jitter_ms);
                    }
                    tokio::time::sleep(delay.min(remaining)).await;
                }
                Err(err) => {
                    attempt.log(format!("Error: failed to acquire lock: {err:#}"));
                    attempt.log("No changes were made to the target instance.");
                    attempt.record.error = Some(format!("failed to acquire lock: {err:#}"));
                    attempt.record.rollback = RollbackStatus::NotNeeded;
                    return None;
                }
            }
        }
    }

    /// Apply every selected entity in bundle order, then commit. Returns
    /// the failure to roll back from, if any. The undo journal grows one
    /// entry per successful apply.
    async fn apply_all(&self, handle: &LockHandle, attempt: &mut Attempt) -> Option<MigrationError> {
        attempt.transition(Phase::Applying);
        attempt.log("Beginning single transaction commit...");

        let entries = attempt.record.attempted.clone();
        for entry in &entries {
            let label = entry.entity.label.clone();

            let (op, undo) = match entry.outcome {
                // Additive outcomes create the entity under its source id.
                Outcome::Missing | Outcome::LabelMatch => (
                    ApplyOp::Create,
                    RevertOp::Remove { id: entry.entity.id },
                ),
                // A selected conflict is an explicit override: update the
                // target entity, keeping its pre-image for rollback.
                Outcome::Conflict => {
                    let pre_image = match self.target.get_entity(entry.entity.id).await {
                        Ok(Some(entity)) => entity,
                        Ok(None) => {
                            return Some(MigrationError::ApplyFailure {
                                entity: label,
                                source: anyhow::anyhow!(
                                    "conflicting entity no longer exists in the target"
                                ),
                            });
                        }
                        Err(source) => {
                            return Some(MigrationError::ApplyFailure {
                                entity: label,
                                source,
                            });
                        }
                    };
                    (ApplyOp::Update, RevertOp::Restore { entity: pre_image })
                }
                Outcome::Match => continue,
            };

            match self.target.apply(handle, &entry.entity, op).await {
                Ok(()) => {
                    let verb = match op {
                        ApplyOp::Create => "Creating",
                        ApplyOp::Update => "Updating",
                    };
                    attempt.log(format!("{verb} {} '{label}'...", entry.entity.kind));
                    attempt.journal.push((label, undo));
                }
                Err(source) => {
                    return Some(MigrationError::ApplyFailure {
                        entity: label,
                        source,
                    });
                }
            }
        }

        attempt.log("All entities processed successfully.");

        attempt.transition(Phase::Committing);
        attempt.log("Committing transaction...");
        if let Err(source) = self.target.commit(handle).await {
            return Some(MigrationError::CommitFailure { source });
        }
        attempt.log("Transaction committed successfully.");
        None
    }

    /// Replay the undo journal in strict reverse order. A revert failure
    /// is escalated over the original failure: the target may now be
    /// inconsistent.
    async fn roll_back(
        &self,
        handle: &LockHandle,
        attempt: &mut Attempt,
        failure: MigrationError,
    ) {
        attempt.transition(Phase::RollingBack);
        attempt.log(format!("Error: {failure}"));
        log::error!("migration failed: {failure}");

        if attempt.journal.is_empty() {
            attempt.log("No changes had been applied; nothing to roll back.");
            attempt.fail(failure, RollbackStatus::NotNeeded);
            return;
        }

        attempt.log("Initiating automatic rollback...");
        attempt.log("Rolling back all changes...");

        let journal = std::mem::take(&mut attempt.journal);
        for (label, undo) in journal.iter().rev() {
            match self.target.revert(handle, undo).await {
                Ok(()) => attempt.log(format!("Reverted '{label}'.")),
                Err(source) => {
                    let rollback_failure = MigrationError::RollbackFailure {
                        entity: label.clone(),
                        source,
                    };
                    attempt.log(format!("Error: {rollback_failure}"));
                    log::error!("{rollback_failure}");
                    attempt.fail(rollback_failure, RollbackStatus::Failed);
                    return;
                }
            }
        }

        attempt.log("Rollback complete. No changes were made to the target instance.");
        attempt.fail(failure, RollbackStatus::Completed);
    }

    /// Unconditional cleanup: runs on success, apply failure, and rollback
    /// failure alike.
    async fn release(&self, handle: LockHandle, attempt: &mut Attempt, lock_start: Instant) {
        attempt.log("Releasing lock on target instance...");
        match self.target.release(handle).await {
            Ok(()) => attempt.log("Lock released. Target instance is now writable."),
            Err(err) => {
                attempt.log(format!("Error: failed to release lock: {err:#}"));
                log::error!("failed to release target lock: {err:#}");
            }
        }
        attempt.record.lock_held_ms = lock_start.elapsed().as_millis() as u64;
        attempt.transition(Phase::Released);
    }
}

/// Mutable state of one run, finalized into the immutable record.
struct Attempt {
    record: ExecutionRecord,
    journal: Vec<(String, RevertOp)>,
    phase: Phase,
}

impl Attempt {
    fn begin(attempted: Vec<ReconciledEntity>) -> Self {
        Self {
            record: ExecutionRecord {
                id: Uuid::new_v4(),
                started_at: Local::now(),
                committed_at: None,
                outcome: ExecutionOutcome::Failure,
                attempted,
                log: Vec::new(),
                lock_held_ms: 0,
                failure: None,
                error: None,
                rollback: RollbackStatus::NotNeeded,
            },
            journal: Vec::new(),
            phase: Phase::Idle,
        }
    }

    fn transition(&mut self, next: Phase) {
        log::debug!("executor phase {:?} -> {next:?}", self.phase);
        self.phase = next;
    }

    fn log(&mut self, message: impl Into<String>) {
        let line = LogLine::now(message);
        log::info!("{}", line.message);
        self.record.log.push(line);
    }

    fn fail(&mut self, error: MigrationError, rollback: RollbackStatus) {
        self.record.failure = error.failure_kind();
        self.record.error = Some(error.to_string());
        self.record.rollback = rollback;
        self.record.outcome = ExecutionOutcome::Failure;
    }

    fn finish(self) -> ExecutionRecord {
        self.record
    }
}
