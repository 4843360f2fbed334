//! Migrate command handler

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use dialoguer::{Confirm, MultiSelect, Select};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::migration::history::HistoryStore;
use crate::migration::reconcile::ReconciledSet;
use crate::migration::types::ScopeRef;
use crate::migration::workflow::{Selection, WorkflowController};
use crate::remote::FileInstance;

use super::{MigrateArgs, print_bundle, print_reconciliation, print_record, scope_from_args};

pub async fn handle_migrate_command(args: MigrateArgs, config: MigrationConfig) -> Result<()> {
    let source = FileInstance::load(&args.source)?;
    let target = FileInstance::load(&args.target)?;

    let scope = match args.use_case {
        Some(use_case) => scope_from_args(use_case, args.facility, args.checklist),
        None => {
            if args.yes {
                bail!("--yes requires --use-case: there is nothing to prompt for");
            }
            prompt_scope(&source)?
        }
    };

    let source_name = args.source.display().to_string();
    let target_name = args.target.display().to_string();

    let mut controller = WorkflowController::new(config.clone());
    controller.select_source_target(Selection {
        source: Arc::new(source),
        target: Arc::new(target),
        scope,
        source_name,
        target_name,
    })?;

    let bundle = controller.pack_bundle().await?;
    print_bundle(bundle);
    println!();

    let set = controller.reconcile().await?;
    print_reconciliation(set);
    println!();

    if !args.yes {
        let choices = prompt_selection(set)?;
        let editable = controller
            .reconciled_mut()
            .expect("conflict resolution is the active step");
        for (id, selected) in choices {
            editable.set_selected(id, selected)?;
        }

        let count = editable.selected_count();
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Apply {count} entities to the target as a single all-or-nothing transaction?"
            ))
            .default(false)
            .interact()
            .context("confirmation prompt failed")?;
        if !confirmed {
            println!("Migration aborted. No changes were made.");
            return Ok(());
        }
    }

    controller.begin_execution()?;
    let record = controller.execute().await?;
    print_record(record);

    match HistoryStore::open(&config.history) {
        Ok(store) => {
            if let Err(err) = store.append(record) {
                log::warn!("failed to persist migration history: {err:#}");
            }
        }
        Err(err) => log::warn!("history store unavailable: {err:#}"),
    }

    if !record.succeeded() {
        bail!(
            "migration failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Pick a scope from the source's defined scope paths.
fn prompt_scope(source: &FileInstance) -> Result<ScopeRef> {
    let paths = source.scope_paths();
    if paths.is_empty() {
        bail!("the source snapshot defines no migration scopes");
    }

    let index = Select::new()
        .with_prompt("Select the scope to migrate")
        .items(&paths)
        .default(0)
        .interact()
        .context("scope prompt failed")?;

    let mut parts = paths[index].split('/');
    Ok(ScopeRef {
        use_case: parts.next().unwrap_or_default().to_string(),
        facility: parts.next().map(str::to_string),
        checklist: parts.next().map(str::to_string),
    })
}

/// Let the user toggle the selectable entities, pre-checked per the
/// default selection. Match entities are not offered.
fn prompt_selection(set: &ReconciledSet) -> Result<Vec<(Uuid, bool)>> {
    let selectable: Vec<_> = set
        .entries()
        .iter()
        .filter(|e| e.outcome.selectable())
        .collect();
    if selectable.is_empty() {
        println!("{}", "Every entity already matches the target.".dimmed());
        return Ok(Vec::new());
    }

    let items: Vec<String> = selectable
        .iter()
        .map(|e| {
            format!(
                "{:<12} {:<12} {}",
                e.outcome.label(),
                e.entity.kind.label(),
                e.entity.label
            )
        })
        .collect();
    let defaults: Vec<bool> = selectable.iter().map(|e| e.selected).collect();

    let chosen = MultiSelect::new()
        .with_prompt("Select entities to apply (space toggles, enter confirms)")
        .items(&items)
        .defaults(&defaults)
        .interact()
        .context("selection prompt failed")?;

    Ok(selectable
        .iter()
        .enumerate()
        .map(|(index, entry)| (entry.entity.id, chosen.contains(&index)))
        .collect())
}
