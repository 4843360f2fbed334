//! History command handler

use anyhow::{Result, bail};
use colored::Colorize;

use crate::config::MigrationConfig;
use crate::migration::history::HistoryStore;
use crate::migration::types::{ExecutionOutcome, ExecutionRecord};

use super::HistoryArgs;

pub fn handle_history_command(args: HistoryArgs, config: MigrationConfig) -> Result<()> {
    let store = HistoryStore::open(&config.history)?;

    match args.id {
        Some(id) => show_attempt(&store, &id),
        None => list_attempts(&store, args.limit.unwrap_or(config.history.limit)),
    }
}

fn list_attempts(store: &HistoryStore, limit: usize) -> Result<()> {
    let records = store.recent(limit)?;
    if records.is_empty() {
        println!("No migration attempts recorded yet.");
        return Ok(());
    }

    println!(
        "{:<10} {:<20} {:<9} {:>8} {:>10}",
        "ID".bold(),
        "STARTED".bold(),
        "OUTCOME".bold(),
        "ENTITIES".bold(),
        "LOCK (ms)".bold()
    );
    for record in &records {
        println!(
            "{:<10} {:<20} {:<9} {:>8} {:>10}",
            short_id(record),
            record.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            outcome_colored(record),
            record.entity_count(),
            record.lock_held_ms
        );
    }
    Ok(())
}

fn show_attempt(store: &HistoryStore, id: &str) -> Result<()> {
    let Some(record) = store.find(id)? else {
        bail!("no migration attempt with id '{id}'");
    };

    println!(
        "Attempt {} started {} ({})",
        short_id(&record).bold(),
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        outcome_colored(&record)
    );
    if let Some(error) = &record.error {
        println!("{} {error}", "Error:".red().bold());
    }
    println!();
    for line in &record.log {
        println!("{line}");
    }
    Ok(())
}

fn short_id(record: &ExecutionRecord) -> String {
    record.id.to_string()[..8].to_string()
}

fn outcome_colored(record: &ExecutionRecord) -> colored::ColoredString {
    match record.outcome {
        ExecutionOutcome::Success => "success".green(),
        ExecutionOutcome::Failure => "failure".red(),
    }
}
