//! Command-line interface
//!
//! Command tree and the shared terminal rendering used by the migrate,
//! plan and history commands.

pub mod history;
pub mod migrate;
pub mod plan;
pub mod seed;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::migration::reconcile::ReconciledSet;
use crate::migration::types::{Bundle, ExecutionOutcome, ExecutionRecord, Outcome, ScopeRef};

#[derive(Parser)]
#[command(
    name = "migrate-cli",
    about = "Migrate entity bundles between platform instances",
    version
)]
pub struct Cli {
    /// Path to a configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a migration: pack, reconcile, review and apply
    Migrate(MigrateArgs),
    /// Dry run: pack and reconcile, print the classification, write nothing
    Plan(PlanArgs),
    /// List past migration attempts, or show one attempt's log
    History(HistoryArgs),
    /// Write an example source/target snapshot pair
    Seed(SeedArgs),
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Source instance snapshot file
    pub source: PathBuf,
    /// Target instance snapshot file
    pub target: PathBuf,
    /// Use case to migrate (prompted interactively when omitted)
    #[arg(long)]
    pub use_case: Option<String>,
    /// Narrow the scope to one facility
    #[arg(long)]
    pub facility: Option<String>,
    /// Narrow the scope to one checklist
    #[arg(long)]
    pub checklist: Option<String>,
    /// Accept the default selection without prompting
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Source instance snapshot file
    pub source: PathBuf,
    /// Target instance snapshot file
    pub target: PathBuf,
    /// Use case to plan for
    #[arg(long)]
    pub use_case: String,
    /// Narrow the scope to one facility
    #[arg(long)]
    pub facility: Option<String>,
    /// Narrow the scope to one checklist
    #[arg(long)]
    pub checklist: Option<String>,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Show the full log of the attempt with this id (prefix accepted)
    pub id: Option<String>,
    /// How many attempts to list
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct SeedArgs {
    /// Directory to write source.json and target.json into
    #[arg(default_value = ".")]
    pub dir: PathBuf,
}

pub(crate) fn scope_from_args(
    use_case: String,
    facility: Option<String>,
    checklist: Option<String>,
) -> ScopeRef {
    ScopeRef {
        use_case,
        facility,
        checklist,
    }
}

pub(crate) fn print_bundle(bundle: &Bundle) {
    println!(
        "{} {} entities",
        "Bundle packed:".bold(),
        bundle.len().to_string().cyan()
    );
    for (kind, count) in bundle.summary() {
        println!("  {:<12} {}", format!("{}s", kind.label()), count);
    }
}

fn outcome_colored(outcome: Outcome) -> colored::ColoredString {
    let text = format!("{} {}", outcome.symbol(), outcome.label());
    match outcome {
        Outcome::Missing => text.green(),
        Outcome::LabelMatch => text.blue(),
        Outcome::Conflict => text.yellow(),
        Outcome::Match => text.dimmed(),
    }
}

pub(crate) fn print_reconciliation(set: &ReconciledSet) {
    println!("{}", "Reconciliation against target:".bold());
    for entry in set.entries() {
        let marker = if entry.selected { "[x]" } else { "[ ]" };
        println!(
            "  {marker} {:<14} {:<12} {}",
            outcome_colored(entry.outcome),
            entry.entity.kind.label(),
            entry.entity.label
        );
    }
    let counts = set.counts();
    let summary: Vec<String> = counts
        .iter()
        .map(|(outcome, count)| format!("{}: {count}", outcome.label()))
        .collect();
    println!(
        "  {} selected of {} ({})",
        set.selected_count().to_string().cyan(),
        set.len(),
        summary.join(", ")
    );
}

pub(crate) fn print_record(record: &ExecutionRecord) {
    for line in &record.log {
        println!("{line}");
    }
    println!();
    match record.outcome {
        ExecutionOutcome::Success => println!(
            "{} {} entities applied in {} ms",
            "Migration succeeded:".green().bold(),
            record.entity_count(),
            record.lock_held_ms
        ),
        ExecutionOutcome::Failure => {
            println!(
                "{} {}",
                "Migration failed:".red().bold(),
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
