//! Plan command handler

use anyhow::Result;
use colored::Colorize;

use crate::migration::bundle::assemble;
use crate::migration::reconcile::reconcile;
use crate::remote::FileInstance;

use super::{PlanArgs, print_bundle, print_reconciliation, scope_from_args};

/// Read-only dry run: pack and reconcile, print the classification and
/// default selection, write nothing anywhere.
pub async fn handle_plan_command(args: PlanArgs) -> Result<()> {
    let source = FileInstance::load(&args.source)?;
    let target = FileInstance::load(&args.target)?;
    let scope = scope_from_args(args.use_case, args.facility, args.checklist);

    let bundle = assemble(&source, &scope).await?;
    print_bundle(&bundle);
    println!();

    let set = reconcile(&bundle, &target).await?;
    print_reconciliation(&set);
    println!();
    println!(
        "{}",
        "Dry run only. No locks were taken and no changes were made.".dimmed()
    );
    Ok(())
}
