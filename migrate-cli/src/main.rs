mod cli;
mod config;
mod migration;
mod remote;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use config::MigrationConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Cli::parse();
    let config = MigrationConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Migrate(args) => cli::migrate::handle_migrate_command(args, config).await,
        Commands::Plan(args) => cli::plan::handle_plan_command(args).await,
        Commands::History(args) => cli::history::handle_history_command(args, config),
        Commands::Seed(args) => cli::seed::handle_seed_command(args),
    }
}
