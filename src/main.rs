mod cli;

use std::process;

use clap::{CommandFactory, Parser};
use cli::{commands, Cli, Commands};
use dotenv::dotenv;
use photo_organizer::config;
use tracing::error;

fn main() {
    dotenv().ok();

    let _guard = cli::logging::init_logger();

    let args = Cli::parse();

    let config = match config::load_configuration_from(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let cancel = cli::interrupt::interrupt_token();

    let result = match &args.command {
        Some(Commands::Analyze(cmd)) => commands::run_analyze(&config, cmd, &cancel),
        Some(Commands::Organize(cmd)) => commands::run_organize(&config, cmd, &cancel),
        Some(Commands::Dupes(cmd)) => commands::run_dupes(&config, cmd, &cancel),
        Some(Commands::Rollback(cmd)) => commands::run_rollback(&config, cmd),
        Some(Commands::Journals(cmd)) => commands::run_journals(&config, cmd),
        Some(Commands::PrintConfig) => commands::run_print_config(&config),
        Some(Commands::CacheStats(cmd)) => commands::run_cache_stats(&config, cmd),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}
