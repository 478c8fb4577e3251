//! Main entry point for tabrecon CLI

use clap::Parser;

mod cli;
mod commands;
mod output;
mod progress;

use cli::Cli;
use commands::{execute_command, Outcome};

/// Exit code when reconciliation succeeded but found discrepancies
const EXIT_DISCREPANCIES: i32 = 2;

fn main() {
    // Load environment variables from .env file if present
    if std::path::Path::new(".env").exists() {
        if let Err(e) = dotenv::dotenv() {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    match execute_command(cli.command, cli.config.as_deref()) {
        Ok(Outcome::Reconciled) => {}
        Ok(Outcome::Discrepancies) => std::process::exit(EXIT_DISCREPANCIES),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
