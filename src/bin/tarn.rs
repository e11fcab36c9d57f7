// src/bin/tarn.rs

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tarn::cli::{Cli, Commands};
use tarn::commands::check::check_paths;
use tarn::commands::inspect::inspect_file;
use tarn::commands::run::run_file;

fn main() -> ExitCode {
    // Initialize tracing if TARN_LOG is set
    if let Ok(filter) = EnvFilter::try_from_env("TARN_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
        tracing::debug!("tracing initialized");
    }

    let cli = Cli::parse();
    let use_color = cli.color.use_color();

    match cli.command {
        Commands::Check { paths, lint } => check_paths(&paths, lint, use_color),
        Commands::Inspect { inspect_type, file } => inspect_file(inspect_type, &file),
        Commands::Run { file } => run_file(&file),
    }
}
