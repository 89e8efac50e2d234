// ABOUTME: Entry point for the rollout CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use rollout::config::{self, Config};
use rollout::error::Result;
use rollout::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins unless --verbose asks for debug output
    let filter = if cli.verbose {
        EnvFilter::new("rollout=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(OutputMode::from_flags(cli.quiet, cli.json));

    if let Err(e) = run(cli, output.clone()).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: Output) -> Result<()> {
    match cli.command {
        Commands::Init { project, force } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, project.as_deref(), force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(())
        }
        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            commands::validate(&config, &output)
        }
        Commands::Steps => {
            let config = load_config(cli.config.as_deref())?;
            commands::steps(&config, &output)
        }
        Commands::Deploy {
            project,
            skip_steps,
            dry_run,
            id,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let options = commands::DeployOptions {
                project,
                skip_steps: skip_steps.into_iter().collect(),
                dry_run,
                id,
            };
            commands::deploy(config, options, output).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(&env::current_dir()?),
    }
}
