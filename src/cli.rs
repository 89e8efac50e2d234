// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Multi-phase deployment workflows with backup and rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (discovered in the current directory if omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new rollout.yml configuration file
    Init {
        /// Project name written into the template
        #[arg(short, long)]
        project: Option<String>,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Check the configuration without running anything
    Validate,

    /// Show the configured steps, their commands, and backup phases
    Steps,

    /// Run the deployment workflow
    Deploy {
        /// Expected project name; refuses to run if the configuration differs
        #[arg(short, long)]
        project: Option<String>,

        /// 1-based step positions to skip, comma separated
        #[arg(long, value_delimiter = ',')]
        skip_steps: Vec<usize>,

        /// Print the plan without executing it
        #[arg(long)]
        dry_run: bool,

        /// Workflow id (defaults to <project>-<timestamp>)
        #[arg(long)]
        id: Option<String>,
    },
}
