// ABOUTME: Library root for rollout - the deployment workflow engine.
// ABOUTME: The command-line front end is in main.rs.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod process;
pub mod step;
pub mod types;
