// ABOUTME: Command module aggregator for the rollout CLI.
// ABOUTME: Re-exports deploy, validate, and steps command handlers.

mod deploy;
mod plan;
mod validate;

pub use deploy::{DeployOptions, deploy};
pub use plan::steps;
pub use validate::validate;
