// ABOUTME: Validate command implementation.
// ABOUTME: Reports every configuration problem; the first one becomes the exit error.

use rollout::config::Config;
use rollout::error::{Error, Result};
use rollout::output::Output;

pub fn validate(config: &Config, output: &Output) -> Result<()> {
    let problems = config.problems();

    match problems.split_first() {
        None => {
            output.success(&format!(
                "Configuration for {} is valid",
                config.project.name
            ));
            Ok(())
        }
        Some((first, rest)) => {
            for problem in rest {
                output.warning(&problem.to_string());
            }
            Err(Error::Config(first.clone()))
        }
    }
}
