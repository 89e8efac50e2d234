// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates rollout.yml template files.

use std::path::Path;

use crate::error::{Error, Result};

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, project: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template();

    if let Some(name) = project {
        config.project.name = name.to_string();
    }

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let deployment = &config.deployment;
    let steps = deployment
        .steps
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"project:
  name: {}
  version: {}

deployment:
  # 1=validate, 2=build, 3=test, 4=deploy, 5=release
  steps: [{}]
  test_command: "{}"
  deploy_command: "{}"
  release_command: "{}"
  step_timeout: 5m

rollback_on_failure: true

backup:
  enabled: true
  dir: .rollout/backups
"#,
        config.project.name,
        config.project.version.as_deref().unwrap_or("0.1.0"),
        steps,
        deployment.test_command.as_deref().unwrap_or_default(),
        deployment.deploy_command.as_deref().unwrap_or_default(),
        deployment.release_command.as_deref().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips_through_parser() {
        let yaml = generate_template_yaml(&Config::template());
        let config = Config::from_yaml(&yaml).unwrap();

        assert_eq!(config.project.name, "my-app");
        assert_eq!(config.deployment.steps, vec![1, 3, 4, 5]);
        assert!(config.rollback_on_failure);
    }
}
