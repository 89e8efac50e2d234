// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles per-step timeout maps written as humantime strings.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub fn deserialize_timeouts<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: HashMap<String, humantime_serde::Serde<Duration>> =
        HashMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, timeout)| (name, timeout.into_inner()))
        .collect())
}
