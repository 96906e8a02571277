//! CLI configuration loading.

use anyhow::Context;
use cogflow_core::EngineConfig;
use std::path::Path;

/// Load the engine configuration.
///
/// Precedence, highest first:
/// 1. `--config <path>`
/// 2. Environment variables (`COGFLOW_*`)
/// 3. Local config file (./.cogflowrc)
/// 4. Global config file (~/.cogflow/config.toml)
/// 5. Defaults
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::discover_and_load().context("Failed to load configuration")?;

    if let Some(path) = explicit {
        let file = EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.merge(&file);
    }

    Ok(config)
}
