pub mod schema;

pub use schema::SelfToolConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default selftool home directory (~/.selftool).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".selftool"))
        .unwrap_or_else(|| PathBuf::from(".selftool"))
}

/// Load config from the given path, or return defaults.
///
/// Environment overrides are applied in both cases.
pub fn load_config(path: &Path) -> Result<SelfToolConfig> {
    let mut config = if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read selftool config file")?;
        toml::from_str::<SelfToolConfig>(&contents)
            .context("Failed to parse selftool config (TOML)")?
    } else {
        SelfToolConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &SelfToolConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}
