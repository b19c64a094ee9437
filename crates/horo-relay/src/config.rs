use anyhow::{Context, Result};
use std::path::PathBuf;

use horo_types::config::HoroConfig;

/// Returns the app home directory (~/.horoscope/)
pub fn horo_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".horoscope"))
        .context("Could not determine home directory")
}

/// Returns the path to the config file (~/.horoscope/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(horo_home()?.join("config.toml"))
}

/// Returns the key-value database path (~/.horoscope/horoscope.db)
pub fn db_path() -> Result<PathBuf> {
    Ok(horo_home()?.join("horoscope.db"))
}

/// Load config from disk, creating default if it doesn't exist.
pub fn load_config() -> Result<HoroConfig> {
    let path = config_path()?;

    if !path.exists() {
        let home = horo_home()?;
        std::fs::create_dir_all(&home)
            .with_context(|| format!("Failed to create {}", home.display()))?;

        let default = HoroConfig::default();
        let toml_str = toml::to_string_pretty(&default)
            .context("Failed to serialize default config")?;
        std::fs::write(&path, &toml_str)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;

        return Ok(default);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse config at {}", path.display()))
}

/// Save config to disk, overwriting the existing file.
pub fn save_config(config: &HoroConfig) -> Result<()> {
    let path = config_path()?;
    let toml_str = toml::to_string_pretty(config)
        .context("Failed to serialize config")?;
    std::fs::write(&path, toml_str)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}

fn parse_config(contents: &str) -> Result<HoroConfig> {
    Ok(toml::from_str(contents)?)
}
