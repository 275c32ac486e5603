use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{sanitize_config, Config};

const CONFIG_DIR_NAME: &str = "filmflux";
const CONFIG_FILE_NAME: &str = "filmflux.toml";
const CACHE_FILE_NAME: &str = "posters.db";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

/// Resolves the poster cache location: explicit path, else the user data dir.
pub fn resolve_cache_path(config: &Config) -> PathBuf {
    let configured = config.data.cache_path.trim();
    if !configured.is_empty() {
        return PathBuf::from(configured);
    }
    dirs::data_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_FILE_NAME)
}

/// Writes a default config file when `path` does not exist yet.
pub fn ensure_config_file(path: &Path) -> Result<(), std::io::Error> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(
        "Config file not found. Creating default config. path={}",
        path.display()
    );
    let serialized = toml::to_string(&Config::default())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    std::fs::write(path, serialized)
}

pub fn load_config_file(path: &Path) -> Config {
    let config_content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            return sanitize_config(Config::default());
        }
    };

    match toml::from_str::<Config>(&config_content) {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            sanitize_config(Config::default())
        }
    }
}
