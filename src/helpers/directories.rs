use std::path::PathBuf;

use crate::config::Config;
use crate::errors::ConfigError;

/// Returns the path of the configuration file.
///
/// `$NVS_CONFIG` wins when set. Otherwise `nvs/config.toml` under the
/// platform config directory is used, falling back to `config.json` when no
/// TOML file exists.
pub fn get_config_file() -> Result<PathBuf, ConfigError> {
    if let Ok(value) = std::env::var("NVS_CONFIG") {
        return Ok(PathBuf::from(value));
    }

    let mut path = dirs::config_dir().ok_or(ConfigError::NoHomeDir)?;
    path.push("nvs");
    path.push("config.toml");

    if std::fs::metadata(&path).is_err() {
        path.pop();
        path.push("config.json");
    }

    Ok(path)
}

/// Returns the directory holding one subdirectory per installed version,
/// creating it on first use.
pub async fn get_versions_dir(config: &Config) -> Result<PathBuf, ConfigError> {
    resolve_dir(config.versions_dir.as_deref(), "versions", || {
        ConfigError::VersionsDirEmpty
    })
    .await
}

/// Returns the directory holding the release metadata cache, creating it on
/// first use.
pub async fn get_cache_dir(config: &Config) -> Result<PathBuf, ConfigError> {
    resolve_dir(config.cache_dir.as_deref(), "cache", || {
        ConfigError::CacheDirEmpty
    })
    .await
}

/// Returns the directory receiving the global `nvim` link, creating it on
/// first use.
pub async fn get_global_bin_dir(config: &Config) -> Result<PathBuf, ConfigError> {
    resolve_dir(config.global_bin_dir.as_deref(), "bin", || {
        ConfigError::BinDirEmpty
    })
    .await
}

/// Resolves a configured directory, defaulting to a leaf under `nvs/` in
/// the platform's local data directory when unset.
async fn resolve_dir(
    configured: Option<&str>,
    default_leaf: &str,
    empty: impl FnOnce() -> ConfigError,
) -> Result<PathBuf, ConfigError> {
    let path = match configured {
        Some("") => return Err(empty()),
        Some(value) => PathBuf::from(value),
        None => dirs::data_local_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join("nvs")
            .join(default_leaf),
    };

    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|source| ConfigError::CreateDir {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}
