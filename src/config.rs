use regex::Regex;
use reqwest::Url;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio::fs;

use crate::consts;
use crate::errors::ConfigError;

/// Represents the application configuration.
///
/// All fields are optional in the file; resolution of the directory fields
/// into concrete paths (including defaults under the local data dir) happens
/// in [`crate::helpers::directories`].
///
/// # Fields
///
/// * `versions_dir: Option<String>` - Root directory holding one subdirectory per installed version.
/// * `cache_dir: Option<String>` - Directory holding the `releases.json` metadata cache.
/// * `global_bin_dir: Option<String>` - Directory receiving the global `nvim` link.
/// * `min_version: Option<String>` - Oldest release tag offered, as a semver string.
/// * `mirror_url: Option<String>` - Optional download mirror, validated against an allow-list.
/// * `cache_ttl_secs: Option<u64>` - Seconds the release cache stays fresh.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Config {
    pub versions_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub global_bin_dir: Option<String>,
    pub min_version: Option<String>,
    pub mirror_url: Option<String>,
    pub cache_ttl_secs: Option<u64>,
}

impl Config {
    /// How long the on-disk release cache is considered fresh.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(consts::DEFAULT_CACHE_TTL)
    }

    /// Parses the configured minimum version, defaulting to
    /// [`consts::DEFAULT_MIN_VERSION`].
    pub fn min_version(&self) -> Result<Version, ConfigError> {
        let raw = self
            .min_version
            .as_deref()
            .unwrap_or(consts::DEFAULT_MIN_VERSION);
        Version::parse(raw.trim_start_matches('v'))
            .map_err(|_| ConfigError::InvalidMinVersion(raw.to_string()))
    }

    /// Validates and returns the configured mirror, if any.
    ///
    /// The mirror must be a bare https origin whose host appears on
    /// [`consts::MIRROR_HOST_ALLOWLIST`]; anything else fails closed.
    pub fn mirror(&self) -> Result<Option<Url>, ConfigError> {
        let raw = match self.mirror_url.as_deref() {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(None),
        };

        let url = Url::parse(raw).map_err(|_| ConfigError::InvalidMirror(raw.to_string()))?;

        let bare = url.scheme() == "https"
            && url.username().is_empty()
            && url.password().is_none()
            && url.query().is_none()
            && url.fragment().is_none()
            && matches!(url.path(), "" | "/");
        if !bare {
            return Err(ConfigError::MirrorNotBareOrigin(raw.to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidMirror(raw.to_string()))?;
        if !consts::MIRROR_HOST_ALLOWLIST.contains(&host) {
            return Err(ConfigError::MirrorNotAllowed(host.to_string()));
        }

        Ok(Some(url))
    }

    /// Checks every configured value once, up front, so operations never run
    /// against a half-usable configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.versions_dir.as_deref(), Some("")) {
            return Err(ConfigError::VersionsDirEmpty);
        }
        if matches!(self.cache_dir.as_deref(), Some("")) {
            return Err(ConfigError::CacheDirEmpty);
        }
        if matches!(self.global_bin_dir.as_deref(), Some("")) {
            return Err(ConfigError::BinDirEmpty);
        }
        self.min_version()?;
        self.mirror()?;
        Ok(())
    }
}

/// Reads the configuration file, which can be in either TOML or JSON format.
///
/// A missing file yields the all-defaults configuration; an unreadable or
/// unparseable file is an error, as is any value that fails
/// [`Config::validate`].
pub async fn handle_config() -> Result<Config, ConfigError> {
    let config_file = crate::helpers::directories::get_config_file()?;
    let config = match fs::read_to_string(&config_file).await {
        Ok(contents) => {
            let mut config: Config = if config_file.extension().is_some_and(|ext| ext == "toml") {
                toml::from_str(&contents).map_err(|e| ConfigError::Unparseable(e.to_string()))?
            } else {
                serde_json::from_str(&contents)
                    .map_err(|e| ConfigError::Unparseable(e.to_string()))?
            };
            handle_envars(&mut config);
            config
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(error) => return Err(ConfigError::Unreadable(error)),
    };

    config.validate()?;
    Ok(config)
}

/// Expands `$VAR_NAME` references in every path-bearing field.
fn handle_envars(config: &mut Config) {
    let re = &consts::ENVIRONMENT_VAR_REGEX;

    handle_envar(&mut config.versions_dir, re);
    handle_envar(&mut config.cache_dir, re);
    handle_envar(&mut config.global_bin_dir, re);
    handle_envar(&mut config.mirror_url, re);
}

fn handle_envar(item: &mut Option<String>, re: &Regex) {
    let Some(value) = item.as_ref() else {
        return;
    };

    if re.is_match(value) {
        let extract = re.captures(value).unwrap().get(1).unwrap().as_str();
        if let Ok(var) = env::var(extract) {
            *item = Some(value.replace(&format!("${extract}"), &var));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_versions_dir_is_rejected() {
        let config = Config {
            versions_dir: Some(String::new()),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::VersionsDirEmpty)
        ));
    }

    #[test]
    fn default_min_version_parses() {
        let config = Config::default();
        assert_eq!(config.min_version().unwrap(), Version::new(0, 5, 0));
    }

    #[test]
    fn min_version_accepts_leading_v() {
        let config = Config {
            min_version: Some("v0.9.0".into()),
            ..Config::default()
        };
        assert_eq!(config.min_version().unwrap(), Version::new(0, 9, 0));
    }

    #[test]
    fn mirror_must_be_on_allowlist() {
        let config = Config {
            mirror_url: Some("https://evil.example.com".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.mirror(),
            Err(ConfigError::MirrorNotAllowed(_))
        ));
    }

    #[test]
    fn mirror_with_path_fails_closed() {
        let config = Config {
            mirror_url: Some("https://ghproxy.com/extra".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.mirror(),
            Err(ConfigError::MirrorNotBareOrigin(_))
        ));
    }

    #[test]
    fn http_mirror_fails_closed() {
        let config = Config {
            mirror_url: Some("http://ghproxy.com".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.mirror(),
            Err(ConfigError::MirrorNotBareOrigin(_))
        ));
    }

    #[test]
    fn allowlisted_mirror_is_accepted() {
        let config = Config {
            mirror_url: Some("https://ghproxy.com".into()),
            ..Config::default()
        };
        let url = config.mirror().unwrap().unwrap();
        assert_eq!(url.host_str(), Some("ghproxy.com"));
    }

    #[test]
    fn envar_expansion_substitutes_value() {
        // SAFETY: tests in this module run on the test harness threads; the
        // variable is unique to this test.
        unsafe { env::set_var("NVS_TEST_ENVAR", "/tmp/versions") };
        let mut item = Some("$NVS_TEST_ENVAR/sub".to_string());
        handle_envar(&mut item, &consts::ENVIRONMENT_VAR_REGEX);
        assert_eq!(item.as_deref(), Some("/tmp/versions/sub"));
    }
}
