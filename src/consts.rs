use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Commit reference regex: a bare hex string of 7 to 40 characters.
///
/// # Example
///
/// ```rust
/// assert!(nvs::consts::COMMIT_HASH_REGEX.is_match("abc1234"));
/// assert!(!nvs::consts::COMMIT_HASH_REGEX.is_match("abc1"));
/// ```
pub static COMMIT_HASH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{7,40}$").expect("Failed to compile static COMMIT_HASH_REGEX")
});

/// Environment variable regex to match references in the format `$VAR_NAME`.
/// Used to substitute user configuration values with their actual values
/// from the host environment.
pub static ENVIRONMENT_VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Z_]+)").expect("Failed to compile static ENVIRONMENT_VAR_REGEX")
});

pub const USER_AGENT: &str = "nvs";

pub const GITHUB_API_RELEASES_URL: &str = "https://api.github.com/repos/neovim/neovim/releases";
pub const NEOVIM_REPO_URL: &str = "https://github.com/neovim/neovim.git";

/// Host whose asset download URLs may be rewritten through a configured mirror.
pub const UPSTREAM_DOWNLOAD_HOST: &str = "github.com";

/// Hosts a configured mirror is allowed to use. Anything else fails closed at
/// config validation time.
pub const MIRROR_HOST_ALLOWLIST: &[&str] = &[
    "ghproxy.com",
    "mirror.ghproxy.com",
    "ghfast.top",
    "gh-proxy.com",
    "kkgithub.com",
];

pub const RELEASES_PER_PAGE: usize = 100;
pub const CACHE_FILE_NAME: &str = "releases.json";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MIN_VERSION: &str = "0.5.0";

/// Marks a sealed install; its absence marks a partial one.
pub const VERSION_FILE_NAME: &str = "version.txt";
pub const VERSION_LOCK_PREFIX: &str = ".nvs-version-";
pub const BACKUP_SUFFIX: &str = ".backup";

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const INSTALL_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const BUILD_LOCK_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub const BUILD_WORKSPACE_PREFIX: &str = "neovim-src-";
pub const BUILD_ATTEMPTS: usize = 3;
pub const BUILD_RETRY_PAUSE: Duration = Duration::from_secs(1);
pub const STALE_WORKSPACE_AGE: Duration = Duration::from_secs(5 * 60);
pub const TOOL_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub const SUBPROCESS_TICK: Duration = Duration::from_secs(10);

/// Tools the source builder probes for before every attempt.
pub const BUILD_TOOLS: &[&str] = &["git", "make", "cmake", "gettext", "ninja", "curl"];
