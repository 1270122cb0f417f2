//! Error taxonomy for the whole crate.
//!
//! Each subsystem gets its own enum so callers can match on sentinels
//! (`matches!(err, LockError::Held)`) while lower layers still attach
//! context through `#[source]` chains. `anyhow` is only used at the binary
//! boundary in `main`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration problems surfaced before any operation runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("versions directory is configured but empty")]
    VersionsDirEmpty,

    #[error("cache directory is configured but empty")]
    CacheDirEmpty,

    #[error("global binary directory is configured but empty")]
    BinDirEmpty,

    #[error("minimum version {0:?} is not a valid semver string")]
    InvalidMinVersion(String),

    #[error("mirror url {0:?} could not be parsed")]
    InvalidMirror(String),

    #[error("mirror url {0:?} must be a bare https origin")]
    MirrorNotBareOrigin(String),

    #[error("mirror host {0:?} is not on the allow-list")]
    MirrorNotAllowed(String),

    #[error("could not determine the home directory")]
    NoHomeDir,

    #[error("couldn't create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file: {0}")]
    Unreadable(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Unparseable(String),
}

/// Archive extraction failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("archive is empty")]
    EmptyFile,

    #[error("unsupported archive format")]
    UnsupportedFormat,

    #[error("archive entry {0:?} escapes the destination directory")]
    IllegalPath(PathBuf),

    #[error("archive contains an entry of unknown type {0}")]
    UnknownEntryType(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Download and checksum verification failures.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned HTTP {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("checksum document is empty")]
    ChecksumFileEmpty,

    #[error("checksum document has no entry for {0}")]
    ChecksumEntryMissing(String),

    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Release metadata resolution failures.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("no stable release found upstream")]
    NoStableRelease,

    #[error("no nightly release found upstream")]
    NoNightlyRelease,

    #[error("release {0} not found")]
    ReleaseNotFound(String),

    #[error("GitHub API rate limit exceeded, set GITHUB_TOKEN or wait an hour")]
    RateLimitExceeded,

    #[error("GitHub API request failed with HTTP {0}")]
    ApiRequestFailed(reqwest::StatusCode),

    #[error("no release asset matches {os}/{arch}")]
    NoMatchingAsset { os: String, arch: String },

    #[error("release {0} carries no checksum asset")]
    ChecksumNotFound(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to decode release metadata: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-version advisory lock failures.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {elapsed:?} waiting for lock {path}")]
    Timeout { elapsed: Duration, path: PathBuf },

    #[error("lock is already held by this handle")]
    Held,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Source build failures.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build requirements not met, missing: {0}")]
    RequirementsNotMet(String),

    #[error("resolved commit hash {0:?} is shorter than 7 characters")]
    CommitHashTooShort(String),

    #[error("no nvim binary at {0} after install")]
    BinaryNotFound(PathBuf),

    #[error("{command} exited with status {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("could not start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build failed after {attempts} attempts")]
    Failed {
        attempts: usize,
        #[source]
        source: Box<BuildError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Version store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version {0} is not installed")]
    VersionNotFound(String),

    #[error("version {0} is currently in use")]
    VersionInUse(String),

    #[error("no version is currently in use")]
    NoCurrentVersion,

    #[error("no nvim binary found under {0}")]
    BinaryNotFound(PathBuf),

    #[error("creating link failed: {0}")]
    Link(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by [`crate::services::VersionService`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("only stable and nightly can be upgraded, got {0}")]
    OnlyStableNightlyUpgrade(String),

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error(
        "please provide a proper version string. Valid options are:\n\n\
         \u{2022} stable|nightly          - latest stable or nightly build\n\
         \u{2022} [v]x.x.x                - specific version (e.g. 0.10.3 or v0.10.3)\n\
         \u{2022} master|main|<hash>      - branch head or specific commit"
    )]
    InvalidVersionString(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
