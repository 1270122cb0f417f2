//! The on-disk store of installed versions and the "current" pointer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::info;
use walkdir::WalkDir;

use crate::consts;
use crate::errors::StoreError;
use crate::helpers::filesystem;
use crate::version::{Version, VersionType, classify};

/// Capability set over installed versions, consumed by the service layer.
///
/// Mutating operations assume the caller holds the per-version lock.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Version>, StoreError>;

    /// The version `current` resolves to.
    async fn current(&self) -> Result<Version, StoreError>;

    /// Whether the version directory exists. The installer separately
    /// requires `version.txt` before treating an install as sealed.
    async fn is_installed(&self, name: &str) -> Result<bool, StoreError>;

    /// Repoints `current` at the version and relinks the global binary.
    async fn switch(&self, version: &Version) -> Result<(), StoreError>;

    /// Removes an installed version. Refuses the active one unless `force`.
    async fn uninstall(&self, name: &str, force: bool) -> Result<(), StoreError>;

    /// The trimmed content of the version's `version.txt`.
    async fn installed_identifier(&self, name: &str) -> Result<String, StoreError>;
}

/// The real store over `<versions_dir>` and `<bin_dir>`.
pub struct FsVersionStore {
    versions_dir: PathBuf,
    bin_dir: PathBuf,
}

impl FsVersionStore {
    pub fn new(versions_dir: impl Into<PathBuf>, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            versions_dir: versions_dir.into(),
            bin_dir: bin_dir.into(),
        }
    }

    fn version_dir(&self, name: &str) -> PathBuf {
        self.versions_dir.join(name)
    }

    fn current_link(&self) -> PathBuf {
        self.versions_dir.join("current")
    }

    fn global_link(&self) -> PathBuf {
        let binary = if cfg!(windows) { "nvim.exe" } else { "nvim" };
        self.bin_dir.join(binary)
    }

    async fn read_version(&self, name: &str) -> Version {
        let kind = classify(name);
        let identifier = fs::read_to_string(self.version_dir(name).join(consts::VERSION_FILE_NAME))
            .await
            .map(|contents| contents.trim().to_string())
            .unwrap_or_default();
        let commit_hash = match kind {
            VersionType::Nightly | VersionType::Commit => identifier.clone(),
            VersionType::Stable | VersionType::Tag => String::new(),
        };

        Version {
            name: name.to_string(),
            kind,
            identifier,
            commit_hash,
        }
    }

    /// Resolves the name `current` points at, if any.
    async fn current_name(&self) -> Result<Option<String>, StoreError> {
        let link = self.current_link();
        let metadata = match fs::symlink_metadata(&link).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let target = if metadata.file_type().is_symlink() {
            fs::read_link(&link).await?
        } else if metadata.is_dir() {
            // Windows junctions lstat as plain directories.
            fs::canonicalize(&link).await?
        } else {
            return Ok(None);
        };

        Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()))
    }
}

#[async_trait]
impl VersionStore for FsVersionStore {
    async fn list(&self) -> Result<Vec<Version>, StoreError> {
        let mut entries = match fs::read_dir(&self.versions_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "current" || name.starts_with('.') || name.ends_with(consts::BACKUP_SUFFIX)
            {
                continue;
            }
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut versions = Vec::with_capacity(names.len());
        for name in names {
            versions.push(self.read_version(&name).await);
        }
        Ok(versions)
    }

    async fn current(&self) -> Result<Version, StoreError> {
        match self.current_name().await? {
            Some(name) => Ok(self.read_version(&name).await),
            None => Err(StoreError::NoCurrentVersion),
        }
    }

    async fn is_installed(&self, name: &str) -> Result<bool, StoreError> {
        Ok(fs::metadata(self.version_dir(name)).await.is_ok())
    }

    async fn switch(&self, version: &Version) -> Result<(), StoreError> {
        let target_dir = self.version_dir(&version.name);
        if fs::metadata(&target_dir).await.is_err() {
            return Err(StoreError::VersionNotFound(version.name.clone()));
        }

        filesystem::replace_dir_link(&target_dir, &self.current_link()).await?;

        let binary = find_nvim_binary(&target_dir)
            .ok_or_else(|| StoreError::BinaryNotFound(target_dir.clone()))?;
        filesystem::replace_file_link(&binary, &self.global_link()).await?;

        info!("switched current version to {}", version.name);
        Ok(())
    }

    async fn uninstall(&self, name: &str, force: bool) -> Result<(), StoreError> {
        let dir = self.version_dir(name);
        if fs::metadata(&dir).await.is_err() {
            return Err(StoreError::VersionNotFound(name.to_string()));
        }

        let is_current = self.current_name().await?.as_deref() == Some(name);
        if is_current && !force {
            return Err(StoreError::VersionInUse(name.to_string()));
        }

        fs::remove_dir_all(&dir).await?;

        if is_current {
            filesystem::remove_link(&self.current_link()).await?;
            filesystem::remove_link(&self.global_link()).await?;
        }

        info!("uninstalled {name}");
        Ok(())
    }

    async fn installed_identifier(&self, name: &str) -> Result<String, StoreError> {
        let path = self.version_dir(name).join(consts::VERSION_FILE_NAME);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::VersionNotFound(name.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Depth-first search for the Neovim binary inside a version directory:
/// an executable named `nvim` or `nvim-*` on Unix, `nvim.exe` or
/// `nvim-*.exe` on Windows (release zips nest it as `nvim-win64/bin/...`).
pub fn find_nvim_binary(dir: &Path) -> Option<PathBuf> {
    for entry in WalkDir::new(dir).into_iter().flatten() {
        let name = entry.file_name().to_string_lossy();

        let name_matches = if cfg!(windows) {
            name == "nvim.exe" || (name.starts_with("nvim-") && name.ends_with(".exe"))
        } else {
            name == "nvim" || name.starts_with("nvim-")
        };
        if !name_matches {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if filesystem::is_executable(&metadata) {
            return Some(entry.into_path());
        }
    }
    None
}
