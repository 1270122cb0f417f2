//! The install pipeline: download, verify, extract, commit.
//!
//! Every mutation of a version directory happens under that version's
//! advisory lock. The `version.txt` write is the last step and seals the
//! install; its presence is the only thing the fast path trusts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;
use tokio::fs;
use tracing::{debug, info};

use crate::builder::SourceBuilder;
use crate::consts;
use crate::downloader::Downloader;
use crate::errors::{Error, ReleaseError};
use crate::helpers::lock::with_lock;
use crate::progress::{Progress, ProgressFn, emit};
use crate::releases::{self, Release};
use crate::unarchive;
use crate::version::Version;

/// Outcome of an install request. Hitting the fast path is not an error,
/// just a different success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(Version),
    AlreadyInstalled(String),
}

pub struct Installer {
    downloader: Arc<dyn Downloader>,
    builder: Arc<dyn SourceBuilder>,
    mirror: Option<Url>,
}

impl Installer {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        builder: Arc<dyn SourceBuilder>,
        mirror: Option<Url>,
    ) -> Self {
        Self {
            downloader,
            builder,
            mirror,
        }
    }

    /// Installs a release archive as `<versions_dir>/<install_name>/`.
    ///
    /// The fast path returns without taking the lock when `version.txt`
    /// already exists; the check is repeated under the lock because another
    /// process may have finished the same install while we waited.
    pub async fn install_release(
        &self,
        release: &Release,
        versions_dir: &Path,
        install_name: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<InstallOutcome, Error> {
        let install_dir = versions_dir.join(install_name);
        if is_sealed(&install_dir).await {
            return Ok(InstallOutcome::AlreadyInstalled(install_name.to_string()));
        }

        let lock_path = lock_path(versions_dir, install_name);
        with_lock(lock_path, consts::INSTALL_LOCK_TIMEOUT, || async move {
            self.install_release_locked(release, versions_dir, install_name, progress)
                .await
        })
        .await
    }

    /// The install pipeline body. The caller must already hold
    /// `.nvs-version-<install_name>.lock`: [`Installer::install_release`]
    /// wraps this with the lock, and the service's upgrade holds it across
    /// its whole rename-install-rollback sequence instead.
    pub(crate) async fn install_release_locked(
        &self,
        release: &Release,
        versions_dir: &Path,
        install_name: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<InstallOutcome, Error> {
        let install_dir = versions_dir.join(install_name);
        if is_sealed(&install_dir).await {
            return Ok(InstallOutcome::AlreadyInstalled(install_name.to_string()));
        }

        let identifier = release.identifier().to_string();
        self.fetch_and_extract(release, versions_dir, &install_dir, install_name, progress)
            .await?;

        fs::write(
            install_dir.join(consts::VERSION_FILE_NAME),
            format!("{identifier}\n"),
        )
        .await?;

        emit(progress, Progress::Percent(100));
        emit(progress, Progress::Message("Complete".to_string()));
        info!("installed {install_name} ({identifier})");

        Ok(InstallOutcome::Installed(Version {
            name: install_name.to_string(),
            kind: crate::version::classify(install_name),
            identifier,
            commit_hash: release.commit_hash().to_string(),
        }))
    }

    /// Builds `reference` from source under the resolved per-version lock.
    pub async fn build_from_commit(
        &self,
        reference: &str,
        versions_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<InstallOutcome, Error> {
        let lock_name = resolve_lock_name(versions_dir, reference).await;

        if is_sealed(&versions_dir.join(&lock_name)).await {
            return Ok(InstallOutcome::AlreadyInstalled(lock_name));
        }

        let lock_path = lock_path(versions_dir, &lock_name);
        let sealed_dir = versions_dir.join(&lock_name);
        let sealed_dir = &sealed_dir;
        let version = with_lock(lock_path, consts::BUILD_LOCK_TIMEOUT, || async move {
            if is_sealed(sealed_dir).await {
                return Ok(None);
            }
            self.builder
                .build(reference, versions_dir, progress)
                .await
                .map(Some)
                .map_err(Error::from)
        })
        .await?;

        Ok(match version {
            Some(version) => InstallOutcome::Installed(version),
            None => InstallOutcome::AlreadyInstalled(lock_name),
        })
    }

    async fn fetch_and_extract(
        &self,
        release: &Release,
        versions_dir: &Path,
        install_dir: &Path,
        install_name: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<(), Error> {
        let selection =
            releases::select_asset(release, std::env::consts::OS, std::env::consts::ARCH)?;
        let url = self.reroute(&selection.url);
        let archive_path =
            versions_dir.join(format!(".{install_name}.{}", archive_extension(&selection)));

        let checksum = match releases::select_checksum_url(release, &selection) {
            Ok(checksum_url) => Some(self.reroute(&checksum_url)),
            Err(ReleaseError::ChecksumNotFound(tag)) => {
                debug!("release {tag} has no checksum asset, skipping verification");
                None
            }
            Err(error) => return Err(error.into()),
        };

        let downloaded = match &checksum {
            Some(checksum_url) => {
                self.downloader
                    .download_with_checksum_verification(
                        &url,
                        checksum_url,
                        &selection.name,
                        &archive_path,
                        progress,
                    )
                    .await
            }
            None => self.downloader.download(&url, &archive_path, progress).await,
        };
        if let Err(error) = downloaded {
            let _ = fs::remove_file(&archive_path).await;
            return Err(error.into());
        }

        fs::create_dir_all(install_dir).await?;

        let archive = match std::fs::File::open(&archive_path) {
            Ok(archive) => archive,
            Err(error) => {
                let _ = fs::remove_file(&archive_path).await;
                let _ = fs::remove_dir_all(install_dir).await;
                return Err(error.into());
            }
        };
        let extracted = unarchive::extract(archive, install_dir.to_path_buf()).await;
        let _ = fs::remove_file(&archive_path).await;
        if let Err(error) = extracted {
            // The caller never sees a half-extracted tree.
            let _ = fs::remove_dir_all(install_dir).await;
            return Err(error.into());
        }

        Ok(())
    }

    fn reroute(&self, url: &str) -> String {
        match &self.mirror {
            Some(mirror) => releases::rewrite_through_mirror(url, mirror),
            None => url.to_string(),
        }
    }
}

/// A sealed install: the directory exists and carries `version.txt`.
async fn is_sealed(install_dir: &Path) -> bool {
    fs::metadata(install_dir.join(consts::VERSION_FILE_NAME))
        .await
        .is_ok()
}

pub(crate) fn lock_path(versions_dir: &Path, name: &str) -> PathBuf {
    versions_dir.join(format!("{}{name}.lock", consts::VERSION_LOCK_PREFIX))
}

/// Resolves the lock key for a commit build.
///
/// Installed versions are scanned for a `version.txt` sharing a prefix with
/// the requested reference; when one matches, its directory name becomes the
/// lock key so that Switch and Uninstall of the same commit contend on the
/// same lock. Otherwise the raw reference is the key.
pub(crate) async fn resolve_lock_name(versions_dir: &Path, reference: &str) -> String {
    let Ok(mut entries) = fs::read_dir(versions_dir).await else {
        return reference.to_string();
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "current" || name.starts_with('.') {
            continue;
        }
        let Ok(contents) =
            fs::read_to_string(entry.path().join(consts::VERSION_FILE_NAME)).await
        else {
            continue;
        };
        let hash = contents.trim();
        if hash.is_empty() {
            continue;
        }
        if hash.starts_with(reference) || reference.starts_with(hash) {
            return name;
        }
    }

    reference.to_string()
}

fn archive_extension(selection: &releases::AssetSelection) -> &'static str {
    if selection.pattern.ends_with(".zip") {
        "zip"
    } else {
        "tar.gz"
    }
}
