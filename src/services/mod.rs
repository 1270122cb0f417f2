//! The top-level operations the CLI consumes: install, use, upgrade,
//! uninstall, list, list-remote.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{error, info};

use crate::config::Config;
use crate::consts;
use crate::downloader::HttpDownloader;
use crate::errors::{Error, StoreError};
use crate::github_requests::create_reqwest_client;
use crate::helpers::directories;
use crate::helpers::lock::with_lock;
use crate::installer::{Installer, lock_path};
use crate::progress::ProgressFn;
use crate::releases::{GithubReleaseRepository, Release, ReleaseCache, ReleaseRepository};
use crate::store::{FsVersionStore, VersionStore};
use crate::version::{Version, VersionType, classify, normalize_alias};
use crate::builder::GitSourceBuilder;

pub use crate::installer::InstallOutcome;

/// Outcome of an upgrade request. Being up to date already is informational,
/// not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Upgraded { from: String, to: String },
    AlreadyUpToDate(String),
}

pub struct VersionService {
    versions_dir: PathBuf,
    repository: Arc<dyn ReleaseRepository>,
    store: Arc<dyn VersionStore>,
    installer: Installer,
}

impl VersionService {
    /// Wires up the production service from the configuration: shared HTTP
    /// client, GitHub repository behind the disk cache, filesystem store,
    /// git builder.
    pub async fn from_config(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let versions_dir = directories::get_versions_dir(config).await?;
        let cache_dir = directories::get_cache_dir(config).await?;
        let bin_dir = directories::get_global_bin_dir(config).await?;

        let client = create_reqwest_client().map_err(crate::errors::ReleaseError::from)?;
        let repository = Arc::new(GithubReleaseRepository::new(
            client.clone(),
            ReleaseCache::new(cache_dir, config.cache_ttl()),
            config.min_version()?,
        ));
        let store = Arc::new(FsVersionStore::new(versions_dir.clone(), bin_dir));
        let installer = Installer::new(
            Arc::new(HttpDownloader::new(client)),
            Arc::new(GitSourceBuilder::default()),
            config.mirror()?,
        );

        Ok(Self {
            versions_dir,
            repository,
            store,
            installer,
        })
    }

    /// Assembles a service from explicit parts; the seam the scenario tests
    /// use to swap in in-memory fakes.
    pub fn with_components(
        versions_dir: PathBuf,
        repository: Arc<dyn ReleaseRepository>,
        store: Arc<dyn VersionStore>,
        installer: Installer,
    ) -> Self {
        Self {
            versions_dir,
            repository,
            store,
            installer,
        }
    }

    /// Installs the version addressed by `alias`.
    ///
    /// Commit references build from source; everything else resolves to an
    /// upstream release and installs its platform asset under the alias name
    /// (so `stable`, `nightly` and `v0.10.3` become stable directory names).
    pub async fn install(
        &self,
        alias: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<InstallOutcome, Error> {
        let alias = normalize_alias(alias)?;

        if classify(&alias) == VersionType::Commit {
            return self
                .installer
                .build_from_commit(&alias, &self.versions_dir, progress)
                .await;
        }

        // The fast path must not touch the network.
        if fs::metadata(
            self.versions_dir
                .join(&alias)
                .join(consts::VERSION_FILE_NAME),
        )
        .await
        .is_ok()
        {
            return Ok(InstallOutcome::AlreadyInstalled(alias));
        }

        let release = self.resolve_release(&alias).await?;
        self.installer
            .install_release(&release, &self.versions_dir, &alias, progress)
            .await
    }

    /// Switches the active version, installing nothing. Returns the resolved
    /// identifier.
    pub async fn use_version(&self, alias: &str) -> Result<String, Error> {
        let alias = normalize_alias(alias)?;
        let kind = classify(&alias);

        let target = if kind == VersionType::Commit {
            Version {
                name: alias.clone(),
                kind,
                identifier: alias.clone(),
                commit_hash: alias.clone(),
            }
        } else {
            let release = self.resolve_release(&alias).await?;
            Version {
                name: alias.clone(),
                kind,
                identifier: release.tag_name.clone(),
                commit_hash: release.commit_hash().to_string(),
            }
        };

        if !self.store.is_installed(&target.name).await? {
            return Err(StoreError::VersionNotFound(target.name).into());
        }

        if let Ok(current) = self.store.current().await {
            if current.name == target.name {
                info!("{} is already in use", target.name);
                return Ok(target.identifier);
            }
        }

        let store = Arc::clone(&self.store);
        let switched_target = target.clone();
        with_lock(
            lock_path(&self.versions_dir, &target.name),
            consts::DEFAULT_LOCK_TIMEOUT,
            || async move {
                store
                    .switch(&switched_target)
                    .await
                    .map_err(Error::from)
            },
        )
        .await?;

        Ok(target.identifier)
    }

    /// Upgrades an installed `stable` or `nightly` channel in place.
    ///
    /// The per-version lock is held from the identifier comparison through
    /// the `.backup` rename, the install itself and any rollback, so a
    /// concurrent Install/Switch/Uninstall never observes the renamed-away
    /// tree. On any failure the backup is restored; on success it is
    /// dropped.
    pub async fn upgrade(
        &self,
        alias: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<UpgradeOutcome, Error> {
        let alias = normalize_alias(alias)?;
        let kind = classify(&alias);
        if !matches!(kind, VersionType::Stable | VersionType::Nightly) {
            return Err(Error::OnlyStableNightlyUpgrade(alias));
        }

        if !self.store.is_installed(&alias).await? {
            return Err(Error::NotInstalled(alias));
        }

        let release = self.resolve_release(&alias).await?;
        let upstream_identifier = match kind {
            VersionType::Stable => release.tag_name.clone(),
            _ => release.commit_hash().to_string(),
        };

        let install_dir = self.versions_dir.join(&alias);
        let backup_dir = self
            .versions_dir
            .join(format!("{alias}{}", consts::BACKUP_SUFFIX));
        let lock = lock_path(&self.versions_dir, &alias);

        let store = Arc::clone(&self.store);
        let release = &release;
        let install_dir = &install_dir;
        let backup_dir = &backup_dir;
        let alias = alias.as_str();

        with_lock(lock, consts::INSTALL_LOCK_TIMEOUT, || async move {
            let installed_identifier = store.installed_identifier(alias).await?;
            if installed_identifier == upstream_identifier {
                return Ok(UpgradeOutcome::AlreadyUpToDate(installed_identifier));
            }

            fs::rename(install_dir, backup_dir).await?;

            let result = self
                .installer
                .install_release_locked(release, &self.versions_dir, alias, progress)
                .await;

            match result {
                Ok(_) => {
                    if let Err(cleanup) = fs::remove_dir_all(backup_dir).await {
                        error!(
                            "failed to remove backup {}: {cleanup}",
                            backup_dir.display()
                        );
                    }
                    info!("upgraded {alias}: {installed_identifier} -> {upstream_identifier}");
                    Ok(UpgradeOutcome::Upgraded {
                        from: installed_identifier,
                        to: upstream_identifier,
                    })
                }
                Err(failure) => {
                    // Best-effort rollback; the install failure stays the
                    // error the caller sees.
                    if fs::metadata(install_dir).await.is_ok() {
                        if let Err(cleanup) = fs::remove_dir_all(install_dir).await {
                            error!(
                                "failed to remove partial install {}: {cleanup}",
                                install_dir.display()
                            );
                        }
                    }
                    if let Err(rollback) = fs::rename(backup_dir, install_dir).await {
                        error!(
                            "failed to restore backup {}: {rollback}",
                            backup_dir.display()
                        );
                    }
                    Err(failure)
                }
            }
        })
        .await
    }

    /// Uninstalls a version by alias.
    pub async fn uninstall(&self, alias: &str, force: bool) -> Result<(), Error> {
        let alias = normalize_alias(alias)?;

        let versions = self.store.list().await?;
        if !versions.iter().any(|version| version.name == alias) {
            return Err(StoreError::VersionNotFound(alias).into());
        }

        let store = Arc::clone(&self.store);
        let name = alias.clone();
        with_lock(
            lock_path(&self.versions_dir, &alias),
            consts::DEFAULT_LOCK_TIMEOUT,
            || async move { store.uninstall(&name, force).await.map_err(Error::from) },
        )
        .await?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Version>, Error> {
        Ok(self.store.list().await?)
    }

    pub async fn list_remote(&self, force: bool) -> Result<Vec<Release>, Error> {
        Ok(self.repository.get_all(force).await?)
    }

    pub async fn current(&self) -> Result<Version, Error> {
        Ok(self.store.current().await?)
    }

    async fn resolve_release(&self, alias: &str) -> Result<Release, Error> {
        let release = match classify(alias) {
            VersionType::Stable => self.repository.find_stable().await?,
            VersionType::Nightly => self.repository.find_nightly().await?,
            _ => self.repository.find_by_tag(alias).await?,
        };
        Ok(release)
    }
}
