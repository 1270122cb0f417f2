//! Builds Neovim from source into the versions tree.
//!
//! Each build gets a private workspace under the system temp dir, named
//! `neovim-src-<pid>-<nanos>-<attempt>`, with a sibling
//! `neovim-src-<pid>-<nanos>.lock` file holding the owning PID so that
//! concurrent processes can tell live workspaces from abandoned ones.

pub mod subprocess;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use sysinfo::{Pid, System};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::consts;
use crate::errors::BuildError;
use crate::progress::ProgressFn;
use crate::version::{Version, VersionType};
use self::subprocess::{run_capture, run_with_progress};

/// Source-build capability consumed by the installer.
#[async_trait]
pub trait SourceBuilder: Send + Sync {
    /// Builds `reference` (`master`, `main` or a commit hash) and installs
    /// the result into `<versions_dir>/<short-hash>/`, returning the built
    /// version.
    async fn build(
        &self,
        reference: &str,
        versions_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<Version, BuildError>;
}

/// The production builder driving `git`, `make` and `cmake`.
pub struct GitSourceBuilder {
    repo_url: String,
    temp_root: PathBuf,
}

impl Default for GitSourceBuilder {
    fn default() -> Self {
        Self::new(consts::NEOVIM_REPO_URL, std::env::temp_dir())
    }
}

impl GitSourceBuilder {
    pub fn new(repo_url: impl Into<String>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            temp_root: temp_root.into(),
        }
    }

    /// One full clone-checkout-build-install cycle in a fresh workspace.
    async fn attempt(
        &self,
        workspace: &Path,
        reference: &str,
        versions_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<Version, BuildError> {
        fs::create_dir_all(workspace).await?;

        if fs::metadata(workspace.join(".git")).await.is_err() {
            let mut clone = Command::new("git");
            clone
                .arg("clone")
                .arg("--quiet")
                .arg(&self.repo_url)
                .arg(workspace);
            run_with_progress(clone, "clone", progress).await?;
        }

        // The fresh clone is authoritative; no pull even for master/main.
        let mut checkout = Command::new("git");
        checkout
            .arg("-C")
            .arg(workspace)
            .arg("checkout")
            .arg("--quiet")
            .arg(reference);
        run_with_progress(checkout, "checkout", progress).await?;

        let mut rev_parse = Command::new("git");
        rev_parse
            .arg("-C")
            .arg(workspace)
            .arg("rev-parse")
            .arg("--quiet")
            .arg("HEAD");
        let full_hash = run_capture(rev_parse, "rev-parse").await?;
        if full_hash.len() < 7 {
            return Err(BuildError::CommitHashTooShort(full_hash));
        }
        let short_hash: String = full_hash.chars().take(7).collect();

        let build_dir = workspace.join("build");
        if fs::metadata(&build_dir).await.is_ok() {
            fs::remove_dir_all(&build_dir).await?;
        }

        let mut make = Command::new("make");
        make.arg("CMAKE_BUILD_TYPE=Release").current_dir(workspace);
        run_with_progress(make, "build", progress).await?;

        let prefix = versions_dir.join(&short_hash);
        let mut install = Command::new("cmake");
        install
            .arg("--install")
            .arg(&build_dir)
            .arg(format!("--prefix={}", prefix.display()))
            .current_dir(workspace);
        run_with_progress(install, "install", progress).await?;

        let binary_name = if cfg!(windows) { "nvim.exe" } else { "nvim" };
        if fs::metadata(prefix.join("bin").join(binary_name))
            .await
            .is_err()
        {
            return Err(BuildError::BinaryNotFound(prefix));
        }

        fs::write(
            prefix.join(consts::VERSION_FILE_NAME),
            format!("{full_hash}\n"),
        )
        .await?;

        Ok(Version {
            name: short_hash,
            kind: VersionType::Commit,
            identifier: full_hash.clone(),
            commit_hash: full_hash,
        })
    }

    /// Removes abandoned `neovim-src-*` workspaces: older than five minutes
    /// and whose lock file is gone or names a dead process.
    async fn cleanup_stale_workspaces(&self) {
        let Ok(mut entries) = fs::read_dir(&self.temp_root).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(consts::BUILD_WORKSPACE_PREFIX) || name.ends_with(".lock") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            if !age.is_some_and(|age| age > consts::STALE_WORKSPACE_AGE) {
                continue;
            }

            let lock_path = match name.rsplit_once('-') {
                Some((base, _attempt)) => self.temp_root.join(format!("{base}.lock")),
                None => continue,
            };
            if workspace_owner_alive(&lock_path).await {
                continue;
            }

            debug!("removing stale build workspace {name}");
            let _ = fs::remove_dir_all(entry.path()).await;
            let _ = fs::remove_file(&lock_path).await;
        }
    }
}

#[async_trait]
impl SourceBuilder for GitSourceBuilder {
    async fn build(
        &self,
        reference: &str,
        versions_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<Version, BuildError> {
        self.cleanup_stale_workspaces().await;

        let pid = std::process::id();
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|epoch| epoch.as_nanos())
            .unwrap_or_default();
        let base = format!("{}{pid}-{nanos}", consts::BUILD_WORKSPACE_PREFIX);
        let lock_path = self.temp_root.join(format!("{base}.lock"));
        fs::create_dir_all(&self.temp_root).await?;
        fs::write(&lock_path, pid.to_string()).await?;

        for attempt in 1..=consts::BUILD_ATTEMPTS {
            // Missing tooling never gets better by retrying.
            if let Err(error) = probe_tools(consts::BUILD_TOOLS).await {
                let _ = fs::remove_file(&lock_path).await;
                return Err(error);
            }

            let workspace = self.temp_root.join(format!("{base}-{attempt}"));
            match self
                .attempt(&workspace, reference, versions_dir, progress)
                .await
            {
                Ok(version) => {
                    let _ = fs::remove_dir_all(&workspace).await;
                    let _ = fs::remove_file(&lock_path).await;
                    return Ok(version);
                }
                Err(error) => {
                    warn!("build attempt {attempt}/{} failed: {error}", consts::BUILD_ATTEMPTS);
                    let _ = fs::remove_dir_all(&workspace).await;

                    if attempt == consts::BUILD_ATTEMPTS {
                        let _ = fs::remove_file(&lock_path).await;
                        return Err(BuildError::Failed {
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }
                    tokio::time::sleep(consts::BUILD_RETRY_PAUSE).await;
                }
            }
        }

        unreachable!("the attempt loop either returns a version or an error");
    }
}

/// Checks that every tool resolves on PATH (`which` on Unix, `where` on
/// Windows), each probe bounded by [`consts::TOOL_PROBE_TIMEOUT`].
pub async fn probe_tools(tools: &[&str]) -> Result<(), BuildError> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let mut missing = Vec::new();

    for tool in tools {
        let mut probe = Command::new(finder);
        probe
            .arg(tool)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let available = match tokio::time::timeout(consts::TOOL_PROBE_TIMEOUT, probe.status()).await
        {
            Ok(Ok(status)) => status.success(),
            Ok(Err(_)) | Err(_) => false,
        };
        if !available {
            missing.push(*tool);
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BuildError::RequirementsNotMet(missing.join(", ")))
    }
}

/// Whether the PID stored in a workspace lock file is still running.
async fn workspace_owner_alive(lock_path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(lock_path).await else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return false;
    };
    is_process_alive(pid)
}

fn is_process_alive(pid: u32) -> bool {
    System::new_all().process(Pid::from_u32(pid)).is_some()
}
