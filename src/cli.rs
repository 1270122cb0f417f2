use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::Config;
use crate::progress::{Progress, ProgressFn};
use crate::services::{InstallOutcome, UpgradeOutcome, VersionService};
use crate::version::VersionType;

// The `Cli` enum represents the different commands that can be used in the command-line interface.
#[derive(Debug, Parser)]
#[command(name = "nvs", version)]
enum Cli {
    /// Switch to the specified version, it must be installed already
    Use {
        /// Version to switch to |nightly|stable|<version-string>|<commit-hash>|
        ///
        /// A version-string can either be `vx.x.x` or `x.x.x` examples: `v0.10.3` and `0.10.3`
        version: String,
    },

    /// Install the specified version
    Install {
        /// Version to be installed |nightly|stable|<version-string>|<commit-hash>|
        version: String,
    },

    /// Upgrade an installed channel |nightly|stable|--all|
    Update(Update),

    /// Uninstall the specified version
    #[clap(alias = "remove", visible_alias = "rm")]
    Uninstall {
        /// Version to be uninstalled
        version: String,

        /// Uninstall even if the version is currently in use
        #[arg(short, long)]
        force: bool,
    },

    /// List all installed versions
    #[clap(visible_alias = "ls")]
    List,

    /// List versions available upstream
    #[clap(visible_alias = "ls-remote")]
    ListRemote {
        /// Bypass the metadata cache
        #[arg(short, long)]
        force: bool,
    },
}

/// Represents an update command in the CLI.
#[derive(Args, Debug)]
pub struct Update {
    /// Update specified channel |nightly|stable|
    #[arg(conflicts_with = "all")]
    pub version: Option<String>,

    /// Apply the update to all installed channels
    #[arg(short, long)]
    pub all: bool,
}

/// Parses the CLI arguments and drives the service.
pub async fn start(config: Config) -> Result<()> {
    let cli = Cli::parse();
    let service = VersionService::from_config(&config).await?;

    match cli {
        Cli::Use { version } => {
            let identifier = service.use_version(&version).await?;
            info!("You can now use {identifier}!");
        }
        Cli::Install { version } => {
            let (callback, bar) = progress_bar(format!("Installing {version}"));
            let outcome = service.install(&version, Some(&callback)).await;
            bar.finish_and_clear();
            match outcome? {
                InstallOutcome::Installed(installed) => {
                    info!("{} has been successfully installed", installed.name);
                }
                InstallOutcome::AlreadyInstalled(name) => {
                    info!("{name} is already installed");
                }
            }
        }
        Cli::Update(data) => handle_update(&service, data).await?,
        Cli::Uninstall { version, force } => {
            service.uninstall(&version, force).await?;
            info!("Successfully uninstalled {version}");
        }
        Cli::List => {
            let current = service.current().await.ok().map(|version| version.name);
            for version in service.list().await? {
                let marker = if current.as_deref() == Some(version.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                if version.identifier.is_empty() || version.identifier == version.name {
                    println!("{marker} {}", version.name);
                } else {
                    println!("{marker} {} ({})", version.name, version.identifier);
                }
            }
        }
        Cli::ListRemote { force } => {
            let installed: HashSet<String> = service
                .list()
                .await?
                .into_iter()
                .map(|version| version.name)
                .collect();
            for release in service.list_remote(force).await? {
                let marker = if installed.contains(&release.tag_name) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}", release.tag_name);
            }
        }
    }

    Ok(())
}

async fn handle_update(service: &VersionService, data: Update) -> Result<()> {
    if data.version.is_none() || data.all {
        let mut did_update = false;

        let installed: HashSet<VersionType> = service
            .list()
            .await?
            .into_iter()
            .map(|version| version.kind)
            .collect();

        for channel in ["stable", "nightly"] {
            let kind = if channel == "stable" {
                VersionType::Stable
            } else {
                VersionType::Nightly
            };
            if !installed.contains(&kind) {
                continue;
            }
            if run_upgrade(service, channel).await? {
                did_update = true;
            }
        }

        if !did_update {
            warn!("There was nothing to update.");
        }
        return Ok(());
    }

    let version = data.version.unwrap_or_default();
    run_upgrade(service, &version).await?;
    Ok(())
}

async fn run_upgrade(service: &VersionService, channel: &str) -> Result<bool> {
    let (callback, bar) = progress_bar(format!("Upgrading {channel}"));
    let outcome = service.upgrade(channel, Some(&callback)).await;
    bar.finish_and_clear();

    match outcome {
        Ok(UpgradeOutcome::Upgraded { from, to }) => {
            info!("Upgraded {channel}: {from} -> {to}");
            Ok(true)
        }
        Ok(UpgradeOutcome::AlreadyUpToDate(identifier)) => {
            info!("{channel} is already up to date ({identifier})");
            Ok(false)
        }
        Err(crate::Error::NotInstalled(name)) => {
            warn!("{name} is not installed.");
            Ok(false)
        }
        Err(error) => Err(error.into()),
    }
}

fn progress_bar(message: String) -> (ProgressFn, ProgressBar) {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}",
        )
        .unwrap()
        .progress_chars("█  "),
    );
    bar.set_message(message);

    let sink = bar.clone();
    let callback: ProgressFn = Arc::new(move |update| match update {
        Progress::Percent(percent) => sink.set_position(u64::from(percent)),
        Progress::Message(message) => sink.set_message(message),
    });

    (callback, bar)
}
