pub mod cache;
pub mod types;

use async_trait::async_trait;
use reqwest::{Client, Url};
use semver::Version as SemverVersion;
use tracing::debug;

use crate::consts;
use crate::errors::ReleaseError;
use crate::github_requests;

pub use self::cache::ReleaseCache;
pub use self::types::{Asset, Release};

/// Read access to upstream release metadata.
///
/// The selection methods have default implementations over [`get_all`], so a
/// test double only needs to supply the release list.
///
/// [`get_all`]: ReleaseRepository::get_all
#[async_trait]
pub trait ReleaseRepository: Send + Sync {
    /// Returns all known releases, already filtered by the minimum version
    /// constraint. `force` bypasses any cache.
    async fn get_all(&self, force: bool) -> Result<Vec<Release>, ReleaseError>;

    /// The newest non-prerelease by `published_at`.
    async fn find_stable(&self) -> Result<Release, ReleaseError> {
        let releases = self.get_all(false).await?;
        select_stable(&releases)
            .cloned()
            .ok_or(ReleaseError::NoStableRelease)
    }

    /// The first prerelease whose tag starts with `nightly`.
    async fn find_nightly(&self) -> Result<Release, ReleaseError> {
        let releases = self.get_all(false).await?;
        select_nightly(&releases)
            .cloned()
            .ok_or(ReleaseError::NoNightlyRelease)
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Release, ReleaseError> {
        let releases = self.get_all(false).await?;
        releases
            .iter()
            .find(|release| release.tag_name == tag)
            .cloned()
            .ok_or_else(|| ReleaseError::ReleaseNotFound(tag.to_string()))
    }
}

/// The production repository: paginated GitHub fetch behind a TTL disk cache.
pub struct GithubReleaseRepository {
    client: Client,
    cache: ReleaseCache,
    min_version: SemverVersion,
}

impl GithubReleaseRepository {
    pub fn new(client: Client, cache: ReleaseCache, min_version: SemverVersion) -> Self {
        Self {
            client,
            cache,
            min_version,
        }
    }
}

#[async_trait]
impl ReleaseRepository for GithubReleaseRepository {
    async fn get_all(&self, force: bool) -> Result<Vec<Release>, ReleaseError> {
        if !force {
            if let Some(cached) = self.cache.read_fresh().await {
                return Ok(filter_by_min_version(cached, &self.min_version));
            }
        }

        let releases = github_requests::fetch_all_releases(&self.client).await?;

        // The cache stores the unfiltered payload so a config change never
        // requires a refetch.
        if let Err(error) = self.cache.write(&releases).await {
            debug!("failed to write release cache: {error}");
        }

        Ok(filter_by_min_version(releases, &self.min_version))
    }
}

/// Among non-prereleases, the one with the most recent `published_at`.
pub fn select_stable(releases: &[Release]) -> Option<&Release> {
    releases
        .iter()
        .filter(|release| !release.prerelease)
        .max_by_key(|release| release.published_at)
}

/// The first release that is a prerelease and whose lowercased tag starts
/// with `nightly`.
pub fn select_nightly(releases: &[Release]) -> Option<&Release> {
    releases.iter().find(|release| release.is_nightly())
}

/// Drops releases older than `min_version`. The `stable`/`nightly`
/// pseudo-tags always survive; tags that don't parse as semver are dropped.
pub fn filter_by_min_version(releases: Vec<Release>, min_version: &SemverVersion) -> Vec<Release> {
    releases
        .into_iter()
        .filter(|release| {
            let tag = release.tag_name.as_str();
            if tag == "stable" || tag.to_lowercase().starts_with("nightly") {
                return true;
            }
            match SemverVersion::parse(tag.trim_start_matches('v')) {
                Ok(version) => version >= *min_version,
                Err(_) => {
                    debug!("dropping release with unparseable tag {tag:?}");
                    false
                }
            }
        })
        .collect()
}

/// Filename substrings tried in order for the given platform.
pub fn asset_patterns(os: &str, arch: &str) -> Option<&'static [&'static str]> {
    match (os, arch) {
        ("linux", "x86_64") => Some(&[
            "linux-x86_64.tar.gz",
            "linux-64.tar.gz",
            "linux64.tar.gz",
        ]),
        ("linux", "aarch64") => Some(&["linux-arm64.tar.gz"]),
        ("macos", "aarch64") => Some(&["macos-arm64.tar.gz", "macos.tar.gz"]),
        ("macos", "x86_64") => Some(&["macos-x86_64.tar.gz", "macos.tar.gz"]),
        ("windows", _) => Some(&["win64.zip"]),
        _ => None,
    }
}

/// A platform-matched release asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSelection {
    pub name: String,
    pub url: String,
    pub pattern: &'static str,
}

/// Picks the download asset for `os`/`arch`, first pattern match wins.
pub fn select_asset(
    release: &Release,
    os: &str,
    arch: &str,
) -> Result<AssetSelection, ReleaseError> {
    let patterns = asset_patterns(os, arch).ok_or_else(|| ReleaseError::NoMatchingAsset {
        os: os.to_string(),
        arch: arch.to_string(),
    })?;

    for pattern in patterns {
        // checksum companions contain the archive pattern too
        if let Some(asset) = release
            .assets
            .iter()
            .find(|asset| asset.name.contains(pattern) && !asset.name.ends_with(".sha256"))
        {
            return Ok(AssetSelection {
                name: asset.name.clone(),
                url: asset.browser_download_url.clone(),
                pattern,
            });
        }
    }

    Err(ReleaseError::NoMatchingAsset {
        os: os.to_string(),
        arch: arch.to_string(),
    })
}

/// Resolves the checksum document URL for a matched asset: the per-asset
/// `<asset>.sha256` wins, the release-wide `shasum.txt` is the fallback.
pub fn select_checksum_url(
    release: &Release,
    selection: &AssetSelection,
) -> Result<String, ReleaseError> {
    let per_asset = format!("{}.sha256", selection.pattern);
    if let Some(asset) = release
        .assets
        .iter()
        .find(|asset| asset.name.ends_with(&per_asset))
    {
        return Ok(asset.browser_download_url.clone());
    }

    if let Some(asset) = release
        .assets
        .iter()
        .find(|asset| asset.name == "shasum.txt")
    {
        return Ok(asset.browser_download_url.clone());
    }

    Err(ReleaseError::ChecksumNotFound(release.tag_name.clone()))
}

/// Routes a download URL through the configured mirror when its host is the
/// upstream git host. API URLs never pass through here.
pub fn rewrite_through_mirror(url: &str, mirror: &Url) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.host_str() != Some(consts::UPSTREAM_DOWNLOAD_HOST) {
        return url.to_string();
    }
    if parsed.set_host(mirror.host_str()).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn release(tag: &str, prerelease: bool, published_day: u32) -> Release {
        Release {
            tag_name: tag.to_string(),
            prerelease,
            target_commitish: Some("abc1234567".to_string()),
            published_at: Utc.with_ymd_and_hms(2025, 1, published_day, 0, 0, 0).unwrap(),
            assets: Vec::new(),
        }
    }

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            browser_download_url: format!("https://github.com/neovim/neovim/releases/download/v/{name}"),
            size: 1,
        }
    }

    #[test]
    fn stable_is_newest_non_prerelease() {
        let releases = vec![
            release("v0.10.2", false, 1),
            release("v0.10.3", false, 20),
            release("nightly", true, 25),
        ];
        assert_eq!(select_stable(&releases).unwrap().tag_name, "v0.10.3");
    }

    #[test]
    fn nightly_requires_prerelease_and_prefix() {
        let releases = vec![
            release("v0.11.0-rc1", true, 10),
            release("Nightly", true, 5),
        ];
        assert_eq!(select_nightly(&releases).unwrap().tag_name, "Nightly");
    }

    #[test]
    fn nightly_absent() {
        let releases = vec![release("v0.10.3", false, 1)];
        assert!(select_nightly(&releases).is_none());
    }

    #[test]
    fn min_version_filter_keeps_channels() {
        let releases = vec![
            release("v0.4.0", false, 1),
            release("v0.10.3", false, 2),
            release("nightly", true, 3),
            release("stable", false, 4),
            release("winget", false, 5),
        ];
        let min = SemverVersion::new(0, 5, 0);
        let kept: Vec<String> = filter_by_min_version(releases, &min)
            .into_iter()
            .map(|release| release.tag_name)
            .collect();
        assert_eq!(kept, ["v0.10.3", "nightly", "stable"]);
    }

    #[test]
    fn arm_asset_wins_over_generic_on_darwin() {
        let mut rel = release("v0.10.3", false, 1);
        rel.assets = vec![asset("nvim-macos.tar.gz"), asset("nvim-macos-arm64.tar.gz")];
        let selection = select_asset(&rel, "macos", "aarch64").unwrap();
        assert_eq!(selection.name, "nvim-macos-arm64.tar.gz");
        assert_eq!(selection.pattern, "macos-arm64.tar.gz");
    }

    #[test]
    fn generic_asset_is_the_fallback_on_darwin() {
        let mut rel = release("v0.9.5", false, 1);
        rel.assets = vec![asset("nvim-macos.tar.gz")];
        let selection = select_asset(&rel, "macos", "aarch64").unwrap();
        assert_eq!(selection.name, "nvim-macos.tar.gz");
    }

    #[test]
    fn linux_legacy_names_match_in_order() {
        let mut rel = release("v0.9.5", false, 1);
        rel.assets = vec![asset("nvim-linux64.tar.gz")];
        let selection = select_asset(&rel, "linux", "x86_64").unwrap();
        assert_eq!(selection.pattern, "linux64.tar.gz");
    }

    #[test]
    fn windows_always_takes_win64_zip() {
        let mut rel = release("v0.10.3", false, 1);
        rel.assets = vec![asset("nvim-win64.zip")];
        for arch in ["x86_64", "aarch64"] {
            assert_eq!(
                select_asset(&rel, "windows", arch).unwrap().name,
                "nvim-win64.zip"
            );
        }
    }

    #[test]
    fn no_matching_asset() {
        let mut rel = release("v0.10.3", false, 1);
        rel.assets = vec![asset("nvim-win64.zip")];
        assert!(matches!(
            select_asset(&rel, "linux", "x86_64"),
            Err(ReleaseError::NoMatchingAsset { .. })
        ));
    }

    #[test]
    fn per_asset_checksum_preferred() {
        let mut rel = release("v0.10.3", false, 1);
        rel.assets = vec![
            asset("nvim-linux-x86_64.tar.gz"),
            asset("nvim-linux-x86_64.tar.gz.sha256"),
            asset("shasum.txt"),
        ];
        let selection = select_asset(&rel, "linux", "x86_64").unwrap();
        let url = select_checksum_url(&rel, &selection).unwrap();
        assert!(url.ends_with("nvim-linux-x86_64.tar.gz.sha256"));
    }

    #[test]
    fn shasum_txt_fallback() {
        let mut rel = release("v0.10.3", false, 1);
        rel.assets = vec![asset("nvim-linux-x86_64.tar.gz"), asset("shasum.txt")];
        let selection = select_asset(&rel, "linux", "x86_64").unwrap();
        let url = select_checksum_url(&rel, &selection).unwrap();
        assert!(url.ends_with("shasum.txt"));
    }

    #[test]
    fn checksum_absent() {
        let mut rel = release("v0.10.3", false, 1);
        rel.assets = vec![asset("nvim-linux-x86_64.tar.gz")];
        let selection = select_asset(&rel, "linux", "x86_64").unwrap();
        assert!(matches!(
            select_checksum_url(&rel, &selection),
            Err(ReleaseError::ChecksumNotFound(_))
        ));
    }

    #[test]
    fn mirror_rewrites_upstream_host_only() {
        let mirror = Url::parse("https://ghproxy.com").unwrap();
        let rewritten = rewrite_through_mirror(
            "https://github.com/neovim/neovim/releases/download/v0.10.3/nvim-linux-x86_64.tar.gz",
            &mirror,
        );
        assert_eq!(
            rewritten,
            "https://ghproxy.com/neovim/neovim/releases/download/v0.10.3/nvim-linux-x86_64.tar.gz"
        );

        let untouched = rewrite_through_mirror("https://objects.example.com/blob", &mirror);
        assert_eq!(untouched, "https://objects.example.com/blob");
    }
}
