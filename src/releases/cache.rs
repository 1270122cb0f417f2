use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::debug;

use crate::consts;
use crate::helpers::filesystem::atomic_write;
use crate::releases::types::Release;

/// On-disk cache of the upstream release list.
///
/// One JSON file, freshness judged by its mtime against the TTL. The file is
/// a hint only: it is replaced atomically (write-to-temp + rename) and every
/// read failure, staleness included, silently falls through to a refetch.
pub struct ReleaseCache {
    path: PathBuf,
    ttl: Duration,
}

impl ReleaseCache {
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: cache_dir.into().join(consts::CACHE_FILE_NAME),
            ttl,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Returns the cached releases when the file exists, is younger than the
    /// TTL and parses. Anything else returns `None` with a debug log.
    pub async fn read_fresh(&self) -> Option<Vec<Release>> {
        let metadata = fs::metadata(&self.path).await.ok()?;
        let modified = metadata.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        if age >= self.ttl {
            debug!(
                "release cache is {}s old (ttl {}s), refetching",
                age.as_secs(),
                self.ttl.as_secs()
            );
            return None;
        }

        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) => {
                debug!("release cache unreadable: {error}");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(releases) => Some(releases),
            Err(error) => {
                debug!("release cache unparseable: {error}");
                None
            }
        }
    }

    /// Atomically replaces the cache file.
    pub async fn write(&self, releases: &[Release]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string(releases).map_err(std::io::Error::other)?;
        atomic_write(&self.path, json.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn release(tag: &str) -> Release {
        Release {
            tag_name: tag.to_string(),
            prerelease: false,
            target_commitish: None,
            published_at: Utc::now(),
            assets: Vec::new(),
        }
    }

    #[tokio::test]
    async fn round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ReleaseCache::new(temp.path(), Duration::from_secs(300));

        cache.write(&[release("v0.10.3")]).await.unwrap();
        let cached = cache.read_fresh().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].tag_name, "v0.10.3");
    }

    #[tokio::test]
    async fn missing_file_is_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ReleaseCache::new(temp.path(), Duration::from_secs(300));
        assert!(cache.read_fresh().await.is_none());
    }

    #[tokio::test]
    async fn stale_file_is_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ReleaseCache::new(temp.path(), Duration::from_secs(300));
        cache.write(&[release("v0.10.3")]).await.unwrap();

        let old = filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(600),
        );
        filetime::set_file_mtime(cache.path(), old).unwrap();

        assert!(cache.read_fresh().await.is_none());
    }

    #[tokio::test]
    async fn truncated_file_is_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ReleaseCache::new(temp.path(), Duration::from_secs(300));
        fs::write(cache.path(), "[{\"tag_na").await.unwrap();
        assert!(cache.read_fresh().await.is_none());
    }

    #[tokio::test]
    async fn camel_case_cache_is_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ReleaseCache::new(temp.path(), Duration::from_secs(300));
        fs::write(
            cache.path(),
            r#"[{"tagName":"v1.0.0","publishedAt":"2025-01-01T00:00:00Z"}]"#,
        )
        .await
        .unwrap();
        assert!(cache.read_fresh().await.is_none());
    }
}
