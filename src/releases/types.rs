use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream release, in the GitHub API field shape. The same shape is
/// persisted verbatim in the on-disk cache, so renaming a field here
/// invalidates historic caches (they fail to parse and get refetched).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    pub target_commitish: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    /// The full commit hash this release was cut from, when known.
    pub fn commit_hash(&self) -> &str {
        self.target_commitish.as_deref().unwrap_or("")
    }

    pub fn is_nightly(&self) -> bool {
        self.prerelease && self.tag_name.to_lowercase().starts_with("nightly")
    }

    /// What an install of this release writes to `version.txt`: the commit
    /// hash for nightlies, the tag for everything else.
    pub fn identifier(&self) -> &str {
        if self.is_nightly() && !self.commit_hash().is_empty() {
            self.commit_hash()
        } else {
            &self.tag_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool, commitish: Option<&str>) -> Release {
        Release {
            tag_name: tag.to_string(),
            prerelease,
            target_commitish: commitish.map(str::to_string),
            published_at: Utc::now(),
            assets: Vec::new(),
        }
    }

    #[test]
    fn stable_identifier_is_the_tag() {
        let rel = release("v0.10.3", false, Some("abc"));
        assert_eq!(rel.identifier(), "v0.10.3");
    }

    #[test]
    fn nightly_identifier_is_the_commit() {
        let rel = release("nightly", true, Some("deadbeef00"));
        assert_eq!(rel.identifier(), "deadbeef00");
    }

    #[test]
    fn nightly_without_commitish_falls_back_to_tag() {
        let rel = release("nightly", true, None);
        assert_eq!(rel.identifier(), "nightly");
    }

    #[test]
    fn cache_shape_round_trips() {
        let rel = release("v0.10.3", false, Some("abc"));
        let json = serde_json::to_string(&rel).unwrap();
        assert!(json.contains("\"tag_name\""));
        assert!(json.contains("\"published_at\""));
        let back: Release = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tag_name, "v0.10.3");
    }

    #[test]
    fn camel_case_payload_is_unparseable() {
        let json = r#"{"tagName":"v1.0.0","publishedAt":"2025-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Release>(json).is_err());
    }
}
