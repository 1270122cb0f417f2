use serde::{Deserialize, Serialize};

use crate::consts::COMMIT_HASH_REGEX;
use crate::errors::Error;

/// A version as the store and service see it.
///
/// `name` is the directory basename under the versions root. `identifier` is
/// the human display string, which for installed versions is the content of
/// `version.txt` (release tag for stable/tag, full commit hash for
/// nightly/commit). `commit_hash` is the full hex hash when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub name: String,
    pub kind: VersionType,
    pub identifier: String,
    pub commit_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionType {
    Stable,
    Nightly,
    Commit,
    Tag,
}

/// Checks whether a string addresses a git commit: `master`, `main`, or a
/// 7 to 40 character hex string.
pub fn is_commit_reference(value: &str) -> bool {
    value == "master" || value == "main" || COMMIT_HASH_REGEX.is_match(value)
}

/// Normalizes a user-supplied version string.
///
/// `stable` and `nightly` (and `nightly-*`) pass through, as do commit
/// references. Anything else is treated as a release tag and gets a `v`
/// prefix when missing, so `0.10.3` becomes `v0.10.3`.
///
/// # Errors
///
/// Returns [`Error::InvalidVersionString`] when the input is neither a
/// channel, a commit reference, nor something that looks like a version tag.
pub fn normalize_alias(alias: &str) -> Result<String, Error> {
    if alias == "stable" || alias.to_lowercase().starts_with("nightly") {
        return Ok(alias.to_string());
    }
    if is_commit_reference(alias) {
        return Ok(alias.to_string());
    }

    let tag = if alias.starts_with('v') {
        alias.to_string()
    } else {
        format!("v{alias}")
    };

    if !looks_like_tag(&tag) {
        return Err(Error::InvalidVersionString(alias.to_string()));
    }

    Ok(tag)
}

/// Classifies a normalized name the way the on-disk layout is read back:
/// `stable` is the stable channel, a (case-insensitive) `nightly` prefix is
/// the nightly channel, a commit reference is a source build, everything
/// else is a pinned release tag.
pub fn classify(name: &str) -> VersionType {
    if name == "stable" {
        VersionType::Stable
    } else if name.to_lowercase().starts_with("nightly") {
        VersionType::Nightly
    } else if is_commit_reference(name) {
        VersionType::Commit
    } else {
        VersionType::Tag
    }
}

fn looks_like_tag(tag: &str) -> bool {
    let rest = &tag[1..];
    let mut segments = 0;
    for segment in rest.split('.') {
        if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        segments += 1;
    }
    (1..=3).contains(&segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prepends_v() {
        assert_eq!(normalize_alias("0.10.3").unwrap(), "v0.10.3");
    }

    #[test]
    fn normalize_keeps_existing_v() {
        assert_eq!(normalize_alias("v0.10.3").unwrap(), "v0.10.3");
    }

    #[test]
    fn normalize_passes_channels_and_commits_through() {
        for alias in ["stable", "nightly", "master", "main", "abc1234"] {
            assert_eq!(normalize_alias(alias).unwrap(), alias);
        }
        let long = "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2";
        assert_eq!(normalize_alias(long).unwrap(), long);
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(matches!(
            normalize_alias("not a version"),
            Err(Error::InvalidVersionString(_))
        ));
    }

    #[test]
    fn classify_channels() {
        assert_eq!(classify("stable"), VersionType::Stable);
        assert_eq!(classify("nightly"), VersionType::Nightly);
        assert_eq!(classify("NIGHTLY-2025-01-01"), VersionType::Nightly);
    }

    #[test]
    fn classify_commits_and_tags() {
        assert_eq!(classify("master"), VersionType::Commit);
        assert_eq!(classify("main"), VersionType::Commit);
        assert_eq!(classify("abc1234"), VersionType::Commit);
        assert_eq!(classify("v0.10.3"), VersionType::Tag);
    }

    #[test]
    fn six_char_hex_is_not_a_commit() {
        assert!(!is_commit_reference("abc123"));
        assert!(is_commit_reference("abc1234"));
    }
}
