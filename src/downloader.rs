//! Streaming downloads with optional SHA-256 verification.
//!
//! The checksum document is fetched concurrently with the body; the body is
//! hashed chunk by chunk as it is written, so verification adds no second
//! pass over the file.

use std::cmp::min;
use std::path::Path;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::consts;
use crate::errors::DownloadError;
use crate::progress::{Progress, ProgressFn, emit};

/// Fetch-to-disk capability consumed by the installer.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Streams `url` into `out`, reporting percent progress when the
    /// response carries a content length.
    async fn download(
        &self,
        url: &str,
        out: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<(), DownloadError>;

    /// Same as [`download`], but also fetches `checksum_url` and verifies
    /// the streamed bytes against the entry for `asset_name`.
    ///
    /// [`download`]: Downloader::download
    async fn download_with_checksum_verification(
        &self,
        url: &str,
        checksum_url: &str,
        asset_name: &str,
        out: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<(), DownloadError>;
}

/// The production downloader over the shared `reqwest::Client`.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Streams the response body into `out`, hashing as it goes, and returns
    /// the hex digest.
    async fn stream_to_file(
        &self,
        url: &str,
        out: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<String, DownloadError> {
        let response = self
            .client
            .get(url)
            .header("user-agent", consts::USER_AGENT)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(DownloadError::BadStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let total_size = response.content_length();
        let mut response_bytes = response.bytes_stream();
        let mut file = File::create(out).await?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut last_percent: u8 = 0;

        while let Some(item) = response_bytes.next().await {
            let chunk = item.map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);

            downloaded += chunk.len() as u64;
            if let Some(total) = total_size.filter(|total| *total > 0) {
                let percent = min(100, (downloaded * 100 / total) as u8);
                if percent != last_percent {
                    last_percent = percent;
                    emit(progress, Progress::Percent(percent));
                }
            }
        }

        file.flush().await?;

        let hash = hasher.finalize();
        Ok(format!("{hash:x}"))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self
            .client
            .get(url)
            .header("user-agent", consts::USER_AGENT)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(DownloadError::BadStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        response
            .text()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        out: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<(), DownloadError> {
        self.stream_to_file(url, out, progress).await?;
        Ok(())
    }

    async fn download_with_checksum_verification(
        &self,
        url: &str,
        checksum_url: &str,
        asset_name: &str,
        out: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<(), DownloadError> {
        let (digest, document) = tokio::join!(
            self.stream_to_file(url, out, progress),
            self.fetch_text(checksum_url),
        );
        let digest = digest?;
        let expected = parse_checksum_document(&document?, asset_name)?;

        verify_digest(asset_name, &expected, &digest)
    }
}

/// Extracts the expected hex digest for `asset_name` from a checksum
/// document.
///
/// Two shapes are accepted: a single `<hex> [filename]` line (per-asset
/// `.sha256` files), or a multi-line `shasum.txt` where the right row is
/// located by the asset name. Only the first 64-hex field of the matching
/// row is used.
pub fn parse_checksum_document(
    document: &str,
    asset_name: &str,
) -> Result<String, DownloadError> {
    let lines: Vec<&str> = document
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return Err(DownloadError::ChecksumFileEmpty);
    }

    let line = if lines.len() == 1 {
        lines[0]
    } else {
        *lines
            .iter()
            .find(|line| line.contains(asset_name))
            .ok_or_else(|| DownloadError::ChecksumEntryMissing(asset_name.to_string()))?
    };

    line.split_whitespace()
        .find(|field| field.len() == 64 && field.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_lowercase)
        .ok_or_else(|| DownloadError::ChecksumEntryMissing(asset_name.to_string()))
}

/// Case-insensitive digest comparison.
pub fn verify_digest(asset_name: &str, expected: &str, actual: &str) -> Result<(), DownloadError> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch {
            asset: asset_name.to_string(),
            expected: expected.to_lowercase(),
            actual: actual.to_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3";
    const HASH_B: &str = "b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c";

    #[test]
    fn single_line_without_filename() {
        let doc = format!("{HASH_A}\n");
        assert_eq!(
            parse_checksum_document(&doc, "nvim-linux-x86_64.tar.gz").unwrap(),
            HASH_A
        );
    }

    #[test]
    fn single_line_with_filename() {
        let doc = format!("{HASH_A}  nvim-linux-x86_64.tar.gz\n");
        assert_eq!(
            parse_checksum_document(&doc, "nvim-linux-x86_64.tar.gz").unwrap(),
            HASH_A
        );
    }

    #[test]
    fn multi_line_locates_row_by_asset_name() {
        let doc = format!(
            "{HASH_A}  nvim-macos-arm64.tar.gz\n{HASH_B}  nvim-linux-x86_64.tar.gz\n"
        );
        assert_eq!(
            parse_checksum_document(&doc, "nvim-linux-x86_64.tar.gz").unwrap(),
            HASH_B
        );
    }

    #[test]
    fn multi_line_missing_row() {
        let doc = format!("{HASH_A}  nvim-macos-arm64.tar.gz\n{HASH_B}  other.zip\n");
        assert!(matches!(
            parse_checksum_document(&doc, "nvim-win64.zip"),
            Err(DownloadError::ChecksumEntryMissing(_))
        ));
    }

    #[test]
    fn empty_document() {
        assert!(matches!(
            parse_checksum_document("  \n\n", "x"),
            Err(DownloadError::ChecksumFileEmpty)
        ));
    }

    #[test]
    fn uppercase_digest_matches() {
        let doc = HASH_A.to_uppercase();
        let expected = parse_checksum_document(&doc, "x").unwrap();
        assert!(verify_digest("x", &expected, HASH_A).is_ok());
    }

    #[test]
    fn sha256_round_trip() {
        let body = b"hello world";
        let digest = format!("{:x}", Sha256::digest(body));
        let doc = format!("{digest}  asset.tar.gz");
        let expected = parse_checksum_document(&doc, "asset.tar.gz").unwrap();
        assert!(verify_digest("asset.tar.gz", &expected, &digest).is_ok());
    }

    #[test]
    fn mismatch_is_reported() {
        let result = verify_digest("asset.tar.gz", HASH_A, HASH_B);
        assert!(matches!(
            result,
            Err(DownloadError::ChecksumMismatch { .. })
        ));
    }
}
