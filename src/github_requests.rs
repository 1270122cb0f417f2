use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::consts;
use crate::errors::ReleaseError;
use crate::releases::types::Release;

/// Creates the process-wide `reqwest::Client`.
///
/// When the `GITHUB_TOKEN` environment variable is set it is attached as a
/// bearer token, which raises the API rate limit considerably. Every request
/// carries a 30 second timeout.
pub fn create_reqwest_client() -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();

    if let Ok(github_token) = std::env::var("GITHUB_TOKEN") {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {github_token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(consts::HTTP_TIMEOUT)
        .build()
}

/// Fetches the full upstream release list, one page of 100 at a time,
/// stopping on the first short page.
///
/// # Errors
///
/// * [`ReleaseError::RateLimitExceeded`] on HTTP 403.
/// * [`ReleaseError::ApiRequestFailed`] on any other non-200 status.
pub async fn fetch_all_releases(client: &Client) -> Result<Vec<Release>, ReleaseError> {
    let mut all = Vec::new();
    let mut page = 1usize;

    loop {
        let url = format!(
            "{}?page={page}&per_page={}",
            consts::GITHUB_API_RELEASES_URL,
            consts::RELEASES_PER_PAGE
        );
        debug!("fetching {url}");

        let response = client
            .get(&url)
            .header("user-agent", consts::USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => (),
            StatusCode::FORBIDDEN => return Err(ReleaseError::RateLimitExceeded),
            status => return Err(ReleaseError::ApiRequestFailed(status)),
        }

        let releases: Vec<Release> = serde_json::from_str(&response.text().await?)?;
        let page_len = releases.len();
        all.extend(releases);

        if page_len < consts::RELEASES_PER_PAGE {
            break;
        }
        page += 1;
    }

    Ok(all)
}
