//! Control file resolution, download and range probing
//!
//! [`ControlFileClient`] turns an [`UpdateInfo`] into a concrete control
//! file URL (directly, through the GitHub releases API, or through the
//! legacy `_latestVersion` redirect), streams the control file and probes
//! the target host for range request support.

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_RANGES, RANGE, RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;
use zsync_formats::{ControlFile, MarkerScanner, MatchConfig, TargetDescriptor, UpdateInfo, wildcard};

use crate::config::ProviderEndpoints;
use crate::error::{ProtocolError, Result};
use crate::transport::HttpClient;

/// Bytes requested by the range probe
const PROBE_RANGE: &str = "bytes=0-200";

/// Placeholder replaced by the resolved version in legacy file names
const LATEST_VERSION: &str = "_latestVersion";

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Result of probing the target URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeProbe {
    /// Whether partial content requests are honoured
    pub supported: bool,
    /// Target URL after redirects
    pub final_url: Url,
}

/// A downloaded and parsed control file
#[derive(Debug, Clone)]
pub struct FetchedControlFile {
    /// Parsed control file
    pub control: ControlFile,
    /// Control file URL after redirects
    pub url: Url,
}

impl FetchedControlFile {
    /// Split into matching configuration and target metadata, resolving a
    /// relative target URL against the control file URL
    pub fn into_config(self) -> Result<(MatchConfig, TargetDescriptor)> {
        Ok(MatchConfig::from_control_file(self.control, Some(&self.url))?)
    }
}

/// Client for everything that happens before range downloads
#[derive(Debug, Clone)]
pub struct ControlFileClient {
    http: HttpClient,
    endpoints: ProviderEndpoints,
}

impl ControlFileClient {
    /// Create a client
    pub fn new(http: HttpClient, endpoints: ProviderEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Find the control file URL for `info`
    #[instrument(skip(self), fields(transport = info.transport()))]
    pub async fn resolve(&self, info: &UpdateInfo) -> Result<Url> {
        let url = match info {
            UpdateInfo::Zsync { url } => parse_url(url)?,
            UpdateInfo::GithubReleases {
                owner,
                repo,
                tag,
                filename,
            } => self.resolve_github(owner, repo, tag, filename).await?,
            UpdateInfo::Bintray {
                user,
                repo,
                package,
                filename,
            } => self.resolve_bintray(user, repo, package, filename).await?,
        };

        info!(url = %url, "resolved control file");
        Ok(url)
    }

    async fn resolve_github(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
        pattern: &str,
    ) -> Result<Url> {
        let base = self.endpoints.github_api.trim_end_matches('/');
        let api = if tag == zsync_formats::update_info::LATEST_TAG {
            format!("{base}/repos/{owner}/{repo}/releases/latest")
        } else {
            format!("{base}/repos/{owner}/{repo}/releases/tags/{tag}")
        };
        debug!(api = %api, "querying release");

        let response = self
            .http
            .inner()
            .get(&api)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
            warn!(status = %status, "release API rate limit reached");
            return Err(ProtocolError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(ProtocolError::from_status(status));
        }

        let body = response.bytes().await?;
        let release: Release = serde_json::from_slice(&body)
            .map_err(|e| ProtocolError::Parse(format!("release response: {e}")))?;
        debug!(
            tag = release.tag_name.as_deref().unwrap_or("?"),
            assets = release.assets.len(),
            "release found"
        );

        release
            .assets
            .iter()
            .find(|asset| wildcard::matches(pattern, &asset.name))
            .ok_or_else(|| ProtocolError::AssetNotFound(pattern.to_string()))
            .and_then(|asset| parse_url(&asset.browser_download_url))
    }

    async fn resolve_bintray(
        &self,
        user: &str,
        repo: &str,
        package: &str,
        filename: &str,
    ) -> Result<Url> {
        let base = self.endpoints.bintray_api.trim_end_matches('/');
        let lookup = format!("{base}/{user}/{repo}/{package}/{LATEST_VERSION}");

        let response = self.http.inner().head(&lookup).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(ProtocolError::from_status(status));
        }

        let redirected = response.url().clone();
        let segments: Vec<&str> = redirected
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let [owner, repository, .., version] = segments.as_slice() else {
            return Err(ProtocolError::Parse(format!(
                "unexpected latest version location {redirected}"
            )));
        };
        debug!(version = %version, "latest package version");

        let name = filename.replace(LATEST_VERSION, version);
        let download = self.endpoints.bintray_download.trim_end_matches('/');
        parse_url(&format!("{download}/{owner}/{repository}/{name}"))
    }

    /// Stream and parse the control file at `url`.
    ///
    /// The body is buffered while the header/table boundary is located, so
    /// a non-seekable transport works the same as a complete download.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<FetchedControlFile> {
        let response = self.http.inner().get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::from_status(status));
        }

        let final_url = response.url().clone();
        let mut scanner = MarkerScanner::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            scanner.feed(&chunk?);
        }

        let control = scanner.finish()?;
        info!(
            filename = %control.header.filename,
            length = control.header.length,
            block_size = control.header.block_size,
            blocks = control.checksums.len(),
            "parsed control file"
        );

        Ok(FetchedControlFile {
            control,
            url: final_url,
        })
    }

    /// Resolve, fetch and parse in one go
    pub async fn load(&self, info: &UpdateInfo) -> Result<(MatchConfig, TargetDescriptor)> {
        let url = self.resolve(info).await?;
        self.fetch(&url).await?.into_config()
    }

    /// Check whether the target host serves partial content.
    ///
    /// Redirects are followed and the probe judges the final host: support
    /// is assumed when the response advertises `Accept-Ranges` (other than
    /// `none`) or answers with `206 Partial Content`.
    #[instrument(skip(self), fields(url = %target))]
    pub async fn probe_range_support(&self, target: &Url) -> Result<RangeProbe> {
        let response = self
            .http
            .inner()
            .get(target.clone())
            .header(RANGE, PROBE_RANGE)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(ProtocolError::from_status(status));
        }

        let advertised = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.trim().eq_ignore_ascii_case("none"));
        let supported = advertised || status == StatusCode::PARTIAL_CONTENT;
        let final_url = response.url().clone();
        // Dropping the response aborts the rest of the body

        if supported {
            debug!(final_url = %final_url, "range requests supported");
        } else {
            warn!(final_url = %final_url, "server does not support range requests");
        }

        Ok(RangeProbe {
            supported,
            final_url,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ProtocolError::Parse(format!("invalid URL {raw}: {e}")))
}
