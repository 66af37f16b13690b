//! Configuration structures for update sessions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::transport::HttpConfig;
use zsync_core::ExistingFilePolicy;

/// Range download scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Range requests in flight at once
    pub max_concurrent: usize,

    /// Gaps larger than this are split at block boundaries (0 disables)
    pub max_range_bytes: u64,

    /// Re-requests of a range whose data failed verification
    pub integrity_retries: u32,

    /// Retry policy for transport failures
    pub retry_policy: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_concurrency(),
            max_range_bytes: 8 * 1024 * 1024,
            integrity_retries: 3,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_concurrent: std::env::var("ZSYNC_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_concurrent),
            max_range_bytes: std::env::var("ZSYNC_MAX_RANGE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_range_bytes),
            integrity_retries: std::env::var("ZSYNC_INTEGRITY_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.integrity_retries),
            retry_policy: RetryPolicy::from_env()?,
        })
    }
}

/// Twice the available parallelism
fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(2, |n| n.get() * 2)
}

/// Base URLs of release providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    /// GitHub REST API root
    pub github_api: String,

    /// Legacy `_latestVersion` redirect lookup root
    pub bintray_api: String,

    /// Legacy download root
    pub bintray_download: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            github_api: "https://api.github.com".to_string(),
            bintray_api: "https://bintray.com".to_string(),
            bintray_download: "https://dl.bintray.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Create endpoints from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            github_api: std::env::var("ZSYNC_GITHUB_API").unwrap_or(defaults.github_api),
            bintray_api: std::env::var("ZSYNC_BINTRAY_API").unwrap_or(defaults.bintray_api),
            bintray_download: std::env::var("ZSYNC_BINTRAY_DOWNLOAD")
                .unwrap_or(defaults.bintray_download),
        }
    }
}

/// Settings for one update session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Output directory; the seed's directory when unset
    pub output_dir: Option<PathBuf>,

    /// What to do with an existing file of the target name
    pub existing_file_policy: ExistingFilePolicy,

    /// Skip leftover `.part` files from interrupted runs
    pub ignore_partial_files: bool,

    /// Skip an existing target-named file in the output directory
    pub ignore_existing_target: bool,

    /// HTTP transport settings
    pub http: HttpConfig,

    /// Range download settings
    pub orchestrator: OrchestratorConfig,

    /// Release provider endpoints
    pub endpoints: ProviderEndpoints,
}

impl SessionConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            output_dir: std::env::var("ZSYNC_OUTPUT_DIR").map(PathBuf::from).ok(),
            existing_file_policy: match std::env::var("ZSYNC_EXISTING_FILE").as_deref() {
                Ok("replace") => ExistingFilePolicy::Replace,
                _ => ExistingFilePolicy::KeepBoth,
            },
            ignore_partial_files: std::env::var("ZSYNC_IGNORE_PARTIAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            ignore_existing_target: std::env::var("ZSYNC_IGNORE_EXISTING")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            http: HttpConfig::from_env()?,
            orchestrator: OrchestratorConfig::from_env()?,
            endpoints: ProviderEndpoints::from_env(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert!(config.max_concurrent >= 2);
        assert_eq!(config.max_concurrent % 2, 0);
        assert_eq!(config.integrity_retries, 3);

        let session = SessionConfig::default();
        assert_eq!(session.existing_file_policy, ExistingFilePolicy::KeepBoth);
        assert!(session.output_dir.is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).expect("Operation should succeed");
        assert!(json.contains("\"keep_both\""));
        let back: SessionConfig = serde_json::from_str(&json).expect("Operation should succeed");
        assert_eq!(back.endpoints.github_api, "https://api.github.com");
    }
}
