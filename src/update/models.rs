use std::sync::Arc;

use serde::{Deserialize, Serialize};
use semver::Version;
use sha2::{Digest, Sha256};

/// A single downloadable file attached to a release
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub name: String,
    pub download_url: String,
    pub size_bytes: u64,
}

/// Snapshot of the newest published release. Replaced, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub published_at: chrono::DateTime<chrono::Utc>,
    pub html_url: String,
    pub body: String,
    pub assets: Vec<Asset>,
}

impl ReleaseInfo {
    /// Semantic version of the tag, if it is one
    pub fn version(&self) -> Option<Version> {
        let version_str = self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name);
        Version::parse(version_str).ok()
    }
}

/// Downloaded firmware bytes together with the asset they came from
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub asset: Asset,
    pub data: Arc<[u8]>,
    pub sha256: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl FirmwareImage {
    pub fn new(asset: Asset, data: Vec<u8>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&data));
        Self {
            asset,
            data: Arc::from(data),
            sha256,
            fetched_at: chrono::Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f64,
    pub speed_bps: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] anyhow::Error),

    #[error("Server returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Empty response body")]
    EmptyBody,
}

pub type UpdateResult<T> = Result<T, UpdateError>;
