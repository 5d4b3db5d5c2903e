use std::sync::Arc;

use log::info;

use super::models::{Asset, ReleaseInfo};
use super::service::FirmwareSource;
use crate::error::UpdaterError;

/// First asset, in feed order, whose name ends with `suffix`
pub fn select_firmware_asset<'a>(release: &'a ReleaseInfo, suffix: &str) -> Option<&'a Asset> {
    release.assets.iter().find(|asset| asset.name.ends_with(suffix))
}

/// Looks up the newest release and picks the firmware binary out of it
pub struct ReleaseResolver {
    source: Arc<dyn FirmwareSource>,
    firmware_suffix: String,
}

impl ReleaseResolver {
    pub fn new(source: Arc<dyn FirmwareSource>, firmware_suffix: String) -> Self {
        Self {
            source,
            firmware_suffix,
        }
    }

    pub async fn resolve_latest(&self, owner: &str, repo: &str) -> Result<ReleaseInfo, UpdaterError> {
        let release = self
            .source
            .latest_release(owner, repo)
            .await
            .map_err(|e| UpdaterError::FeedUnavailable(e.to_string()))?;

        info!(
            "Latest release of {}/{}: {} published {} with {} assets",
            owner,
            repo,
            release.tag_name,
            release.published_at,
            release.assets.len()
        );
        Ok(release)
    }

    /// `AssetNotFound` is a soft failure: only the download step stops
    pub fn select_firmware_asset(&self, release: &ReleaseInfo) -> Result<Asset, UpdaterError> {
        select_firmware_asset(release, &self.firmware_suffix)
            .cloned()
            .ok_or_else(|| UpdaterError::AssetNotFound {
                tag: release.tag_name.clone(),
                suffix: self.firmware_suffix.clone(),
            })
    }

    pub fn firmware_suffix(&self) -> &str {
        &self.firmware_suffix
    }
}
