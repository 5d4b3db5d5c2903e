use std::sync::Arc;

use log::debug;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::models::{Asset, DownloadProgress, FirmwareImage, UpdateError};
use super::service::FirmwareSource;
use crate::error::UpdaterError;

/// Characters left untouched by JavaScript's `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Route `url` through the relay: `relay_base + percent-encoded(url)`
pub fn relay_url(relay_base: &str, url: &str) -> String {
    format!("{}{}", relay_base, utf8_percent_encode(url, URI_COMPONENT))
}

/// Downloads a selected asset into a [`FirmwareImage`]
pub struct BinaryFetcher {
    source: Arc<dyn FirmwareSource>,
    relay_base: String,
}

impl BinaryFetcher {
    pub fn new(source: Arc<dyn FirmwareSource>, relay_base: String) -> Self {
        Self { source, relay_base }
    }

    /// The URL actually requested for `locator`
    pub fn target_url(&self, locator: &str, use_relay: bool) -> String {
        if use_relay {
            relay_url(&self.relay_base, locator)
        } else {
            locator.to_string()
        }
    }

    pub async fn fetch<F>(
        &self,
        asset: &Asset,
        use_relay: bool,
        on_progress: F,
    ) -> Result<FirmwareImage, UpdaterError>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        let url = self.target_url(&asset.download_url, use_relay);
        debug!("Fetching {} (relay: {})", url, use_relay);

        let data = self
            .source
            .fetch_bytes(&url, &on_progress)
            .await
            .and_then(|data| if data.is_empty() { Err(UpdateError::EmptyBody) } else { Ok(data) })
            .map_err(|e| UpdaterError::DownloadFailed(e.to_string()))?;

        Ok(FirmwareImage::new(asset.clone(), data))
    }
}
