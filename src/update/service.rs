use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::Client;
use serde_json::Value;

use super::models::{Asset, DownloadProgress, ReleaseInfo, UpdateError, UpdateResult};

/// Where releases and binaries come from
#[async_trait]
pub trait FirmwareSource: Send + Sync {
    /// Newest published release of `owner/repo`
    async fn latest_release(&self, owner: &str, repo: &str) -> UpdateResult<ReleaseInfo>;

    /// Full body of `url`, reporting progress as chunks arrive
    async fn fetch_bytes(
        &self,
        url: &str,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> UpdateResult<Vec<u8>>;
}

/// GitHub REST client for release lookup and asset download
pub struct UpdateService {
    client: Client,
    github_api_base: String,
    user_agent: String,
}

impl UpdateService {
    pub fn new(github_api_base: String, user_agent: String) -> Self {
        Self {
            client: Client::new(),
            github_api_base,
            user_agent,
        }
    }

    /// Parse GitHub release JSON into ReleaseInfo, keeping feed asset order
    pub fn parse_github_release(data: &Value) -> UpdateResult<ReleaseInfo> {
        let tag_name = data["tag_name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing tag_name in GitHub release"))?
            .to_string();

        let published_at_str = data["published_at"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing published_at in GitHub release"))?;
        let published_at = chrono::DateTime::parse_from_rfc3339(published_at_str)
            .map_err(|e| anyhow::anyhow!("Date parse error: {}", e))?
            .with_timezone(&chrono::Utc);

        let html_url = data["html_url"].as_str().unwrap_or("").to_string();
        let body = data["body"].as_str().unwrap_or("").to_string();

        let assets = data["assets"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Missing assets in GitHub release"))?
            .iter()
            .filter_map(|asset| {
                let name = asset["name"].as_str()?;
                let download_url = asset["browser_download_url"].as_str()?;
                Some(Asset {
                    name: name.to_string(),
                    download_url: download_url.to_string(),
                    size_bytes: asset["size"].as_u64().unwrap_or(0),
                })
            })
            .collect();

        Ok(ReleaseInfo {
            tag_name,
            published_at,
            html_url,
            body,
            assets,
        })
    }
}

#[async_trait]
impl FirmwareSource for UpdateService {
    async fn latest_release(&self, owner: &str, repo: &str) -> UpdateResult<ReleaseInfo> {
        let url = format!("{}/repos/{}/{}/releases/latest", self.github_api_base, owner, repo);
        debug!("Fetching latest release from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            error!("GitHub API request failed with status: {}", response.status());
            return Err(UpdateError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let release_data: Value = response.json().await?;
        Self::parse_github_release(&release_data)
    }

    async fn fetch_bytes(
        &self,
        url: &str,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> UpdateResult<Vec<u8>> {
        info!("Downloading firmware from: {}", url);

        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            error!("Download request failed with status: {}", response.status());
            return Err(UpdateError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total_size = response.content_length().unwrap_or(0);
        let mut data = Vec::with_capacity(total_size as usize);
        let mut stream = response.bytes_stream();
        let start_time = std::time::Instant::now();

        while let Some(chunk_result) = futures_util::StreamExt::next(&mut stream).await {
            let chunk = chunk_result?;
            data.extend_from_slice(&chunk);

            let downloaded = data.len() as u64;
            let elapsed = start_time.elapsed().as_secs_f64();
            let speed_bps = if elapsed > 0.0 { (downloaded as f64 / elapsed) as u64 } else { 0 };

            progress(DownloadProgress {
                downloaded_bytes: downloaded,
                total_bytes: total_size,
                percentage: if total_size > 0 {
                    (downloaded as f64 / total_size as f64) * 100.0
                } else {
                    0.0
                },
                speed_bps,
            });
        }

        if data.is_empty() {
            return Err(UpdateError::EmptyBody);
        }

        info!("Firmware download completed: {} bytes", data.len());
        Ok(data)
    }
}
