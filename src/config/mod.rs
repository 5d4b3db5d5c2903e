use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::flash::DEFAULT_FLASH_OFFSET;
use crate::serial::DEFAULT_BAUD_RATE;

pub const DEFAULT_FIRMWARE_SUFFIX: &str = ".ino.bin";
pub const DEFAULT_RELAY_BASE: &str = "https://corsproxy.io/?url=";

/// Updater settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdaterConfig {
    pub repo_owner: String,
    pub repo_name: String,
    pub github_api_base: String,
    pub user_agent: String,
    pub firmware_suffix: String,
    pub flash_offset: u32,
    pub baud_rate: u32,
    pub relay_base: String,
    pub use_relay: bool,
    pub handoff_grace_ms: u64,
    /// Skip the port prompt and always use this port
    pub port: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            repo_owner: String::new(),
            repo_name: String::new(),
            github_api_base: "https://api.github.com".to_string(),
            user_agent: concat!("serial-updater/", env!("CARGO_PKG_VERSION")).to_string(),
            firmware_suffix: DEFAULT_FIRMWARE_SUFFIX.to_string(),
            flash_offset: DEFAULT_FLASH_OFFSET,
            baud_rate: DEFAULT_BAUD_RATE,
            relay_base: DEFAULT_RELAY_BASE.to_string(),
            use_relay: false,
            handoff_grace_ms: 100,
            port: None,
        }
    }
}

impl UpdaterConfig {
    /// Read a JSON config file; missing keys take their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.repo_owner.trim().is_empty() || self.repo_name.trim().is_empty() {
            bail!("Release feed owner and repository must be set");
        }
        if self.firmware_suffix.is_empty() {
            bail!("Firmware suffix must not be empty");
        }
        if self.baud_rate == 0 {
            bail!("Baud rate must be greater than zero");
        }
        Ok(())
    }

    pub fn handoff_grace(&self) -> Duration {
        Duration::from_millis(self.handoff_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: UpdaterConfig =
            serde_json::from_str(r#"{ "repo_owner": "acme", "repo_name": "widget-fw", "use_relay": true }"#)
                .unwrap();
        assert_eq!(config.repo_owner, "acme");
        assert!(config.use_relay);
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.flash_offset, 0x10000);
        assert_eq!(config.firmware_suffix, ".ino.bin");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_repo() {
        let config = UpdaterConfig::default();
        assert!(config.validate().is_err());

        let config = UpdaterConfig {
            repo_owner: "acme".into(),
            repo_name: "fw".into(),
            baud_rate: 0,
            ..UpdaterConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
