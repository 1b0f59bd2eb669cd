use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use turkbridge_core::config::SyncConfig;

pub const API_TOKEN_ENV: &str = "TURKBRIDGE_API_TOKEN";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketplaceConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub preview_base_url: String,
    pub timeout_secs: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_token: None,
            preview_base_url: "https://workersandbox.mturk.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MarketplaceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            marketplace: MarketplaceConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// A missing file at the default location yields defaults; an explicitly
    /// requested file must exist.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let mut config = if path.exists() || explicit {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config '{}'", path.display()))?;
            Self::from_json_str(&raw)
                .with_context(|| format!("invalid config '{}'", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(token) = std::env::var(API_TOKEN_ENV)
            && !token.trim().is_empty()
        {
            config.marketplace.api_token = Some(token);
        }
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.sync.validate()?;
        if config.marketplace.timeout_secs == 0 {
            bail!("marketplace.timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    pub fn require_marketplace(&self) -> Result<&MarketplaceConfig> {
        if self.marketplace.endpoint.trim().is_empty() {
            bail!("marketplace.endpoint is not configured");
        }
        Ok(&self.marketplace)
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("turkbridge.sqlite3")
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.require_marketplace().is_err());
    }

    #[test]
    fn nested_sections_are_read() {
        let config = AppConfig::from_json_str(
            r#"{
                "database_path": "/var/lib/turkbridge/tasks.sqlite3",
                "marketplace": { "endpoint": "http://gateway:8080", "timeout_secs": 5 },
                "sync": { "reward": 0.25, "approval_note": "Thanks" }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.database_path.to_str(),
            Some("/var/lib/turkbridge/tasks.sqlite3")
        );
        assert_eq!(
            config.require_marketplace().unwrap().endpoint,
            "http://gateway:8080"
        );
        assert_eq!(config.marketplace.timeout_secs, 5);
        assert_eq!(config.sync.reward, 0.25);
        assert_eq!(config.sync.approval_note, "Thanks");
        assert_eq!(config.sync.title, "Question From DICE");
    }

    #[test]
    fn invalid_sync_settings_are_rejected() {
        assert!(AppConfig::from_json_str(r#"{ "sync": { "reward": -1 } }"#).is_err());
        assert!(
            AppConfig::from_json_str(r#"{ "marketplace": { "timeout_secs": 0 } }"#).is_err()
        );
        assert!(AppConfig::from_json_str(r#"{ "databse_path": "x" }"#).is_err());
    }
}
