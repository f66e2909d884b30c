use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Overrides `system_secret` from the YAML file
pub const SYSTEM_SECRET_ENV: &str = "POOL_LEDGER_SYSTEM_SECRET";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub postgres_url: String,
    #[serde(default)]
    pub postgres_max_connections: Option<u32>,
    /// HMAC key for system-signed compensating transfers
    #[serde(default)]
    pub system_secret: String,
    #[serde(default)]
    pub sweeper: SweeperSettings,
    #[serde(default)]
    pub authorizer: AuthorizerSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweeperSettings {
    pub scan_interval_secs: u64,
    pub batch_size: usize,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            batch_size: 100,
        }
    }
}

impl SweeperSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthorizerSettings {
    pub default_deadline_ms: u64,
}

impl Default for AuthorizerSettings {
    fn default() -> Self {
        Self {
            default_deadline_ms: 5_000,
        }
    }
}

impl AuthorizerSettings {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationSettings {
    pub channel_capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`, then apply environment overrides
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;

        if let Ok(secret) = std::env::var(SYSTEM_SECRET_ENV)
            && !secret.is_empty()
        {
            config.system_secret = secret;
        }
        if config.system_secret.is_empty() {
            bail!("system_secret is not set (config or {})", SYSTEM_SECRET_ENV);
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
