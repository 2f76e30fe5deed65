use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub web: WebConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the third-party EPG provider
    pub base_url: String,
    /// Shared secret carried on every upstream call
    pub secret: String,
    pub request_timeout_secs: u64,
    /// Responses shorter than this are treated as malformed
    pub min_body_bytes: usize,
    /// Bounded attempt count for catalog/schedule fetches
    pub fetch_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub catalog_interval_secs: u64,
    pub catalog_retry_secs: u64,
    pub schedule_interval_secs: u64,
    pub schedule_retry_secs: u64,
    pub update_poll_secs: u64,
    pub lock_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: "http://localhost:9000/EPG".to_string(),
                secret: "changeme".to_string(),
                request_timeout_secs: 20,
                min_body_bytes: 64,
                fetch_attempts: 3,
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 10010,
            },
            refresh: RefreshConfig {
                catalog_interval_secs: 12 * 60 * 60,
                catalog_retry_secs: 10,
                schedule_interval_secs: 60 * 60,
                schedule_retry_secs: 30,
                update_poll_secs: 5 * 60,
                lock_timeout_secs: 3,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RefreshConfig {
    pub fn catalog_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_interval_secs)
    }

    pub fn catalog_retry(&self) -> Duration {
        Duration::from_secs(self.catalog_retry_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn schedule_retry(&self) -> Duration {
        Duration::from_secs(self.schedule_retry_secs)
    }

    pub fn update_poll(&self) -> Duration {
        Duration::from_secs(self.update_poll_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
