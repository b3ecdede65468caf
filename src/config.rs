use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use twelf::{Layer, config};

use crate::session::SessionSettings;

const CONFIG_FILE: &str = "storefront.yaml";
const ENV_PREFIX: &str = "STOREFRONT_";

fn default_db_connection_string() -> String {
    "sqlite://storefront.sqlite?mode=rwc".into()
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".into()
}

fn default_sync_debounce_ms() -> u64 {
    1000
}

fn default_save_interval_secs() -> u64 {
    5
}

fn default_close_flush_timeout_ms() -> u64 {
    2000
}

#[config]
#[derive(Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub base_url: String,
    /// Bearer token for the storefront API; sessions refuse to start without one.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Shown in the watermark of every session.
    #[serde(default)]
    pub user_label: String,
    #[serde(default = "default_db_connection_string")]
    pub db_connection_string: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    #[serde(default = "default_close_flush_timeout_ms")]
    pub close_flush_timeout_ms: u64,
}

impl Config {
    /// `storefront.yaml` (when present) overridden by `STOREFRONT_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut layers = Vec::with_capacity(2);
        if Path::new(CONFIG_FILE).exists() {
            layers.push(Layer::Yaml(CONFIG_FILE.into()));
        }
        layers.push(Layer::Env(Some(ENV_PREFIX.to_string())));
        Config::with_layers(&layers).with_context(|| "Failed to load configuration")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("STOREFRONT_BASE_URL is missing".into());
        }
        if self.sync_debounce_ms == 0 {
            return Err("STOREFRONT_SYNC_DEBOUNCE_MS must be positive".into());
        }
        if self.save_interval_secs == 0 {
            return Err("STOREFRONT_SAVE_INTERVAL_SECS must be positive".into());
        }
        if self.close_flush_timeout_ms == 0 {
            return Err("STOREFRONT_CLOSE_FLUSH_TIMEOUT_MS must be positive".into());
        }
        Ok(())
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            sync_debounce: Duration::from_millis(self.sync_debounce_ms),
            save_interval: Duration::from_secs(self.save_interval_secs),
            close_flush_timeout: Duration::from_millis(self.close_flush_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            base_url: "https://shop.example.com".into(),
            auth_token: Some("token".into()),
            user_label: "reader@example.com".into(),
            db_connection_string: default_db_connection_string(),
            bind_addr: default_bind_addr(),
            sync_debounce_ms: default_sync_debounce_ms(),
            save_interval_secs: default_save_interval_secs(),
            close_flush_timeout_ms: default_close_flush_timeout_ms(),
        }
    }

    #[test]
    fn defaults_validate() {
        let cfg = config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.session_settings(), SessionSettings::default());
    }

    #[test]
    fn rejects_missing_base_url_and_zero_intervals() {
        let mut cfg = config();
        cfg.base_url = " ".into();
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.save_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let mut cfg = config();
        cfg.auth_token = Some("  ".into());
        assert!(!cfg.has_auth_token());
    }
}
