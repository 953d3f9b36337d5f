use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::ReconnectPolicy;
use serde::Deserialize;
use shared::domain::ConnectionTarget;

const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub token: String,
    pub database_url: String,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            server_url: String::new(),
            token: String::new(),
            database_url: "sqlite://./data/client.db".into(),
            reconnect_base_delay_ms: policy.base_delay.as_millis() as u64,
            max_reconnect_attempts: policy.max_attempts,
            connect_timeout_secs: 10,
        }
    }
}

impl Settings {
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(self.server_url.trim(), self.token.trim())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            ..ReconnectPolicy::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    token: Option<String>,
    database_url: Option<String>,
    reconnect_base_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    connect_timeout_secs: Option<u64>,
}

/// Defaults, then `client.toml` (or `config_path`), then `APP__*` variables.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with(config_path, |key| std::env::var(key).ok())
}

pub(crate) fn load_settings_with(
    config_path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let raw = match config_path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).ok(),
    };
    if let Some(raw) = raw {
        let file_cfg: FileSettings = toml::from_str(&raw).context("invalid client config")?;
        apply_file(&mut settings, file_cfg);
    }

    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__TOKEN") {
        settings.token = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(parsed) = env("APP__RECONNECT_BASE_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_base_delay_ms = parsed;
    }
    if let Some(parsed) = env("APP__MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.max_reconnect_attempts = parsed;
    }
    if let Some(parsed) = env("APP__CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        settings.connect_timeout_secs = parsed;
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.token {
        settings.token = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.reconnect_base_delay_ms {
        settings.reconnect_base_delay_ms = v;
    }
    if let Some(v) = file_cfg.max_reconnect_attempts {
        settings.max_reconnect_attempts = v;
    }
    if let Some(v) = file_cfg.connect_timeout_secs {
        settings.connect_timeout_secs = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
