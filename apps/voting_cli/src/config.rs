use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::ClientConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "voting.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub registry_url: Option<String>,
    pub accounts: Vec<String>,
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            registry_url: None,
            accounts: Vec::new(),
            confirmation_timeout_secs: client.confirmation_timeout.as_secs(),
            receipt_poll_interval_ms: client.receipt_poll_interval.as_millis() as u64,
        }
    }
}

impl Settings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_ms.max(1)),
            ..ClientConfig::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    registry_url: Option<String>,
    accounts: Option<Vec<String>>,
    confirmation_timeout_secs: Option<u64>,
    receipt_poll_interval_ms: Option<u64>,
}

/// Reads `path` (or `voting.toml` when absent) and then the environment.
///
/// A missing default file is fine; a missing explicit `--config` file is not.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if explicit => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.registry_url {
        settings.registry_url = Some(v);
    }
    if let Some(v) = file.accounts {
        settings.accounts = v;
    }
    if let Some(v) = file.confirmation_timeout_secs {
        settings.confirmation_timeout_secs = v;
    }
    if let Some(v) = file.receipt_poll_interval_ms {
        settings.receipt_poll_interval_ms = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("VOTING_REGISTRY_URL") {
        settings.registry_url = Some(v);
    }
    if let Some(v) = var("APP__REGISTRY_URL") {
        settings.registry_url = Some(v);
    }

    if let Some(v) = var("VOTING_ACCOUNTS") {
        settings.accounts = v
            .split(',')
            .map(str::trim)
            .filter(|account| !account.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(v) = var("APP__CONFIRMATION_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.confirmation_timeout_secs = parsed;
        }
    }
    if let Some(v) = var("APP__RECEIPT_POLL_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.receipt_poll_interval_ms = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
