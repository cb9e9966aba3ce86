//! Configuration loading and validation.
//!
//! Loads switchboard configuration from `./switchboard.toml` (or
//! `$SWITCHBOARD_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults. Configuration is fully validated before
//! any adapter connect runs — partial credentials fail fast.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Agent backend settings (`[agent]`).
    pub agent: AgentConfig,
    /// Telegram adapter settings (`[telegram]`).
    pub telegram: TelegramSection,
    /// Zalo adapter settings (`[zalo]`).
    pub zalo: ZaloSection,
}

/// Agent backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the agent HTTP API.
    pub base_url: String,
    /// Bypass the agent and echo input back (testing aid).
    pub echo_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_owned(),
            echo_mode: false,
        }
    }
}

/// Telegram adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    /// Whether the Telegram adapter starts.
    pub enabled: bool,
    /// Bot API token.
    pub bot_token: String,
    /// Long-poll timeout for `getUpdates`, in seconds.
    pub poll_timeout_seconds: u32,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            poll_timeout_seconds: 30,
        }
    }
}

/// Zalo adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZaloSection {
    /// Whether the Zalo adapter starts.
    pub enabled: bool,
    /// Base URL of the session bridge.
    pub base_url: String,
    /// Session cookie.
    pub cookie: String,
    /// Device IMEI the session was registered with.
    pub imei: String,
    /// User-agent string the session was registered with.
    pub user_agent: String,
}

impl Default for ZaloSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:3002".to_owned(),
            cookie: String::new(),
            imei: String::new(),
            user_agent: String::new(),
        }
    }
}

impl SwitchboardConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$SWITCHBOARD_CONFIG_PATH` or `./switchboard.toml`.
    /// A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from_path(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific TOML file, no env overrides. A missing file
    /// yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                info!(path = %path.display(), "loading config from file");
                let config: SwitchboardConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no config file found, using defaults");
                Ok(SwitchboardConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("SWITCHBOARD_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("switchboard.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SWITCHBOARD_AGENT_URL") {
            self.agent.base_url = v;
        }
        if let Some(v) = env("SWITCHBOARD_ECHO_MODE") {
            match v.parse() {
                Ok(b) => self.agent.echo_mode = b,
                Err(_) => warn!(
                    var = "SWITCHBOARD_ECHO_MODE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Telegram — token presence enables the adapter.
        if let Some(v) = env("SWITCHBOARD_TELEGRAM_TOKEN") {
            self.telegram.bot_token = v;
            self.telegram.enabled = true;
        }
        if let Some(v) = env("SWITCHBOARD_TELEGRAM_POLL_TIMEOUT") {
            match v.parse() {
                Ok(n) => self.telegram.poll_timeout_seconds = n,
                Err(_) => warn!(
                    var = "SWITCHBOARD_TELEGRAM_POLL_TIMEOUT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Zalo — cookie presence enables the adapter.
        if let Some(v) = env("SWITCHBOARD_ZALO_URL") {
            self.zalo.base_url = v;
        }
        if let Some(v) = env("SWITCHBOARD_ZALO_COOKIE") {
            self.zalo.cookie = v;
            self.zalo.enabled = true;
        }
        if let Some(v) = env("SWITCHBOARD_ZALO_IMEI") {
            self.zalo.imei = v;
        }
        if let Some(v) = env("SWITCHBOARD_ZALO_USER_AGENT") {
            self.zalo.user_agent = v;
        }
    }

    /// Fail fast on partial or missing credentials, before any network
    /// call is made.
    pub fn validate(&self) -> Result<()> {
        if !self.telegram.enabled && !self.zalo.enabled {
            anyhow::bail!("no platform enabled: set [telegram] or [zalo] in the config");
        }
        if self.telegram.enabled && self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("[telegram] enabled but bot_token is empty");
        }
        if self.zalo.enabled {
            for (name, value) in [
                ("cookie", &self.zalo.cookie),
                ("imei", &self.zalo.imei),
                ("user_agent", &self.zalo.user_agent),
            ] {
                if value.trim().is_empty() {
                    anyhow::bail!("[zalo] enabled but {name} is empty");
                }
            }
        }
        Ok(())
    }
}
