//! Configuration for the Galaxy SIA receiver.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SIA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sia/config.toml
//!   3. ~/.config/sia/config.toml

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::text::CharMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiaConfig {
    pub listener: ListenerConfig,
    pub ip_check: IpCheckConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
    pub routing: HashMap<String, TopicConfig>,
    pub priorities: PriorityConfig,
    pub char_map: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Idle-read timeout, no bytes received from the panel in this long.
    pub read_timeout_secs: u64,
    /// Write timeout for a single response block.
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpCheckConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Max queued notifications before the oldest is dropped.
    pub max_size: usize,
    pub max_retries: u32,
    /// Retry backoff ceiling, in minutes.
    pub max_retry_time_minutes: u64,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for the rolling log file. Empty = stderr only.
    pub directory: String,
}

/// Per-account routing target. The account `"default"` entry is used for
/// any account with no specific entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub site_name: String,
    pub ntfy_enabled: bool,
    pub ntfy_topic_url: String,
    pub ntfy_title: String,
    pub ntfy_auth: AuthMethod,
    pub ntfy_token: String,
    pub ntfy_user: String,
    pub ntfy_pass: String,
}

/// Which credentials (if any) accompany the push to `ntfy_topic_url`.
/// `token` adds a bearer `Authorization` header, `userpass` sends HTTP
/// Basic; `none` sends no credentials at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    None,
    Token,
    Userpass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub by_event_code: HashMap<String, u8>,
    pub default_priority: u8,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for SiaConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            ip_check: IpCheckConfig::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
            routing: HashMap::new(),
            priorities: PriorityConfig::default(),
            char_map: HashMap::new(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 10000,
            read_timeout_secs: 30,
            write_timeout_secs: 5,
        }
    }
}

impl Default for IpCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: "0.0.0.0".to_string(),
            port: 10001,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            max_retries: 0,
            max_retry_time_minutes: 60,
            http_timeout_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: String::new(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            site_name: String::new(),
            ntfy_enabled: false,
            ntfy_topic_url: String::new(),
            ntfy_title: "Alarm Event".to_string(),
            ntfy_auth: AuthMethod::default(),
            ntfy_token: String::new(),
            ntfy_user: String::new(),
            ntfy_pass: String::new(),
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            by_event_code: HashMap::new(),
            default_priority: 3,
        }
    }
}

impl SiaConfig {
    /// Routing target for `account`: the account's own entry if one exists
    /// and has `ntfy_enabled = true`, else the `"default"` entry if *it*
    /// is enabled, else a bare `TopicConfig::default()` (disabled, so
    /// nothing is sent). An explicitly-configured-but-disabled account
    /// still falls through to an enabled default rather than being stuck
    /// with its own disabled entry.
    pub fn topic_config(&self, account: &str) -> TopicConfig {
        self.routing
            .get(account)
            .filter(|t| t.ntfy_enabled)
            .or_else(|| self.routing.get("default").filter(|t| t.ntfy_enabled))
            .cloned()
            .unwrap_or_default()
    }

    /// Notification priority for an event code.
    pub fn priority(&self, event_code: Option<&str>) -> u8 {
        event_code
            .and_then(|code| self.priorities.by_event_code.get(code))
            .copied()
            .unwrap_or(self.priorities.default_priority)
    }

    /// Build the character map: defaults overridden by any `char_map`
    /// entries from config, keyed as a two-hex-digit string (`"84"`).
    pub fn char_map(&self) -> CharMap {
        let mut map = CharMap::default();
        for (key, value) in &self.char_map {
            if let (Ok(byte), Some(ch)) = (u8::from_str_radix(key, 16), value.chars().next()) {
                map.insert(byte, ch);
            }
        }
        map
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("sia")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl SiaConfig {
    /// Check the bounds placed on the dispatch queue and the 1..5 range on
    /// priorities. Called once at startup; a failure here is fatal, since a
    /// receiver with a nonsensical queue size or priority would misbehave
    /// silently rather than fail loudly later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.queue.max_size) {
            return Err(ConfigError::Validation(format!(
                "queue.max_size must be in 1..=1000, got {}",
                self.queue.max_size
            )));
        }
        if !(1..=1000).contains(&self.queue.max_retry_time_minutes) {
            return Err(ConfigError::Validation(format!(
                "queue.max_retry_time_minutes must be in 1..=1000, got {}",
                self.queue.max_retry_time_minutes
            )));
        }
        if !(1..=5).contains(&self.priorities.default_priority) {
            return Err(ConfigError::Validation(format!(
                "priorities.default_priority must be in 1..=5, got {}",
                self.priorities.default_priority
            )));
        }
        for (code, priority) in &self.priorities.by_event_code {
            if !(1..=5).contains(priority) {
                return Err(ConfigError::Validation(format!(
                    "priorities.{code} must be in 1..=5, got {priority}"
                )));
            }
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SiaConfig {
    /// Load config: file → env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SiaConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("SIA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SiaConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIA_LISTENER__PORT") {
            if let Ok(p) = v.parse() {
                self.listener.port = p;
            }
        }
        if let Ok(v) = std::env::var("SIA_LISTENER__BIND_ADDR") {
            self.listener.bind_addr = v;
        }
        if let Ok(v) = std::env::var("SIA_IP_CHECK__ENABLED") {
            self.ip_check.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SIA_QUEUE__MAX_SIZE") {
            if let Ok(n) = v.parse() {
                self.queue.max_size = n;
            }
        }
        if let Ok(v) = std::env::var("SIA_LOGGING__LEVEL") {
            self.logging.level = v;
        }
    }
}
