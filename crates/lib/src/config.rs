//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.logrelay/config.json`) and environment.
//! Environment variables override the file. [`resolve_settings`] turns both into the
//! immutable [`Settings`] the relay runs with.

use crate::channels::DEFAULT_TELEGRAM_API_BASE;
use crate::inject::{Multiplexer, SessionTarget, DEFAULT_INJECT_TIMEOUT};
use crate::policy::{AllowList, CommandMode, CommandPolicy};
use crate::tail::{TailConfig, DEFAULT_BUFFER_LINES, DEFAULT_POLL_INTERVAL};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_CONFIG_PATH: &str = "LOGRELAY_CONFIG_PATH";
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_LOG_PATH: &str = "MC_LOG_PATH";
pub const ENV_API_BACKEND: &str = "TG_API_BACKEND";
pub const ENV_RECIPIENTS: &str = "LOGRELAY_RECIPIENTS";
pub const ENV_ADMINS: &str = "LOGRELAY_ADMINS";
pub const ENV_SESSION: &str = "LOGRELAY_SESSION";
pub const ENV_COMMAND_MODE: &str = "LOGRELAY_COMMAND_MODE";
pub const ENV_START_SCRIPT: &str = "LOGRELAY_START_SCRIPT";

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub tail: TailFileConfig,

    /// Chat ids that receive every tailed line.
    #[serde(default)]
    pub recipients: Vec<i64>,

    /// Sender ids allowed to issue commands. Defaults to `recipients` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admins: Option<Vec<i64>>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub commands: CommandsConfig,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Bot API base URL. Overridden by TG_API_BACKEND env when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// getUpdates long-poll timeout in seconds (default 60).
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout_secs() -> u64 {
    60
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: None,
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// Followed log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailFileConfig {
    /// Path of the log file. Overridden by MC_LOG_PATH env when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_buffer_lines")]
    pub buffer_lines: usize,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_buffer_lines() -> usize {
    DEFAULT_BUFFER_LINES
}

impl Default for TailFileConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: default_poll_interval_ms(),
            buffer_lines: default_buffer_lines(),
        }
    }
}

/// Target session for command injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Session name (default "mc"). Overridden by LOGRELAY_SESSION env when set.
    #[serde(default = "default_session_name")]
    pub name: String,
    #[serde(default)]
    pub pane: u32,
    #[serde(default)]
    pub multiplexer: Multiplexer,
    #[serde(default = "default_inject_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_session_name() -> String {
    "mc".to_string()
}

fn default_inject_timeout_secs() -> u64 {
    DEFAULT_INJECT_TIMEOUT.as_secs()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            pane: 0,
            multiplexer: Multiplexer::default(),
            timeout_secs: default_inject_timeout_secs(),
        }
    }
}

/// Command handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    /// "basic" injects every authorized command; "extended" adds the reserved help/restart handling.
    #[serde(default)]
    pub mode: CommandMode,
    /// Directive injected to stop the process on restart (default "stop").
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Script whose path is injected to start the process again on restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_script: Option<PathBuf>,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_restart_delay_secs() -> u64 {
    20
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            mode: CommandMode::default(),
            stop_command: default_stop_command(),
            start_script: None,
            restart_delay_secs: default_restart_delay_secs(),
        }
    }
}

/// Stop / wait / start sequence for the reserved `restart` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    pub stop_command: String,
    /// `None` when no start script is configured; restart is then refused.
    pub start_command: Option<String>,
    pub delay: Duration,
}

impl Default for RestartPlan {
    fn default() -> Self {
        Self {
            stop_command: default_stop_command(),
            start_command: None,
            delay: Duration::from_secs(default_restart_delay_secs()),
        }
    }
}

/// Fully resolved, immutable runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    pub api_base: String,
    /// True when the API base came from config or env rather than the default.
    pub custom_api_base: bool,
    pub poll_timeout: Duration,
    pub log_path: PathBuf,
    pub tail: TailConfig,
    pub recipients: Vec<i64>,
    pub policy: CommandPolicy,
    pub session: SessionTarget,
    pub restart: RestartPlan,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("invalid chat id {value:?} in {source_name}")]
    InvalidId { source_name: String, value: String },
    #[error("invalid {source_name}: {message}")]
    Invalid { source_name: String, message: String },
}

/// Resolve settings from `config` and the process environment.
pub fn resolve_settings(config: &Config) -> Result<Settings, ConfigError> {
    resolve_settings_with(config, |key| std::env::var(key).ok())
}

/// Resolve settings from `config` and an environment lookup. Env values that are empty
/// after trimming count as unset. Every missing required item is reported at once.
pub fn resolve_settings_with<F>(config: &Config, env: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_value = |key: &str| {
        env(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let bot_token = env_value(ENV_BOT_TOKEN).or_else(|| non_empty(config.telegram.bot_token.as_deref()));
    let log_path = env_value(ENV_LOG_PATH)
        .map(PathBuf::from)
        .or_else(|| config.tail.path.clone().filter(|p| !p.as_os_str().is_empty()));
    let recipients = match env_value(ENV_RECIPIENTS) {
        Some(raw) => parse_ids(ENV_RECIPIENTS, &raw)?,
        None => config.recipients.clone(),
    };

    let mut missing = Vec::new();
    if bot_token.is_none() {
        missing.push(format!("bot token ({} or telegram.botToken)", ENV_BOT_TOKEN));
    }
    if log_path.is_none() {
        missing.push(format!("log file path ({} or tail.path)", ENV_LOG_PATH));
    }
    if recipients.is_empty() {
        missing.push(format!("recipients ({} or recipients)", ENV_RECIPIENTS));
    }
    let (Some(bot_token), Some(log_path)) = (bot_token, log_path) else {
        return Err(ConfigError::Missing(missing));
    };
    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    let admins = match env_value(ENV_ADMINS) {
        Some(raw) => parse_ids(ENV_ADMINS, &raw)?,
        None => config.admins.clone().unwrap_or_else(|| recipients.clone()),
    };
    let mode = match env_value(ENV_COMMAND_MODE) {
        Some(raw) => raw.parse::<CommandMode>().map_err(|message| ConfigError::Invalid {
            source_name: ENV_COMMAND_MODE.to_string(),
            message,
        })?,
        None => config.commands.mode,
    };

    let api_base_override =
        env_value(ENV_API_BACKEND).or_else(|| non_empty(config.telegram.api_base.as_deref()));
    let custom_api_base = api_base_override.is_some();
    let api_base = api_base_override.unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string());

    let session_name = env_value(ENV_SESSION).unwrap_or_else(|| config.session.name.clone());
    if session_name.trim().is_empty() {
        return Err(ConfigError::Invalid {
            source_name: "session.name".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    let start_script = env_value(ENV_START_SCRIPT)
        .map(PathBuf::from)
        .or_else(|| config.commands.start_script.clone())
        .filter(|p| !p.as_os_str().is_empty());

    let allow = AllowList::new(admins);
    if allow.is_empty() {
        return Err(ConfigError::Invalid {
            source_name: "admins".to_string(),
            message: "must list at least one sender id".to_string(),
        });
    }

    Ok(Settings {
        bot_token,
        api_base,
        custom_api_base,
        poll_timeout: Duration::from_secs(config.telegram.poll_timeout_secs),
        log_path,
        tail: TailConfig {
            buffer_lines: config.tail.buffer_lines.max(1),
            poll_interval: Duration::from_millis(config.tail.poll_interval_ms.max(1)),
        },
        recipients,
        policy: CommandPolicy::new(allow, mode),
        session: SessionTarget {
            name: session_name,
            pane: config.session.pane,
            multiplexer: config.session.multiplexer,
            timeout: Duration::from_secs(config.session.timeout_secs.max(1)),
        },
        restart: RestartPlan {
            stop_command: config.commands.stop_command.clone(),
            start_command: start_script.map(|p| p.display().to_string()),
            delay: Duration::from_secs(config.commands.restart_delay_secs),
        },
    })
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse a comma-separated list of chat ids.
fn parse_ids(source_name: &str, raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| ConfigError::InvalidId {
                source_name: source_name.to_string(),
                value: s.to_string(),
            })
        })
        .collect()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".logrelay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or LOGRELAY_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write a default config file if none exists. Returns true when a file was written.
pub fn init_config_file(path: &std::path::Path) -> Result<bool> {
    if path.exists() {
        log::debug!("config already exists at {}, skipping", path.display());
        return Ok(false);
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let body = serde_json::to_string_pretty(&Config::default())?;
    std::fs::write(path, body)
        .with_context(|| format!("writing default config to {}", path.display()))?;
    log::info!("created default config at {}", path.display());
    Ok(true)
}
