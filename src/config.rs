//! Configuration loading, environment overrides and hot reload.
//!
//! `config.toml` lives in `~/.ferry/` (or wherever `$FERRY_CONFIG` points).
//! Precedence: env vars > config file > defaults. The running process holds
//! the parsed config in a [`SettingsHandle`]; components take a fresh
//! snapshot per operation so edits picked up by [`watch_config`] apply
//! without a restart.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telegram source settings.
    pub telegram: TelegramConfig,
    /// WhatsApp destination settings.
    pub whatsapp: WhatsAppConfig,
    /// Message shaping and album handling.
    pub forwarding: ForwardingConfig,
    /// Delivery queue persistence and retry policy.
    pub queue: QueueConfig,
}

/// Telegram-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Environment variable name holding the bot token.
    pub bot_token_env: String,

    /// Channel and group chat ids whose posts are forwarded.
    ///
    /// Empty means nothing is forwarded.
    pub allowed_channels: Vec<i64>,
}

impl TelegramConfig {
    /// Whether posts from `chat_id` should be forwarded.
    pub fn allows(&self, chat_id: i64) -> bool {
        self.allowed_channels.contains(&chat_id)
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: "FERRY_TELEGRAM_TOKEN".to_owned(),
            allowed_channels: Vec::new(),
        }
    }
}

/// WhatsApp bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Base URL of the WhatsApp bridge sidecar.
    pub bridge_url: String,

    /// Group JID that receives forwarded messages.
    pub destination: Option<String>,

    /// Fixed delay before reconnecting after the session drops.
    pub reconnect_delay_ms: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: format!(
                "http://127.0.0.1:{}",
                crate::whatsapp::client::DEFAULT_BRIDGE_PORT
            ),
            destination: None,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl WhatsAppConfig {
    /// The destination JID, treating a blank string as unset.
    pub fn destination(&self) -> Option<&str> {
        self.destination
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Message shaping configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Text appended after a blank line to every forwarded payload.
    pub footer_text: String,

    /// Quiet period after the last album member before the album is sent.
    pub album_debounce_ms: u64,

    /// Delay between starting consecutive sends within one album.
    pub album_pacing_ms: u64,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            footer_text: String::new(),
            album_debounce_ms: 2_000,
            album_pacing_ms: 120,
        }
    }
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue file location. Defaults to `~/.ferry/queue.json`.
    pub path: Option<PathBuf>,

    /// Failed attempts after which an entry is abandoned.
    pub max_retries: u32,

    /// Backoff base for the first retry.
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single backoff.
    pub retry_cap_ms: u64,

    /// Pause after each successful send during a flush.
    pub inter_message_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_retries: 10,
            retry_base_delay_ms: 1_000,
            retry_cap_ms: 30_000,
            inter_message_delay_ms: 1_500,
        }
    }
}

impl Config {
    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("FERRY_WHATSAPP_DESTINATION") {
            self.whatsapp.destination = Some(v);
        }
        if let Some(v) = env("FERRY_BRIDGE_URL") {
            self.whatsapp.bridge_url = v;
        }
        if let Some(v) = env("FERRY_FOOTER_TEXT") {
            self.forwarding.footer_text = v;
        }
        if let Some(v) = env("FERRY_MAX_RETRIES") {
            match v.parse() {
                Ok(n) => self.queue.max_retries = n,
                Err(_) => warn!(
                    var = "FERRY_MAX_RETRIES",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Resolve the queue file, falling back to the runtime default.
    pub fn queue_path(&self, paths: &RuntimePaths) -> PathBuf {
        self.queue
            .path
            .clone()
            .unwrap_or_else(|| paths.queue_file.clone())
    }
}

/// Load config from a TOML file and apply process env overrides.
///
/// A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => Config::from_toml(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

// ---------------------------------------------------------------------------
// Runtime paths
// ---------------------------------------------------------------------------

/// Filesystem locations used by the running process.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// `~/.ferry/`
    pub root: PathBuf,
    /// Config file (overridable with `$FERRY_CONFIG`).
    pub config_toml: PathBuf,
    /// `.env` holding the bot token.
    pub env_file: PathBuf,
    /// Rotated JSON logs.
    pub logs_dir: PathBuf,
    /// Default delivery queue file.
    pub queue_file: PathBuf,
}

/// Resolve the default config directory (`~/.ferry/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".ferry"))
}

/// Resolve all runtime paths.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    runtime_paths_with(|key| std::env::var(key).ok())
}

/// Resolve runtime paths using a custom env resolver.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<RuntimePaths> {
    let root = config_dir()?;
    let config_toml = env("FERRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join("config.toml"));
    Ok(RuntimePaths {
        config_toml,
        env_file: root.join(".env"),
        logs_dir: root.join("logs"),
        queue_file: root.join("queue.json"),
        root,
    })
}

// ---------------------------------------------------------------------------
// Hot-reloadable snapshot
// ---------------------------------------------------------------------------

/// Shared, swappable config snapshot.
///
/// Readers call [`SettingsHandle::snapshot`] once per operation and work
/// against that value; a reload never changes a snapshot already taken.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<Config>>>,
}

impl SettingsHandle {
    /// Wrap an initial config.
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The config in effect right now.
    pub fn snapshot(&self) -> Arc<Config> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the config for all subsequent snapshots.
    pub fn replace(&self, config: Config) {
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(config),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(config),
        }
    }
}

/// Watch `path` and swap a freshly parsed config into `handle` on change.
///
/// Parse failures keep the previous config and log a warning. The returned
/// watcher must be kept alive for notifications to continue.
///
/// # Errors
///
/// Returns an error if the watcher cannot be created or the parent
/// directory cannot be watched.
pub fn watch_config(path: PathBuf, handle: SettingsHandle) -> anyhow::Result<RecommendedWatcher> {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(evt) = event {
            if evt.kind.is_access() {
                return;
            }
            for changed in evt.paths {
                if let Err(e) = tx.send(changed) {
                    warn!(error = %e, "failed to send config watcher event");
                }
            }
        }
    })?;

    // Editors often replace the file, so watch the directory instead.
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if dir.is_dir() {
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    }

    std::thread::spawn(move || {
        while let Ok(changed) = rx.recv() {
            if changed.file_name() != path.file_name() {
                continue;
            }
            debug!(path = %path.display(), "config file changed");
            match load_config(&path) {
                Ok(config) => {
                    handle.replace(config);
                    info!(path = %path.display(), "config reloaded");
                }
                Err(e) => warn!(error = %e, "config reload failed, keeping previous"),
            }
        }
    });

    Ok(watcher)
}
