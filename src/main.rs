//! ferry CLI entry point.
//!
//! Provides `start` (run the bridge), `queue` (list pending deliveries), and
//! `check-config` (validate configuration and probe the WhatsApp bridge).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tracing::{info, warn};

use ferry::config::{self, load_config, Config, RuntimePaths, SettingsHandle};
use ferry::forward::dispatch::Dispatcher;
use ferry::forward::queue::{DeliveryQueue, JsonFileStore, QueueStore};
use ferry::forward::{flush_on_ready, Forwarder};
use ferry::telegram::media::TelegramFetcher;
use ferry::telegram::normalize::Normalizer;
use ferry::whatsapp::client::WhatsAppClient;
use ferry::whatsapp::events::spawn_session;
use ferry::whatsapp::state::ConnectionTracker;
use ferry::whatsapp::Destination;

/// Forward Telegram channel posts to a WhatsApp group.
#[derive(Parser)]
#[command(name = "ferry", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the forwarder until Ctrl+C.
    Start,
    /// List deliveries still waiting in the queue.
    Queue,
    /// Validate the configuration and probe the WhatsApp bridge.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = config::runtime_paths()?;

    // Secrets live next to the config; a missing .env is fine.
    if paths.env_file.exists() {
        dotenvy::from_path(&paths.env_file)
            .with_context(|| format!("failed to read {}", paths.env_file.display()))?;
    }

    match cli.command {
        Command::Start => handle_start(&paths).await,
        Command::Queue => handle_queue(&paths).await,
        Command::CheckConfig => handle_check_config(&paths).await,
    }
}

/// Run the bridge.
async fn handle_start(paths: &RuntimePaths) -> anyhow::Result<()> {
    let _logging_guard = ferry::logging::init_production(&paths.logs_dir)?;

    let config = load_config(&paths.config_toml)
        .with_context(|| format!("failed to load {}", paths.config_toml.display()))?;
    let token = std::env::var(&config.telegram.bot_token_env).with_context(|| {
        format!(
            "Telegram bot token not set; export {} or add it to {}",
            config.telegram.bot_token_env,
            paths.env_file.display()
        )
    })?;
    warn_on_incomplete(&config);

    let queue_path = config.queue_path(paths);
    let bridge_url = config.whatsapp.bridge_url.clone();
    let reconnect_delay = Duration::from_millis(config.whatsapp.reconnect_delay_ms);

    let settings = SettingsHandle::new(config);
    let _config_watcher = config::watch_config(paths.config_toml.clone(), settings.clone())
        .context("failed to watch config file")?;

    let store: Arc<dyn QueueStore> = Arc::new(JsonFileStore::new(&queue_path));
    let queue = Arc::new(
        DeliveryQueue::open(store, settings.clone())
            .await
            .with_context(|| format!("failed to open delivery queue {}", queue_path.display()))?,
    );

    let client = WhatsAppClient::new(bridge_url);
    let destination: Arc<dyn Destination> = Arc::new(client.clone());
    let tracker = Arc::new(ConnectionTracker::new());
    flush_on_ready(&tracker, Arc::clone(&queue), Arc::clone(&destination));

    let bot = Bot::new(token);
    let fetcher = Arc::new(TelegramFetcher::new(bot.clone()));
    let normalizer = Arc::new(Normalizer::new(fetcher, settings.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        destination,
        Arc::clone(&tracker),
        Arc::clone(&queue),
        settings.clone(),
    ));
    let forwarder = Arc::new(Forwarder::new(settings, normalizer, dispatcher));

    let session = spawn_session(client, Arc::clone(&tracker), reconnect_delay);

    info!(
        queue = %queue_path.display(),
        pending = queue.len().await,
        "ferry started"
    );

    let result = ferry::telegram::run_telegram(bot, Arc::clone(&forwarder)).await;
    let forwarder_albums_pending = forwarder.albums().pending_albums();

    session.abort();
    info!(
        pending = queue.len().await,
        albums_in_flight = forwarder_albums_pending,
        "ferry stopped"
    );
    result
}

/// Print pending queue entries.
async fn handle_queue(paths: &RuntimePaths) -> anyhow::Result<()> {
    ferry::logging::init_cli();

    let config = load_config(&paths.config_toml)?;
    let queue_path = config.queue_path(paths);
    let entries = JsonFileStore::new(&queue_path)
        .load()
        .await
        .with_context(|| format!("failed to read {}", queue_path.display()))?;

    if entries.is_empty() {
        println!("queue is empty ({})", queue_path.display());
        return Ok(());
    }

    println!("{} pending ({})", entries.len(), queue_path.display());
    for entry in &entries {
        let preview: String = entry.payload.text.chars().take(60).collect();
        let media = entry
            .payload
            .media
            .as_ref()
            .map(|m| format!(" [{}]", m.mime_type))
            .unwrap_or_default();
        println!(
            "{}  {}  retries={}  -> {}{}  {:?}",
            entry.id,
            entry.created_at.to_rfc3339(),
            entry.retries,
            entry.destination,
            media,
            preview
        );
    }
    Ok(())
}

/// Validate config and probe the bridge.
async fn handle_check_config(paths: &RuntimePaths) -> anyhow::Result<()> {
    ferry::logging::init_cli();

    let config = load_config(&paths.config_toml)
        .with_context(|| format!("failed to load {}", paths.config_toml.display()))?;
    println!("config: {}", paths.config_toml.display());
    println!("queue:  {}", config.queue_path(paths).display());
    println!(
        "destination: {}",
        config.whatsapp.destination().unwrap_or("(unset)")
    );
    println!("allowed channels: {:?}", config.telegram.allowed_channels);
    println!(
        "bot token ({}): {}",
        config.telegram.bot_token_env,
        if std::env::var(&config.telegram.bot_token_env).is_ok() {
            "set"
        } else {
            "missing"
        }
    );
    warn_on_incomplete(&config);

    let client = WhatsAppClient::new(config.whatsapp.bridge_url.clone());
    match client.status().await {
        Ok(status) if status.connected => println!(
            "bridge {}: connected ({})",
            client.base_url(),
            status.phone_number.as_deref().unwrap_or("unknown number")
        ),
        Ok(_) => println!("bridge {}: up, not linked", client.base_url()),
        Err(e) => println!("bridge {}: {e}", client.base_url()),
    }
    Ok(())
}

fn warn_on_incomplete(config: &Config) {
    if config.whatsapp.destination().is_none() {
        warn!("whatsapp.destination is not set; messages will be dropped until it is");
    }
    if config.telegram.allowed_channels.is_empty() {
        warn!("telegram.allowed_channels is empty; nothing will be forwarded");
    }
}
