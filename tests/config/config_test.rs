//! Coverage for config parsing, overrides, paths and hot reload.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ferry::config::{
    load_config, runtime_paths_with, watch_config, Config, SettingsHandle, WhatsAppConfig,
};

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_are_usable() {
    let config = Config::default();
    assert_eq!(config.telegram.bot_token_env, "FERRY_TELEGRAM_TOKEN");
    assert!(config.telegram.allowed_channels.is_empty());
    assert_eq!(config.whatsapp.bridge_url, "http://127.0.0.1:3001");
    assert_eq!(config.whatsapp.reconnect_delay_ms, 5_000);
    assert!(config.whatsapp.destination().is_none());
}

#[test]
fn full_config_parses() {
    let config = Config::from_toml(
        r#"
[telegram]
bot_token_env = "MY_TOKEN"
allowed_channels = [-1001, -1002]

[whatsapp]
bridge_url = "http://bridge:9000/"
destination = "123@g.us"
reconnect_delay_ms = 250

[forwarding]
footer_text = "via @news"
album_debounce_ms = 500
album_pacing_ms = 50

[queue]
path = "/var/lib/ferry/queue.json"
max_retries = 4
retry_base_delay_ms = 200
retry_cap_ms = 800
inter_message_delay_ms = 0
"#,
    )
    .expect("should parse");

    assert_eq!(config.telegram.bot_token_env, "MY_TOKEN");
    assert!(config.telegram.allows(-1002));
    assert!(!config.telegram.allows(-1003));
    assert_eq!(config.whatsapp.destination(), Some("123@g.us"));
    assert_eq!(config.forwarding.footer_text, "via @news");
    assert_eq!(config.forwarding.album_debounce_ms, 500);
    assert_eq!(config.queue.max_retries, 4);
    assert_eq!(config.queue.inter_message_delay_ms, 0);
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(Config::from_toml("[queue]\nmax_retries = \"many\"").is_err());
}

#[test]
fn blank_destination_counts_as_unset() {
    let whatsapp = WhatsAppConfig {
        destination: Some("  ".to_owned()),
        ..WhatsAppConfig::default()
    };
    assert!(whatsapp.destination().is_none());
}

#[test]
fn env_overrides_win_over_file() {
    let mut config = Config::from_toml(
        r#"
[whatsapp]
destination = "file@g.us"
[forwarding]
footer_text = "file footer"
"#,
    )
    .expect("parse");
    config.apply_overrides(env_of(&[
        ("FERRY_WHATSAPP_DESTINATION", "env@g.us"),
        ("FERRY_FOOTER_TEXT", "env footer"),
        ("FERRY_BRIDGE_URL", "http://10.0.0.2:3001"),
        ("FERRY_MAX_RETRIES", "7"),
    ]));

    assert_eq!(config.whatsapp.destination(), Some("env@g.us"));
    assert_eq!(config.forwarding.footer_text, "env footer");
    assert_eq!(config.whatsapp.bridge_url, "http://10.0.0.2:3001");
    assert_eq!(config.queue.max_retries, 7);
}

#[test]
fn invalid_numeric_override_is_ignored() {
    let mut config = Config::default();
    config.apply_overrides(env_of(&[("FERRY_MAX_RETRIES", "lots")]));
    assert_eq!(config.queue.max_retries, 10);
}

#[test]
fn runtime_paths_honour_config_override() {
    let paths = runtime_paths_with(env_of(&[("FERRY_CONFIG", "/etc/ferry.toml")]))
        .expect("paths");
    assert_eq!(paths.config_toml, std::path::PathBuf::from("/etc/ferry.toml"));
    assert!(paths.root.ends_with(".ferry"));
    assert!(paths.queue_file.ends_with("queue.json"));
    assert!(paths.env_file.ends_with(".env"));
}

#[test]
fn queue_path_falls_back_to_runtime_default() {
    let paths = runtime_paths_with(env_of(&[])).expect("paths");
    let mut config = Config::default();
    assert_eq!(config.queue_path(&paths), paths.queue_file);

    config.queue.path = Some("/tmp/q.json".into());
    assert_eq!(config.queue_path(&paths), std::path::PathBuf::from("/tmp/q.json"));
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load_config(&dir.path().join("absent.toml")).expect("defaults");
    assert_eq!(config.queue.max_retries, Config::default().queue.max_retries);
}

#[test]
fn snapshot_is_stable_across_replace() {
    let handle = SettingsHandle::new(Config::default());
    let before = handle.snapshot();

    let mut next = Config::default();
    next.forwarding.footer_text = "new".to_owned();
    handle.replace(next);

    assert!(before.forwarding.footer_text.is_empty());
    assert_eq!(handle.snapshot().forwarding.footer_text, "new");
}

#[test]
fn edited_file_is_reloaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[telegram]\nallowed_channels = [-1]\n").expect("write");

    let handle = SettingsHandle::new(load_config(&path).expect("load"));
    let _watcher = watch_config(path.clone(), handle.clone()).expect("watch");

    std::fs::write(&path, "[telegram]\nallowed_channels = [-1, -2]\n").expect("rewrite");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !handle.snapshot().telegram.allows(-2) {
        assert!(Instant::now() < deadline, "config was not reloaded");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn unparsable_edit_keeps_previous_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[forwarding]\nfooter_text = \"kept\"\n").expect("write");

    let handle = SettingsHandle::new(load_config(&path).expect("load"));
    let _watcher = watch_config(path.clone(), handle.clone()).expect("watch");

    std::fs::write(&path, "[forwarding\nfooter_text = ").expect("rewrite");
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(handle.snapshot().forwarding.footer_text, "kept");
}
