use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

const SETTINGS_FILE: &str = "client.toml";
/// Upper bound for `error_display_secs`; a user-facing notice never needs
/// to outlive an hour.
pub const MAX_ERROR_DISPLAY_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub token_path: PathBuf,
    pub error_display_secs: u64,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            token_path: default_token_path(),
            error_display_secs: 2,
            event_buffer: 256,
        }
    }
}

impl Settings {
    pub fn error_display_window(&self) -> Duration {
        Duration::from_secs(self.error_display_secs)
    }
}

fn default_token_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat-client")
        .join("token")
}

/// Defaults, then `client.toml` in the working directory, then environment.
pub fn load_settings() -> Settings {
    let file_cfg = read_settings_file(Path::new(SETTINGS_FILE)).unwrap_or_else(|err| {
        tracing::debug!("settings: no usable {SETTINGS_FILE}: {err:#}");
        HashMap::new()
    });
    apply_overrides(Settings::default(), &file_cfg, |key| std::env::var(key).ok())
}

pub fn read_settings_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str::<HashMap<String, String>>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub fn apply_overrides(
    mut settings: Settings,
    file_cfg: &HashMap<String, String>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("token_path") {
        settings.token_path = PathBuf::from(v);
    }
    if let Some(parsed) = file_cfg
        .get("error_display_secs")
        .and_then(|v| v.parse::<u64>().ok())
    {
        settings.error_display_secs = parsed;
    }
    if let Some(parsed) = file_cfg
        .get("event_buffer")
        .and_then(|v| v.parse::<usize>().ok())
    {
        settings.event_buffer = parsed;
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("APP__TOKEN_PATH") {
        settings.token_path = PathBuf::from(v);
    }

    if let Some(parsed) = env("APP__ERROR_DISPLAY_SECS").and_then(|v| v.parse::<u64>().ok()) {
        settings.error_display_secs = parsed;
    }

    if let Some(parsed) = env("APP__EVENT_BUFFER").and_then(|v| v.parse::<usize>().ok()) {
        settings.event_buffer = parsed.max(1);
    }

    settings.error_display_secs = settings.error_display_secs.min(MAX_ERROR_DISPLAY_SECS);
    settings.server_url = settings.server_url.trim_end_matches('/').to_string();
    settings
}
