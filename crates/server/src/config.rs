use std::{collections::HashMap, fs};

use tracing::warn;

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub session_issuer: String,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/community.db".into(),
            session_issuer: "comic-community".into(),
            session_secret: "devsecret".into(),
            session_ttl_seconds: 3600,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Defaults, then `server.toml` in the working directory, then env vars.
pub fn load_settings() -> Settings {
    let file = fs::read_to_string("server.toml").ok();
    settings_from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

pub(crate) fn settings_from_sources(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<HashMap<String, toml::Value>>(raw) {
            Ok(file_cfg) => apply_file(&mut settings, &file_cfg),
            Err(error) => warn!(%error, "ignoring unreadable server.toml"),
        }
    }

    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = env(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = env(key) {
            settings.database_url = v;
        }
    }
    if let Some(v) = env("APP__SESSION_ISSUER") {
        settings.session_issuer = v;
    }
    if let Some(v) = env("APP__SESSION_SECRET") {
        settings.session_secret = v;
    }
    if let Some(parsed) = env("APP__SESSION_TTL_SECONDS").and_then(|v| v.parse().ok()) {
        settings.session_ttl_seconds = parsed;
    }
    if let Some(parsed) = env("APP__MAX_BODY_BYTES").and_then(|v| v.parse().ok()) {
        settings.max_body_bytes = parsed;
    }

    settings
}

fn apply_file(settings: &mut Settings, file_cfg: &HashMap<String, toml::Value>) {
    let text = |key: &str| file_cfg.get(key).and_then(toml::Value::as_str);
    let number = |key: &str| file_cfg.get(key).and_then(toml::Value::as_integer);

    if let Some(v) = text("bind_addr") {
        settings.server_bind = v.to_string();
    }
    if let Some(v) = text("database_url") {
        settings.database_url = v.to_string();
    }
    if let Some(v) = text("session_issuer") {
        settings.session_issuer = v.to_string();
    }
    if let Some(v) = text("session_secret") {
        settings.session_secret = v.to_string();
    }
    if let Some(v) = number("session_ttl_seconds") {
        settings.session_ttl_seconds = v;
    }
    if let Some(v) = number("max_body_bytes").and_then(|v| usize::try_from(v).ok()) {
        settings.max_body_bytes = v;
    }
}

/// Turns bare paths and `sqlite:` prefixes into a URL sqlx accepts. Windows
/// drive paths keep a single colon.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }
    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    let path = if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        path
    } else if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    } else {
        raw_database_url
            .strip_prefix("sqlite:")
            .unwrap_or(raw_database_url)
    };

    let path = path.replace('\\', "/");
    if has_drive_prefix(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
