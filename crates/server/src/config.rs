use std::{collections::HashMap, fs};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub token_secret: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3001".into(),
            database_url: "sqlite://./data/members.db".into(),
            token_secret: "dev-token-secret".into(),
            access_token_ttl_seconds: 15 * 60,
            refresh_token_ttl_seconds: 7 * 24 * 60 * 60,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        apply_file_overrides(&mut settings, &raw);
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let text = |key: &str| file_cfg.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let number = |key: &str| file_cfg.get(key).and_then(toml::Value::as_integer);

    if let Some(v) = text("bind_addr") {
        settings.server_bind = v;
    }
    if let Some(v) = text("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = text("token_secret") {
        settings.token_secret = v;
    }
    if let Some(v) = number("access_token_ttl_seconds") {
        settings.access_token_ttl_seconds = v;
    }
    if let Some(v) = number("refresh_token_ttl_seconds") {
        settings.refresh_token_ttl_seconds = v;
    }
}

/// Later names in each list win, so `APP__*` overrides the short form.
fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let pick = |names: &[&str]| names.iter().filter_map(|name| lookup(name)).last();

    if let Some(v) = pick(&["SERVER_BIND", "APP__BIND_ADDR"]) {
        settings.server_bind = v;
    }
    if let Some(v) = pick(&["DATABASE_URL", "APP__DATABASE_URL"]) {
        settings.database_url = v;
    }
    if let Some(v) = pick(&["TOKEN_SECRET", "APP__TOKEN_SECRET"]) {
        settings.token_secret = v;
    }
    if let Some(v) = pick(&["APP__ACCESS_TOKEN_TTL_SECONDS"]).and_then(|v| v.parse().ok()) {
        settings.access_token_ttl_seconds = v;
    }
    if let Some(v) = pick(&["APP__REFRESH_TOKEN_TTL_SECONDS"]).and_then(|v| v.parse().ok()) {
        settings.refresh_token_ttl_seconds = v;
    }
}

/// Turns a bare file path into a SQLite URL. Directories are created when
/// the pool is opened.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
