use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub credential_store_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3001".to_string(),
            credential_store_url: "sqlite://./data/client.db".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ClientSettings {
    pub fn validate(&self) -> Result<(), ClientConfigError> {
        let invalid = |reason: String| ClientConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason,
        };
        let parsed = Url::parse(&self.api_base_url).map_err(|err| invalid(err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ClientConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ClientConfigError {
    #[error("failed to load client settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid api base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("request timeout must be at least one second")]
    InvalidTimeout,
}

/// Defaults, then `client.toml` in the working directory, then `APP__*`
/// environment variables.
pub fn load_client_settings() -> Result<ClientSettings, ClientConfigError> {
    load_client_settings_from(Some(Path::new(DEFAULT_CONFIG_FILE)))
}

pub fn load_client_settings_from(path: Option<&Path>) -> Result<ClientSettings, ClientConfigError> {
    let defaults = ClientSettings::default();
    let mut builder = Config::builder()
        .set_default("api_base_url", defaults.api_base_url)?
        .set_default("credential_store_url", defaults.credential_store_url)?
        .set_default(
            "request_timeout_seconds",
            defaults.request_timeout_seconds as i64,
        )?;
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(false));
    }
    let settings: ClientSettings = builder
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    settings.validate()?;
    info!(api_base_url = %settings.api_base_url, "client settings loaded");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_client_settings_from(Some(&dir.path().join("absent.toml")))
            .expect("settings");
        assert_eq!(settings.request_timeout_seconds, 30);
        assert!(settings.credential_store_url.starts_with("sqlite://"));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            "api_base_url = \"https://members.example.test\"\nrequest_timeout_seconds = 5"
        )
        .expect("write");

        let settings = load_client_settings_from(Some(file.path())).expect("settings");
        assert_eq!(settings.api_base_url, "https://members.example.test");
        assert_eq!(settings.request_timeout_seconds, 5);
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let settings = ClientSettings {
            api_base_url: "ftp://members.example.test".into(),
            ..ClientSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ClientConfigError::InvalidBaseUrl { .. })
        ));

        let unparsable = ClientSettings {
            api_base_url: "not a url".into(),
            ..ClientSettings::default()
        };
        assert!(unparsable.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let settings = ClientSettings {
            request_timeout_seconds: 0,
            ..ClientSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ClientConfigError::InvalidTimeout)
        ));
    }
}
