//! Handles the configuration of the streaming client.
//!
//! this module is responsible for parsing the FreeTunes.toml file, applying environment and cli
//! overrides, and exposing the endpoints the session controller talks to.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use std::{path::PathBuf, str::FromStr, time::Duration};

pub static DEFAULT_CONFIG: &str = include_str!("../FreeTunes.toml");

#[derive(Clone, Debug, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    /// Streaming client settings
    #[serde(default)]
    pub client: ClientSettings,
}

/// Overrides coming from the command line, these win over the config file and the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub wss_url: Option<String>,
    pub token_file: Option<PathBuf>,
    pub log_level: Option<log::LevelFilter>,
}

impl Settings {
    /// Load settings from the config file, environment variables, and CLI arguments.
    ///
    /// The environment variables are prefixed with `FREETUNES_`, nested keys are separated
    /// by `__` (e.g. `FREETUNES_CLIENT__SERVER_URL`).
    ///
    /// # Errors
    ///
    /// This function will return an error if the config file is not found or if the config file is
    /// invalid.
    #[inline]
    pub fn init(config: PathBuf, overrides: Overrides) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(config))
            .add_source(
                Environment::with_prefix("FREETUNES")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        if let Some(server_url) = overrides.server_url {
            settings.client.server_url = server_url;
        }
        if let Some(wss_url) = overrides.wss_url {
            settings.client.wss_url = wss_url;
        }
        if let Some(token_file) = overrides.token_file {
            settings.client.token_file = Some(token_file);
        }
        if let Some(log_level) = overrides.log_level {
            settings.client.log_level = log_level;
        }

        if let Some(path) = &mut settings.client.token_file {
            *path = shellexpand::tilde(&path.to_string_lossy())
                .into_owned()
                .into();
        }

        Ok(settings)
    }

    /// Get the (default) path to the config file.
    /// If the config file does not exist at this path, it will be created with the default config.
    ///
    /// See [`crate::get_config_dir`] for more information about where this default path is located.
    ///
    /// # Errors
    ///
    /// This function will return an error if the system config directory (e.g., `~/.config` on
    /// linux) could not be found, or if the config file was missing and could not be created.
    #[inline]
    pub fn get_config_path() -> Result<PathBuf, std::io::Error> {
        match crate::get_config_dir() {
            Ok(config_dir) => {
                if !config_dir.exists() {
                    std::fs::create_dir_all(&config_dir)?;
                }
                let config_file = config_dir.join("FreeTunes.toml");

                if !config_file.exists() {
                    std::fs::write(&config_file, DEFAULT_CONFIG)?;
                }

                Ok(config_file)
            }
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::NotFound, e)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base URL of the backend, static assets are served from `<server_url>/<static_prefix>/`.
    /// Default is "http://localhost:8000".
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// URL of the signaling WebSocket.
    /// Default is "ws://localhost:8000/ws".
    #[serde(default = "default_wss_url")]
    pub wss_url: String,
    /// Path segment the backend serves transcoded assets under.
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,
    /// Appended to every search before it is sent, the backend strips it again.
    #[serde(default = "default_query_suffix")]
    pub query_suffix: String,
    /// How long to wait for the signaling channel to connect, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long a manifest (and variant playlist) fetch may take, in seconds.
    #[serde(default = "default_manifest_timeout_secs")]
    pub manifest_timeout_secs: u64,
    /// File holding the access token issued by the login flow.
    /// If unset, the token is taken from the command line or not sent at all.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// What level of logging to use.
    /// Default is "info".
    #[serde(default = "default_log_level")]
    #[serde(deserialize_with = "de_log_level")]
    pub log_level: log::LevelFilter,
}

impl ClientSettings {
    #[must_use]
    #[inline]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    #[inline]
    pub const fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }
}

fn de_log_level<'de, D>(deserializer: D) -> Result<log::LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(log::LevelFilter::from_str(&s).unwrap_or_else(|_| default_log_level()))
}

fn default_server_url() -> String {
    "http://localhost:8000".into()
}

fn default_wss_url() -> String {
    "ws://localhost:8000/ws".into()
}

fn default_static_prefix() -> String {
    "static".into()
}

fn default_query_suffix() -> String {
    " song".into()
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_manifest_timeout_secs() -> u64 {
    20
}

const fn default_log_level() -> log::LevelFilter {
    log::LevelFilter::Info
}

impl Default for ClientSettings {
    #[inline]
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            wss_url: default_wss_url(),
            static_prefix: default_static_prefix(),
            query_suffix: default_query_suffix(),
            connect_timeout_secs: default_connect_timeout_secs(),
            manifest_timeout_secs: default_manifest_timeout_secs(),
            token_file: None,
            log_level: default_log_level(),
        }
    }
}
