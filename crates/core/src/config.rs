use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub chat: ChatConfig,
    pub media: MediaConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Bearer token for the messaging provider's send/media API.
    pub api_token: SecretString,
    pub base_url: String,
    pub send_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub download_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub webhook_port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub timeout_minutes: i64,
    pub attachment_ttl_minutes: i64,
    pub sweep_interval_minutes: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub chat_api_token: Option<String>,
    pub chat_base_url: Option<String>,
    pub session_timeout_minutes: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://remedi.db".to_owned(),
                max_connections: 5,
                timeout_secs: 30,
            },
            chat: ChatConfig {
                api_token: String::new().into(),
                base_url: "https://chat.invalid/api".to_owned(),
                send_timeout_secs: 10,
            },
            media: MediaConfig { download_timeout_secs: 15 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_owned(),
                webhook_port: 8088,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            session: SessionConfig {
                timeout_minutes: 30,
                attachment_ttl_minutes: 30,
                sweep_interval_minutes: 60,
            },
            logging: LoggingConfig { level: "info".to_owned(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    chat: Option<ChatPatch>,
    media: Option<MediaPatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    api_token: Option<String>,
    base_url: Option<String>,
    send_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaPatch {
    download_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    webhook_port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    timeout_minutes: Option<i64>,
    attachment_ttl_minutes: Option<i64>,
    sweep_interval_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("remedi.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(api_token_value) = chat.api_token {
                self.chat.api_token = api_token_value.into();
            }
            if let Some(base_url) = chat.base_url {
                self.chat.base_url = base_url;
            }
            if let Some(send_timeout_secs) = chat.send_timeout_secs {
                self.chat.send_timeout_secs = send_timeout_secs;
            }
        }

        if let Some(media) = patch.media {
            if let Some(download_timeout_secs) = media.download_timeout_secs {
                self.media.download_timeout_secs = download_timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(webhook_port) = server.webhook_port {
                self.server.webhook_port = webhook_port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(timeout_minutes) = session.timeout_minutes {
                self.session.timeout_minutes = timeout_minutes;
            }
            if let Some(attachment_ttl_minutes) = session.attachment_ttl_minutes {
                self.session.attachment_ttl_minutes = attachment_ttl_minutes;
            }
            if let Some(sweep_interval_minutes) = session.sweep_interval_minutes {
                self.session.sweep_interval_minutes = sweep_interval_minutes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("REMEDI_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = env::var("REMEDI_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("REMEDI_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Ok(token) = env::var("REMEDI_CHAT_API_TOKEN") {
            self.chat.api_token = token.into();
        }
        if let Ok(base_url) = env::var("REMEDI_CHAT_BASE_URL") {
            self.chat.base_url = base_url;
        }
        if let Ok(raw) = env::var("REMEDI_SESSION_TIMEOUT_MINUTES") {
            let minutes = raw.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "REMEDI_SESSION_TIMEOUT_MINUTES".to_owned(),
                value: raw,
            })?;
            self.session.timeout_minutes = minutes;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(token) = overrides.chat_api_token {
            self.chat.api_token = token.into();
        }
        if let Some(base_url) = overrides.chat_base_url {
            self.chat.base_url = base_url;
        }
        if let Some(minutes) = overrides.session_timeout_minutes {
            self.session.timeout_minutes = minutes;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_owned()));
        }
        if self.chat.api_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "chat.api_token is required (set REMEDI_CHAT_API_TOKEN)".to_owned(),
            ));
        }
        if !self.chat.base_url.starts_with("http://") && !self.chat.base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "chat.base_url must be an http(s) URL, got `{}`",
                self.chat.base_url
            )));
        }
        if self.session.timeout_minutes < 1 {
            return Err(ConfigError::Validation(
                "session.timeout_minutes must be at least 1".to_owned(),
            ));
        }
        if self.session.attachment_ttl_minutes < 1 {
            return Err(ConfigError::Validation(
                "session.attachment_ttl_minutes must be at least 1".to_owned(),
            ));
        }
        if self.server.webhook_port == self.server.health_check_port {
            return Err(ConfigError::Validation(
                "server.webhook_port and server.health_check_port must differ".to_owned(),
            ));
        }
        Ok(())
    }

    /// Redacted view for the CLI `config` command; secrets never leave the
    /// process.
    pub fn redacted_summary(&self) -> Vec<(String, String)> {
        vec![
            ("database.url".to_owned(), self.database.url.clone()),
            ("database.max_connections".to_owned(), self.database.max_connections.to_string()),
            ("chat.base_url".to_owned(), self.chat.base_url.clone()),
            (
                "chat.api_token".to_owned(),
                if self.chat.api_token.expose_secret().is_empty() {
                    "<unset>".to_owned()
                } else {
                    "<redacted>".to_owned()
                },
            ),
            ("server.bind_address".to_owned(), self.server.bind_address.clone()),
            ("server.webhook_port".to_owned(), self.server.webhook_port.to_string()),
            ("server.health_check_port".to_owned(), self.server.health_check_port.to_string()),
            ("session.timeout_minutes".to_owned(), self.session.timeout_minutes.to_string()),
            (
                "session.sweep_interval_minutes".to_owned(),
                self.session.sweep_interval_minutes.to_string(),
            ),
            ("logging.level".to_owned(), self.logging.level.clone()),
        ]
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("remedi.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

    fn valid_overrides() -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some("sqlite::memory:".to_owned()),
            chat_api_token: Some("tok-test".to_owned()),
            chat_base_url: Some("https://chat.test/api".to_owned()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn defaults_fail_validation_without_a_chat_token() {
        let result = AppConfig::load(LoadOptions::default());
        assert!(result.is_err(), "an empty api token must not validate");
    }

    #[test]
    fn overrides_take_precedence_and_validate() {
        let config = AppConfig::load(LoadOptions {
            overrides: valid_overrides(),
            ..LoadOptions::default()
        })
        .expect("valid overrides should load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.chat.api_token.expose_secret(), "tok-test");
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn config_file_patch_is_applied_under_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[session]\ntimeout_minutes = 45\n\n[logging]\nlevel = \"debug\"\nformat = \"json\"\n"
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: valid_overrides(),
        })
        .expect("file + overrides should load");

        assert_eq!(config.session.timeout_minutes, 45);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            overrides: valid_overrides(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn timeout_must_be_positive() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                session_timeout_minutes: Some(0),
                ..valid_overrides()
            },
            ..LoadOptions::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn redacted_summary_never_exposes_the_token() {
        let config = AppConfig::load(LoadOptions {
            overrides: valid_overrides(),
            ..LoadOptions::default()
        })
        .expect("valid overrides should load");

        let summary = config.redacted_summary();
        let token_row = summary.iter().find(|(key, _)| key == "chat.api_token").expect("row");
        assert_eq!(token_row.1, "<redacted>");
        assert!(summary.iter().all(|(_, value)| !value.contains("tok-test")));
    }
}
