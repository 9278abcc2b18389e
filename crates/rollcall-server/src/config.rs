//! Server configuration.
//!
//! Layered with figment: compiled defaults, then an optional JSON file, then
//! `ROLLCALL_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment prefix for every configuration key.
pub const ENV_PREFIX: &str = "ROLLCALL_";

/// Legacy variable accepted for `jwt_secret`.
pub const LEGACY_SECRET_VAR: &str = "JWT_PASSWORD";

/// Configuration could not be loaded or is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A provider failed, e.g. a missing file or a bad value.
    #[error("failed to load configuration: {0}")]
    Load(String),

    /// Values loaded but failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(e.to_string())
    }
}

/// Log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Configuration for the roll-call server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// HS256 secret for bearer tokens.
    pub jwt_secret: String,
    /// Outbound queue depth per connection.
    pub max_send_queue: usize,
    /// Coordinator inbound queue depth.
    pub command_queue: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a client is swept.
    pub client_timeout_secs: u64,
    /// Upper bound on one closure persistence attempt.
    pub close_timeout_secs: u64,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: LogFormat,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            database_path: home_dir().join("rollcall.db"),
            jwt_secret: String::new(),
            max_send_queue: 256,
            command_queue: 1024,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            close_timeout_secs: 30,
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Provider chain without validation.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Json::file(path));
        }
        figment
            .merge(Env::raw().only(&[LEGACY_SECRET_VAR]).map(|_| "jwt_secret".into()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load and validate configuration.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::Load(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }
        Self::from_figment(&Self::figment(file))
    }

    /// Extract from an assembled figment and validate.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: ServerConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "jwt_secret is required (set {ENV_PREFIX}JWT_SECRET or {LEGACY_SECRET_VAR})"
            )));
        }
        if self.max_send_queue == 0 || self.command_queue == 0 {
            return Err(ConfigError::Invalid("queue sizes must be non-zero".into()));
        }
        if self.close_timeout_secs == 0 {
            return Err(ConfigError::Invalid("close_timeout_secs must be non-zero".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_secs must be non-zero".into()));
        }
        // Pongs answer pings, so a client is only heard from once per heartbeat.
        if self.client_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "client_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.client_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Silence after which the sweeper evicts a client.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    /// Bound on one closure persistence attempt.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Data directory under `$HOME`, falling back to `/tmp`.
fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_secret() -> ServerConfig {
        ServerConfig {
            jwt_secret: "s3cret".into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_send_queue, 256);
        assert_eq!(cfg.command_queue, 1024);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.client_timeout(), Duration::from_secs(90));
        assert_eq!(cfg.close_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.metrics_enabled);
        assert!(cfg.database_path.ends_with(".rollcall/rollcall.db"));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = ServerConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("jwt_secret")));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let cfg = ServerConfig {
            max_send_queue: 0,
            ..with_secret()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_close_timeout_is_rejected() {
        let cfg = ServerConfig {
            close_timeout_secs: 0,
            ..with_secret()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn client_timeout_must_outlast_heartbeat() {
        for client_timeout_secs in [0, 30] {
            let cfg = ServerConfig {
                client_timeout_secs,
                heartbeat_interval_secs: 30,
                ..with_secret()
            };
            let err = cfg.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("client_timeout_secs")));
        }
        let cfg = ServerConfig {
            client_timeout_secs: 31,
            heartbeat_interval_secs: 30,
            ..with_secret()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn valid_config_passes() {
        assert!(with_secret().validate().is_ok());
        assert_eq!(with_secret().bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn json_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 4100, "jwt_secret": "from-file", "log_format": "json"}}"#
        )
        .unwrap();

        let figment = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Json::file(file.path()));
        let cfg = ServerConfig::from_figment(&figment).unwrap();
        assert_eq!(cfg.port, 4100);
        assert_eq!(cfg.jwt_secret, "from-file");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.command_queue, 1024);
    }

    #[test]
    fn later_providers_win() {
        let figment = Figment::from(Serialized::defaults(with_secret()))
            .merge(Serialized::default("port", 0u16))
            .merge(Serialized::default("close_timeout_secs", 5u64));
        let cfg = ServerConfig::from_figment(&figment).unwrap();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.close_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn legacy_secret_variable_is_accepted() {
        figment::Jail::expect_with(|jail| {
            jail.set_env(LEGACY_SECRET_VAR, "legacy");
            let cfg = ServerConfig::from_figment(&ServerConfig::figment(None)).map_err(|e| e.to_string())?;
            assert_eq!(cfg.jwt_secret, "legacy");
            Ok(())
        });
    }

    #[test]
    fn prefixed_env_overrides_file_and_legacy_secret() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("rollcall.json", r#"{"port": 4100, "jwt_secret": "from-file"}"#)?;
            jail.set_env(LEGACY_SECRET_VAR, "legacy");
            jail.set_env("ROLLCALL_JWT_SECRET", "prefixed");
            jail.set_env("ROLLCALL_PORT", "4200");
            jail.set_env("ROLLCALL_LOG_FORMAT", "json");

            let cfg = ServerConfig::load(Some(Path::new("rollcall.json"))).map_err(|e| e.to_string())?;
            assert_eq!(cfg.jwt_secret, "prefixed");
            assert_eq!(cfg.port, 4200);
            assert_eq!(cfg.log_format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/rollcall.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(msg) if msg.contains("not found")));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = with_secret();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.jwt_secret, cfg.jwt_secret);
        assert_eq!(back.port, cfg.port);
    }
}
