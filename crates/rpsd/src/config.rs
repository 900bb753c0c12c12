//! Server configuration.
//!
//! Every field has a default, so an empty (or absent) TOML file yields a
//! working server:
//!
//! ```toml
//! listen = "127.0.0.1:8080"
//! max_lobbies = 100
//!
//! [lobby]
//! capacity = 2
//! win_threshold = 3
//! warmup_secs = 5
//! grace_secs = 5
//! idle_timeout_secs = 120   # 0 disables the idle timeout
//! outbox_capacity = 16
//! inbox_capacity = 16
//! write_timeout_secs = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Environment variable overriding the listen address
pub const LISTEN_ENV: &str = "RPS_LISTEN";

/// Default cap on concurrently open lobbies
pub const DEFAULT_MAX_LOBBIES: usize = 100;

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub listen: String,

    /// Maximum number of lobbies the directory holds at once
    pub max_lobbies: usize,

    /// Per-lobby settings
    pub lobby: LobbySettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_lobbies: DEFAULT_MAX_LOBBIES,
            lobby: LobbySettings::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path`, or defaults when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                })?;
                Self::from_toml(&raw).map_err(|e| match e {
                    ConfigError::Parse { error, .. } => ConfigError::Parse {
                        path: path.to_path_buf(),
                        error,
                    },
                    other => other,
                })
            }
            None => Ok(Self::default()),
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `RPS_LISTEN` if it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            if !listen.trim().is_empty() {
                self.listen = listen.trim().to_string();
            }
        }
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lobby.capacity != rps_core::PLAYERS {
            return Err(ConfigError::Invalid {
                field: "lobby.capacity",
                reason: format!("games are played by exactly {} players", rps_core::PLAYERS),
            });
        }
        if self.lobby.win_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "lobby.win_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.lobby.outbox_capacity == 0 || self.lobby.inbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "lobby.outbox_capacity",
                reason: "channel capacities must be non-zero".to_string(),
            });
        }
        if self.max_lobbies == 0 {
            return Err(ConfigError::Invalid {
                field: "max_lobbies",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings shared by every lobby the directory creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    /// Participants needed to start a game
    pub capacity: usize,

    /// Score that ends the game
    pub win_threshold: u32,

    /// Delay between the all-ready check and the first round
    pub warmup_secs: u64,

    /// Delay between the final result and disbanding
    pub grace_secs: u64,

    /// Round barrier timeout; 0 waits forever
    pub idle_timeout_secs: u64,

    /// Bounded outbound queue per session
    pub outbox_capacity: usize,

    /// Bounded inbound queues per session
    pub inbox_capacity: usize,

    /// Per-frame write deadline
    pub write_timeout_secs: u64,

    /// Sub-second overrides for tests; not read from TOML
    #[serde(skip)]
    pub timing: Option<Timing>,
}

/// Explicit durations that take precedence over the `*_secs` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub warmup: Duration,
    pub grace: Duration,
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Duration,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            capacity: rps_core::PLAYERS,
            win_threshold: rps_core::Game::DEFAULT_WIN_THRESHOLD,
            warmup_secs: 5,
            grace_secs: 5,
            idle_timeout_secs: 120,
            outbox_capacity: 16,
            inbox_capacity: 16,
            write_timeout_secs: 5,
            timing: None,
        }
    }
}

impl LobbySettings {
    /// Returns settings with explicit durations, for fast tests.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn warmup(&self) -> Duration {
        self.timing
            .map(|t| t.warmup)
            .unwrap_or(Duration::from_secs(self.warmup_secs))
    }

    pub fn grace(&self) -> Duration {
        self.timing
            .map(|t| t.grace)
            .unwrap_or(Duration::from_secs(self.grace_secs))
    }

    /// Round barrier timeout; `None` disables it.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.timing {
            Some(t) => t.idle_timeout,
            None if self.idle_timeout_secs == 0 => None,
            None => Some(Duration::from_secs(self.idle_timeout_secs)),
        }
    }

    pub fn write_timeout(&self) -> Duration {
        self.timing
            .map(|t| t.write_timeout)
            .unwrap_or(Duration::from_secs(self.write_timeout_secs))
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to render config: {0}")]
    Render(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.max_lobbies, 100);
        assert_eq!(config.lobby.capacity, 2);
        assert_eq!(config.lobby.win_threshold, 3);
        assert_eq!(config.lobby.warmup(), Duration::from_secs(5));
        assert_eq!(config.lobby.grace(), Duration::from_secs(5));
        assert_eq!(config.lobby.idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.lobby.write_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(ServerConfig::from_toml("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = ServerConfig::from_toml(
            r#"
            listen = "0.0.0.0:9000"

            [lobby]
            win_threshold = 5
            idle_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.lobby.win_threshold, 5);
        assert_eq!(config.lobby.idle_timeout(), None);
        assert_eq!(config.lobby.warmup_secs, 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_toml("[lobby]\ncapacity = 3"),
            Err(ConfigError::Invalid { field: "lobby.capacity", .. })
        ));
        assert!(matches!(
            ServerConfig::from_toml("[lobby]\nwin_threshold = 0"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            ServerConfig::from_toml("max_lobbies = \"many\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_lobbies = 7").unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_lobbies, 7);

        assert!(ServerConfig::load(None).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/rpsd.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = ServerConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(ServerConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_timing_override() {
        let settings = LobbySettings::default().with_timing(Timing {
            warmup: Duration::from_millis(10),
            grace: Duration::from_millis(20),
            idle_timeout: None,
            write_timeout: Duration::from_millis(30),
        });
        assert_eq!(settings.warmup(), Duration::from_millis(10));
        assert_eq!(settings.grace(), Duration::from_millis(20));
        assert_eq!(settings.idle_timeout(), None);
        assert_eq!(settings.write_timeout(), Duration::from_millis(30));
    }
}
