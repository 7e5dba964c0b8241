//! Daemon configuration.
//!
//! Loaded from an optional TOML file. Every field has a default, so the
//! daemon runs without any file at all. Environment variables and
//! command-line flags are layered on top by the binary:
//!
//! defaults < TOML file < `DUET_BIND` / `PORT` < `--bind`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matchmaking::DEFAULT_MAX_PARTICIPANTS;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "DUET_CONFIG";

/// Environment variable overriding the full bind address.
pub const BIND_ENV: &str = "DUET_BIND";

/// Environment variable overriding only the listen port.
pub const PORT_ENV: &str = "PORT";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// Full daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub matchmaking: MatchmakingConfig,
    pub logging: LoggingConfig,
}

/// Listener and per-connection transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub bind: SocketAddr,
    /// Open connections beyond this are rejected on accept
    pub max_connections: usize,
    /// Queued outbound messages per connection before dropping
    pub outbox_capacity: usize,
    /// Largest accepted text frame, in bytes
    pub max_message_size: usize,
    pub heartbeat_interval_secs: u64,
    /// A connection silent for this long is closed
    pub idle_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1024,
            outbox_capacity: 64,
            max_message_size: duet_protocol::MAX_MESSAGE_SIZE,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            write_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub max_participants: usize,
    /// Push a roster snapshot to every client after each change
    pub broadcast_roster: bool,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            broadcast_roster: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "duetd=info,duet_core=info,duet_protocol=info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the config file from an explicit path or `DUET_CONFIG`,
    /// falling back to defaults when neither is set.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => Self::load(Path::new(&path)),
                None => Ok(Self::default()),
            },
        }
    }

    /// Applies `DUET_BIND` and `PORT` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let bind = std::env::var(BIND_ENV).ok();
        let port = std::env::var(PORT_ENV).ok();
        self.apply_overrides(bind.as_deref(), port.as_deref())
    }

    /// Applies a bind address and/or port override. A full address wins
    /// over a bare port.
    pub fn apply_overrides(
        &mut self,
        bind: Option<&str>,
        port: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = port {
            let port: u16 = raw.trim().parse().map_err(|_| ConfigError::Override {
                name: PORT_ENV,
                value: raw.to_string(),
            })?;
            self.server.bind.set_port(port);
        }
        if let Some(raw) = bind {
            self.server.bind = raw.trim().parse().map_err(|_| ConfigError::Override {
                name: BIND_ENV,
                value: raw.to_string(),
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("server.max_connections", self.server.max_connections == 0),
            ("server.outbox_capacity", self.server.outbox_capacity == 0),
            ("server.max_message_size", self.server.max_message_size == 0),
            (
                "server.heartbeat_interval_secs",
                self.server.heartbeat_interval_secs == 0,
            ),
            (
                "server.idle_timeout_secs",
                self.server.idle_timeout_secs < self.server.heartbeat_interval_secs,
            ),
            ("server.write_timeout_secs", self.server.write_timeout_secs == 0),
            (
                "matchmaking.max_participants",
                self.matchmaking.max_participants == 0,
            ),
        ];
        match checks.iter().find(|(_, bad)| *bad) {
            Some((field, _)) => Err(ConfigError::Invalid { field: *field }),
            None => Ok(()),
        }
    }
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}")]
    Invalid { field: &'static str },

    #[error("Invalid {name} override: {value:?}")]
    Override { name: &'static str, value: String },
}
