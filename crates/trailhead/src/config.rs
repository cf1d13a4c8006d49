//! Server configuration loaded from `trailhead.toml`.
//!
//! Every table and key is optional; missing values fall back to the
//! defaults below. A missing file is created with the defaults written out.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use trailhead_dispatch::Stage;
use trailhead_session::SessionConfig;
use trailhead_transport::DEFAULT_MAX_LINE_LENGTH;

use crate::ConfigError;
use crate::connection::ActorConfig;

fn default_bind() -> String {
    "0.0.0.0:15124".to_string()
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_no_ping_timeout_secs() -> u64 {
    20
}

fn default_watchdog_tick_ms() -> u64 {
    1000
}

fn default_game_data_queue() -> usize {
    256
}

fn default_server_name() -> String {
    "Trailhead".to_string()
}

fn default_max_players() -> usize {
    20
}

fn default_slow_call_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

/// The whole `trailhead.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub admission: AdmissionSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// `[server]`: networking and connection liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to listen on, e.g. `"0.0.0.0:15124"`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Longest accepted line in bytes. Longer lines drop the connection.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Seconds without a valid packet before a connection is dropped.
    #[serde(default = "default_no_ping_timeout_secs")]
    pub no_ping_timeout_secs: u64,
    #[serde(default = "default_watchdog_tick_ms")]
    pub watchdog_tick_ms: u64,
    /// Per-connection `GameData` queue depth.
    #[serde(default = "default_game_data_queue")]
    pub game_data_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_line_length: default_max_line_length(),
            no_ping_timeout_secs: default_no_ping_timeout_secs(),
            watchdog_tick_ms: default_watchdog_tick_ms(),
            game_data_queue: default_game_data_queue(),
        }
    }
}

/// `[admission]`: who may join and what they are told.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionSettings {
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Message of the day, shown in the server list and on join.
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default)]
    pub require_gamejolt: bool,
    /// If non-empty, only these game modes may join.
    #[serde(default)]
    pub allowed_game_modes: Vec<String>,
    #[serde(default)]
    pub blocked_game_modes: Vec<String>,
    /// Player names or GameJolt ids.
    #[serde(default)]
    pub banned: Vec<String>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            message: String::new(),
            max_players: default_max_players(),
            require_gamejolt: false,
            allowed_game_modes: Vec::new(),
            blocked_game_modes: Vec::new(),
            banned: Vec::new(),
        }
    }
}

/// `[dispatch]`: which pipeline stages wrap every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_true")]
    pub log_errors: bool,
    /// Warn when a message takes longer than this. `0` disables the stage.
    #[serde(default = "default_slow_call_ms")]
    pub slow_call_ms: u64,
    #[serde(default = "default_true")]
    pub pre_processing: bool,
    #[serde(default = "default_true")]
    pub post_processing: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            log_errors: true,
            slow_call_ms: default_slow_call_ms(),
            pre_processing: true,
            post_processing: true,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl ServerConfig {
    /// Loads the configuration at `path`.
    ///
    /// If the file does not exist, writes the default configuration there
    /// and returns it.
    ///
    /// # Errors
    /// I/O failures, invalid TOML, or values rejected by
    /// [`validate`](Self::validate).
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let config = if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            toml::from_str::<ServerConfig>(&content)?
        } else {
            let config = ServerConfig::default();
            tokio::fs::write(path, toml::to_string_pretty(&config)?).await?;
            info!(path = %path.display(), "created default configuration file");
            config
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the server cannot run with.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind is empty".into()));
        }
        if server.max_line_length == 0 {
            return Err(ConfigError::Invalid("server.max_line_length must be positive".into()));
        }
        if server.watchdog_tick_ms == 0 {
            return Err(ConfigError::Invalid("server.watchdog_tick_ms must be positive".into()));
        }
        if server.game_data_queue == 0 {
            return Err(ConfigError::Invalid("server.game_data_queue must be positive".into()));
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        let a = &self.admission;
        SessionConfig {
            server_name: a.name.clone(),
            server_message: a.message.clone(),
            max_players: a.max_players,
            require_gamejolt: a.require_gamejolt,
            allowed_game_modes: a.allowed_game_modes.clone(),
            blocked_game_modes: a.blocked_game_modes.clone(),
            banned: a.banned.clone(),
        }
    }

    pub fn actor(&self) -> ActorConfig {
        let s = &self.server;
        ActorConfig {
            no_ping_timeout: Duration::from_secs(s.no_ping_timeout_secs),
            watchdog_tick: Duration::from_millis(s.watchdog_tick_ms),
            game_data_queue: s.game_data_queue,
        }
    }

    /// The dispatcher stages, outermost first.
    pub fn stages(&self) -> Vec<Stage> {
        let d = &self.dispatch;
        let mut stages = Vec::with_capacity(4);
        if d.log_errors {
            stages.push(Stage::ErrorLogging);
        }
        if d.slow_call_ms > 0 {
            stages.push(Stage::SlowCallLogging(Duration::from_millis(d.slow_call_ms)));
        }
        if d.pre_processing {
            stages.push(Stage::PreProcessing);
        }
        if d.post_processing {
            stages.push(Stage::PostProcessing);
        }
        stages
    }
}
