//! Runtime configuration
//!
//! Everything is read from environment variables, optionally seeded from a
//! `.env` file. Unset variables fall back to the defaults in
//! [`crate::constants`].

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use garde::Validate;
use serde::Serialize;
use thiserror::Error;

use crate::{
    constants::room::{FINISHED_GRACE_SECS, HOST_GRACE_SECS, MAX_PLAYER_COUNT},
    quiz::validate_duration,
};

/// Upper bound, in seconds, for either grace period
const MAX_GRACE_SECS: u64 = 24 * 60 * 60;

/// Errors building a [`Config`]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable holds a value that does not parse
    #[error("{name} has invalid value `{value}`")]
    Parse {
        /// The variable name
        name: &'static str,
        /// The raw value
        value: String,
    },
    /// The game section is out of bounds
    #[error("invalid game configuration: {0}")]
    Invalid(#[from] garde::Report),
}

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3001,
        }
    }
}

/// Timing and capacity of every room
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// How long a finished room lingers before teardown
    #[garde(custom(validate_duration::<1, MAX_GRACE_SECS>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub finished_grace: Duration,
    /// How long a room may stay without a host
    #[garde(custom(validate_duration::<1, MAX_GRACE_SECS>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub host_grace: Duration,
    /// Player cap per room
    #[garde(range(min = 1, max = MAX_PLAYER_COUNT))]
    pub max_players: usize,
    /// Close a question as soon as every expected player has answered
    #[garde(skip)]
    pub reveal_when_all_answered: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            finished_grace: Duration::from_secs(FINISHED_GRACE_SECS),
            host_grace: Duration::from_secs(HOST_GRACE_SECS),
            max_players: MAX_PLAYER_COUNT,
            reveal_when_all_answered: false,
        }
    }
}

/// Complete configuration of the server binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Listening address
    pub server: ServerConfig,
    /// Room behavior
    pub game: GameConfig,
    /// JSON file of quizzes to serve
    pub quiz_file: Option<PathBuf>,
    /// Log rendering
    pub log_format: LogFormat,
}

impl Config {
    /// Reads the configuration from the process environment
    ///
    /// A `.env` file in the working directory is loaded first if present;
    /// variables already set in the environment take precedence.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse(&lookup, "SERVER_PORT")?.unwrap_or(defaults.server.port),
            },
            game: GameConfig {
                finished_grace: parse(&lookup, "FINISHED_GRACE_SECS")?
                    .map_or(defaults.game.finished_grace, Duration::from_secs),
                host_grace: parse(&lookup, "HOST_GRACE_SECS")?
                    .map_or(defaults.game.host_grace, Duration::from_secs),
                max_players: parse(&lookup, "MAX_PLAYERS")?.unwrap_or(defaults.game.max_players),
                reveal_when_all_answered: parse(&lookup, "REVEAL_WHEN_ALL_ANSWERED")?
                    .unwrap_or(defaults.game.reveal_when_all_answered),
            },
            quiz_file: lookup("QUIZ_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            log_format: parse(&lookup, "LOG_FORMAT")?.unwrap_or_default(),
        };

        config.game.validate()?;
        Ok(config)
    }

    /// The socket address to listen on
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.server.host, self.server.port);
        raw.parse().map_err(|_| ConfigError::Parse {
            name: "SERVER_HOST",
            value: raw,
        })
    }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Parse { name, value })
        })
        .transpose()
}
