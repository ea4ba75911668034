use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use draw_core::{DrawConfig, Participant};
use thiserror::Error;

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_ROSTER: &str = "roster.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },
    #[error("cannot read roster {path}: {source}")]
    RosterUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("roster {path} is not a JSON participant list: {source}")]
    RosterFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Server settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    /// JSON file holding the draw record; in-memory only when unset.
    pub persist_path: Option<PathBuf>,
    pub roster_path: PathBuf,
    pub draw: DrawConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = DrawConfig::default();
        Ok(Self {
            bind: lookup("SPUGNA_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            persist_path: lookup("PERSIST_PATH").map(PathBuf::from),
            roster_path: lookup("SPUGNA_ROSTER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROSTER)),
            draw: DrawConfig {
                gifts_per_giver: parse_var(&lookup, "SPUGNA_GIFTS_PER_GIVER")?
                    .unwrap_or(defaults.gifts_per_giver),
                max_attempts: parse_var(&lookup, "SPUGNA_MAX_ATTEMPTS")?
                    .unwrap_or(defaults.max_attempts),
            },
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

pub async fn load_roster(path: &Path) -> Result<Vec<Participant>, ConfigError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ConfigError::RosterUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::RosterFormat {
        path: path.to_path_buf(),
        source,
    })
}
