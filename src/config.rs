//! Game mode settings.
//!
//! The host passes a [`ModeConfig`] to the controller at construction. Values
//! are taken as given; range checking belongs to whoever produced the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    seconds_to_ticks, time_limit_ticks, DEFAULT_PLAYERS_TO_START_ROUND,
    DEFAULT_ROUND_END_DELAY_SECONDS, DEFAULT_SUICIDE_PENALTY,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeConfig {
    /// Ingame population needed to leave warmup.
    pub players_to_start_round: usize,
    pub suicide_penalty: i32,
    /// 0 disables the time limit.
    pub time_limit_minutes: u32,
    pub round_end_delay_seconds: u64,
    pub debug: bool,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            players_to_start_round: DEFAULT_PLAYERS_TO_START_ROUND,
            suicide_penalty: DEFAULT_SUICIDE_PENALTY,
            time_limit_minutes: 0,
            round_end_delay_seconds: DEFAULT_ROUND_END_DELAY_SECONDS,
            debug: false,
        }
    }
}

impl ModeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn time_limit_ticks(&self, tick_speed: u32) -> Option<u64> {
        time_limit_ticks(self.time_limit_minutes, tick_speed)
    }

    pub fn round_end_delay_ticks(&self, tick_speed: u32) -> u64 {
        seconds_to_ticks(self.round_end_delay_seconds, tick_speed)
    }
}
