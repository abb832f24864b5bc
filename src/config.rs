use std::path::Path;

use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dmx::UniverseAddress;
use crate::universe::TransportMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Context(String),
}

/// One universe's configuration: address, transport, and whether its
/// sender needs the refresh (keep-alive) timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    pub address: UniverseAddress,
    #[serde(default)]
    pub description: String,
    pub transport: TransportMode,
    #[serde(default)]
    pub needs_refresh: bool,
}

fn default_cadence_ms() -> u64 {
    25
}

fn default_fade_step_ms() -> u64 {
    10
}

fn default_refresh_ms() -> u64 {
    1000
}

fn default_max_consecutive_send_errors() -> usize {
    20
}

/// Top-level show configuration, loaded from a JSON file given on the
/// command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfig {
    pub universes: Vec<UniverseConfig>,

    #[serde(default = "default_cadence_ms")]
    pub cadence_ms: u64,
    #[serde(default = "default_fade_step_ms")]
    pub fade_step_ms: u64,
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default = "default_max_consecutive_send_errors")]
    pub max_consecutive_send_errors: usize,
    #[serde(default = "default_initial_bpm")]
    pub initial_bpm: f64,
}

fn default_initial_bpm() -> f64 {
    120.0
}

impl ShowConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ShowConfig, ConfigError> {
        let path = path.as_ref();
        let into_context = || ConfigError::Context(format!("loading show config from {}", path.display()));

        let contents = std::fs::read_to_string(path).change_context_lazy(into_context)?;

        serde_json::from_str(&contents).change_context_lazy(into_context)
    }

    /// Refresh interval for a universe, or `None` if it doesn't need the keep-alive timer.
    pub fn refresh_ms_for(&self, universe: &UniverseConfig) -> Option<u64> {
        universe.needs_refresh.then_some(self.refresh_ms)
    }
}
