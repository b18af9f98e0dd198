// SPDX-License-Identifier: GPL-3.0-only
//! Engine configuration
//!
//! Tuning knobs for verification, strategy ranking and placement, read from
//! `<config_dir>/display-topology-control/config.json`. A missing file means
//! defaults; a malformed one is logged and also falls back to defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::monitor::DisplayMode;

pub const APP_DIR: &str = "display-topology-control";
pub const CONFIG_FILE: &str = "config.json";
pub const STATE_FILE: &str = "display_state.json";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wait before each verification poll, for platforms that apply asynchronously
    pub settle_delay_ms: u64,
    /// Verification polls per strategy attempt
    pub verify_attempts: u32,
    /// Strategy results kept in memory, oldest evicted first
    pub strategy_history_cap: usize,
    /// Observations a strategy needs before ranking may move it
    pub strategy_min_samples: u32,
    /// Horizontal gap between synthetic positions of inactive displays
    pub inactive_gap_px: i32,
    /// Fallback modes tried in order when auto-detecting
    pub preferred_modes: Vec<DisplayMode>,
    pub test_mode_seconds: u64,
    /// Overrides the default state cache location
    pub state_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            verify_attempts: 3,
            strategy_history_cap: 256,
            strategy_min_samples: 3,
            inactive_gap_px: 100,
            preferred_modes: vec![
                DisplayMode::new(1920, 1080, 60),
                DisplayMode::new(1680, 1050, 60),
                DisplayMode::new(1280, 1024, 60),
                DisplayMode::new(1024, 768, 60),
            ],
            test_mode_seconds: 15,
            state_file: None,
        }
    }
}

impl EngineConfig {
    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No user config directory, using default engine config");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No engine config at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read engine config {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("Malformed engine config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Where the state cache lives
    pub fn state_file_path(&self) -> PathBuf {
        if let Some(path) = &self.state_file {
            return path.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join(STATE_FILE)
    }
}
