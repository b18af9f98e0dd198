// SPDX-License-Identifier: GPL-3.0-only
//! Enable/disable strategies, their performance history and the orchestrator
//! that runs them

pub mod orchestrator;
pub mod tracker;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use orchestrator::{EnableOutcome, Orchestrator};
pub use tracker::{StrategyExecutionResult, StrategyStats, StrategyTracker};

/// One concrete algorithm for enabling or disabling a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Flip the display's topology path to active in place
    ActivatePath,
    /// Re-apply the whole topology in extend mode, letting the platform pick paths
    ForceExtend,
    /// Set a catalog mode directly, bypassing topology validation
    RelaxedModeReenumeration,
    /// Re-apply the cached pre-disable geometry
    RestoreFromCache,
    /// Pick the best mode (or a preferred fallback) beside the active outputs
    AutoDetectMode,
    /// Flip the display's topology path to inactive
    DeactivatePath,
    /// Send a zero-size mode record
    DetachViaModeSet,
}

/// Which kind of request a strategy serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyClass {
    Enable,
    Disable,
}

impl StrategyClass {
    /// Order strategies are tried in before any history exists
    pub fn default_order(&self) -> &'static [Strategy] {
        match self {
            StrategyClass::Enable => &[
                Strategy::ActivatePath,
                Strategy::ForceExtend,
                Strategy::RelaxedModeReenumeration,
                Strategy::RestoreFromCache,
                Strategy::AutoDetectMode,
            ],
            StrategyClass::Disable => &[Strategy::DeactivatePath, Strategy::DetachViaModeSet],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ActivatePath => "activate-path",
            Strategy::ForceExtend => "force-extend",
            Strategy::RelaxedModeReenumeration => "relaxed-mode-reenumeration",
            Strategy::RestoreFromCache => "restore-from-cache",
            Strategy::AutoDetectMode => "auto-detect-mode",
            Strategy::DeactivatePath => "deactivate-path",
            Strategy::DetachViaModeSet => "detach-via-mode-set",
        };
        f.write_str(name)
    }
}
