// SPDX-License-Identifier: GPL-3.0-only
//! Multi-monitor display configuration engine
//!
//! Enumerates outputs, changes modes, and enables or disables outputs through
//! a non-transactional native display-configuration interface. Enable and
//! disable requests run through ranked fallback strategies with verification,
//! and the geometry of a disabled output is cached so it can be restored.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod monitor;
pub mod native;
pub mod state_cache;
pub mod strategy;

pub use config::EngineConfig;
pub use error::{DisplayError, Result};
pub use monitor::{DisplayId, DisplayInfo, DisplayManager, DisplayMode, Orientation, Position};
pub use strategy::{EnableOutcome, Strategy, StrategyClass};
