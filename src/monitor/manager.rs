// SPDX-License-Identifier: GPL-3.0-only
//! Display configuration engine facade
//!
//! [`DisplayManager`] is what callers (CLI, GUI, hotkey handlers) talk to. It
//! owns the native interface, the state cache, the strategy tracker and the
//! engine config, and exposes every engine operation as an async method.
//!
//! # Thread Safety
//!
//! Native display-configuration calls are not safe to mutate concurrently, so
//! every mutating operation (mode apply, enable/disable, primary change)
//! holds one process-wide lock:
//! - The lock is a global singleton, shared by every `DisplayManager` in the
//!   process, even ones built around different native interfaces
//! - Reads (enumeration, mode listing, cache lookups) never take it
//! - Native calls run on tokio's blocking pool so async callers are never
//!   stalled by a slow driver
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use display_topology_control::config::EngineConfig;
//! use display_topology_control::monitor::DisplayManager;
//! use display_topology_control::native::simulated::SimulatedDisplayApi;
//!
//! # async fn example() {
//! let manager = DisplayManager::new(
//!     Arc::new(SimulatedDisplayApi::two_display_rig()),
//!     EngineConfig::default(),
//! );
//!
//! for display in manager.enumerate().await {
//!     println!("{} enabled: {}", display.id, display.is_enabled);
//! }
//! let outcome = manager.set_enabled("DISPLAY2", false).await;
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;

use super::applier::{self, ApplyOutcome};
use super::enumeration;
use super::modes;
use super::test_mode::{self, TestModeHandle, TestModeOutcome};
use super::types::{DisplayInfo, DisplayMode, Orientation};
use crate::config::EngineConfig;
use crate::error::{DisplayError, EnableError, ModeError, Result};
use crate::native::DisplayConfigApi;
use crate::state_cache::{CachedDisplayState, StateCache};
use crate::strategy::{
    EnableOutcome, Orchestrator, Strategy, StrategyClass, StrategyExecutionResult,
    StrategyTracker,
};

/// Global mutation lock
///
/// All engine instances share it, so two managers in one process can never
/// interleave mutating native calls.
static MUTATION_LOCK: Lazy<Arc<tokio::sync::Mutex<()>>> =
    Lazy::new(|| Arc::new(tokio::sync::Mutex::new(())));

/// Shared engine handle
///
/// Cheap to clone; clones share the native interface, cache and tracker.
#[derive(Clone)]
pub struct DisplayManager {
    api: Arc<dyn DisplayConfigApi>,
    cache: Arc<StateCache>,
    tracker: Arc<Mutex<StrategyTracker>>,
    config: Arc<EngineConfig>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for DisplayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayManager")
            .field("backend", &self.api.backend_name())
            .field("state_file", &self.cache.path())
            .finish()
    }
}

impl DisplayManager {
    /// Create an engine over `api`, loading the state cache the config points at
    pub fn new(api: Arc<dyn DisplayConfigApi>, config: EngineConfig) -> Self {
        let cache = StateCache::open(config.state_file_path());
        Self::with_cache(api, config, cache)
    }

    pub fn with_cache(api: Arc<dyn DisplayConfigApi>, config: EngineConfig, cache: StateCache) -> Self {
        info!(
            "Display engine on {} backend, state cache at {}",
            api.backend_name(),
            cache.path().display()
        );
        let tracker = StrategyTracker::new(config.strategy_history_cap, config.strategy_min_samples);
        Self {
            api,
            cache: Arc::new(cache),
            tracker: Arc::new(Mutex::new(tracker)),
            config: Arc::new(config),
            lock: MUTATION_LOCK.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run native calls on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DisplayManager) -> Result<T> + Send + 'static,
    {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || f(&manager))
            .await
            .map_err(|e| DisplayError::TaskJoin(e.to_string()))?
    }

    /// Run mutating native calls on the blocking pool, under the mutation lock
    ///
    /// The guard moves into the blocking task, so the lock is held until the
    /// native calls finish even if the caller stops waiting.
    async fn mutating<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DisplayManager) -> Result<T> + Send + 'static,
    {
        let guard = self.lock.clone().lock_owned().await;
        let manager = self.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f(&manager)
        })
        .await
        .map_err(|e| DisplayError::TaskJoin(e.to_string()))?
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(&*self.api, &self.cache, &self.tracker, &self.config)
    }

    /// Every output, active or not. Never fails; see the enumerator.
    pub async fn enumerate(&self) -> Vec<DisplayInfo> {
        self.blocking(|m| Ok(enumeration::enumerate_displays(&*m.api, &m.config)))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Enumeration task failed");
                Vec::new()
            })
    }

    pub async fn list_modes(&self, id: &str) -> Result<Vec<DisplayMode>> {
        let id = id.to_string();
        self.blocking(move |m| modes::list_modes(&*m.api, &id)).await
    }

    pub async fn apply_mode(
        &self,
        id: &str,
        mode: DisplayMode,
        orientation: Orientation,
    ) -> std::result::Result<ApplyOutcome, ModeError> {
        let id = id.to_string();
        self.mutating(move |m| applier::apply_mode(&*m.api, &id, &mode, orientation))
            .await
    }

    pub async fn set_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> std::result::Result<EnableOutcome, EnableError> {
        let id = id.to_string();
        self.mutating(move |m| m.orchestrator().set_enabled(&id, enabled))
            .await
    }

    pub async fn set_primary(&self, id: &str) -> std::result::Result<(), ModeError> {
        let id = id.to_string();
        self.mutating(move |m| applier::set_primary(&*m.api, &id)).await
    }

    /// Cache the current geometry of `id`; false if it is unknown or disabled
    pub async fn save_state(&self, id: &str) -> bool {
        let displays = self.enumerate().await;
        match enumeration::find(&displays, id) {
            Ok(display) => self.cache.save(display),
            Err(e) => {
                warn!(display_id = %id, error = %e, "Cannot cache state");
                false
            }
        }
    }

    pub fn cached_state(&self, id: &str) -> Option<CachedDisplayState> {
        self.cache.load(id)
    }

    pub fn cached_states(&self) -> Vec<CachedDisplayState> {
        self.cache.entries()
    }

    pub fn strategy_history(&self) -> Vec<StrategyExecutionResult> {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .history()
    }

    pub fn recommend_order(&self, class: StrategyClass) -> Vec<Strategy> {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recommend_order(class)
    }

    /// Apply a mode for `duration`, then revert to the original one
    ///
    /// Runs in the background; `on_complete` fires once the original mode is
    /// back (or reverting failed). Cancelling through the handle reverts early.
    pub fn test_mode<F>(
        &self,
        id: &str,
        mode: DisplayMode,
        orientation: Orientation,
        duration: Duration,
        on_complete: F,
    ) -> TestModeHandle
    where
        F: FnOnce(&Result<TestModeOutcome>) + Send + 'static,
    {
        test_mode::spawn(self.clone(), id.to_string(), mode, orientation, duration, on_complete)
    }
}
