// SPDX-License-Identifier: GPL-3.0-only
//! Enable/disable orchestrator
//!
//! A request walks an ordered strategy list: each strategy gets one attempt,
//! followed by verification (re-enumerate after a settle delay and check the
//! display's enabled state). The first verified strategy wins. Caller errors
//! end the request at once; driver and transient failures move on to the next
//! strategy. Every attempt is recorded with the tracker, so the next request
//! can lead with whatever has been working.
//!
//! All calls here block; the engine facade runs them on a blocking worker
//! while holding the process-wide mutation lock.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::tracker::{StrategyExecutionResult, StrategyTracker};
use super::{Strategy, StrategyClass};
use crate::config::EngineConfig;
use crate::error::{DisplayError, EnableError, StrategyAttempt};
use crate::monitor::{
    DisplayInfo, DisplayMode, Orientation, Position, applier, enumerate_displays, find, modes,
    paths,
};
use crate::native::{
    ApplyFlags, DisplayConfigApi, FieldMask, ModeRecord, QueryScope, TopologyFlags, read_topology,
};
use crate::state_cache::{CachedDisplayState, StateCache};

/// Positions closer than this count as unchanged
const POSITION_TOLERANCE_PX: u32 = 1;

type Result<T> = std::result::Result<T, EnableError>;

/// Result of a successful enable/disable request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum EnableOutcome {
    Enabled { strategy: Strategy },
    AlreadyEnabled,
    Disabled { strategy: Strategy },
    AlreadyDisabled,
    /// Every disable strategy was refused; the display stays as it was
    DisableDeclined { attempts: Vec<StrategyAttempt> },
}

/// What a strategy did
enum Step {
    /// Issued its native calls; verification decides the outcome
    Applied,
    /// Had nothing to try (not counted as an attempt)
    Skipped(&'static str),
}

pub struct Orchestrator<'a> {
    api: &'a dyn DisplayConfigApi,
    cache: &'a StateCache,
    tracker: &'a Mutex<StrategyTracker>,
    config: &'a EngineConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        api: &'a dyn DisplayConfigApi,
        cache: &'a StateCache,
        tracker: &'a Mutex<StrategyTracker>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            api,
            cache,
            tracker,
            config,
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<EnableOutcome> {
        if enabled {
            self.enable(id)
        } else {
            self.disable(id)
        }
    }

    fn enumerate(&self) -> Vec<DisplayInfo> {
        enumerate_displays(self.api, self.config)
    }

    fn order(&self, class: StrategyClass) -> Vec<Strategy> {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recommend_order(class)
    }

    fn record(&self, result: StrategyExecutionResult) {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(result);
    }

    pub fn enable(&self, id: &str) -> Result<EnableOutcome> {
        let displays = self.enumerate();
        let display = find(&displays, id)?;
        if display.is_enabled {
            debug!(display_id = %id, "Display already enabled");
            return Ok(EnableOutcome::AlreadyEnabled);
        }

        let order = self.order(StrategyClass::Enable);
        info!(display_id = %id, order = ?order, "Enabling display");

        match self.run(id, &order, true)? {
            Ok(strategy) => {
                if strategy != Strategy::RestoreFromCache {
                    self.reconcile_with_cache(id);
                }
                Ok(EnableOutcome::Enabled { strategy })
            }
            Err(attempts) => {
                error!(display_id = %id, "Every enable strategy failed");
                Err(DisplayError::AllStrategiesFailed(attempts))
            }
        }
    }

    pub fn disable(&self, id: &str) -> Result<EnableOutcome> {
        let displays = self.enumerate();
        let display = find(&displays, id)?;
        if !display.is_enabled {
            debug!(display_id = %id, "Display already disabled");
            return Ok(EnableOutcome::AlreadyDisabled);
        }
        if displays.iter().filter(|d| d.is_enabled).count() <= 1 {
            warn!(display_id = %id, "Refusing to disable the last enabled display");
            return Err(DisplayError::LastDisplayDisableRejected(id.to_string()));
        }

        // Recoverable state goes to disk before anything can go wrong
        if let Some(state) = CachedDisplayState::capture(display) {
            if let Err(e) = self.cache.store(state) {
                error!(display_id = %id, error = %e, "Cannot persist display state, not disabling");
                return Err(e);
            }
            debug!(display_id = %id, "Cached display state before disabling");
        }

        let promoted = display.is_primary && self.promote_replacement(id, &displays);

        let order = self.order(StrategyClass::Disable);
        info!(display_id = %id, order = ?order, "Disabling display");

        let attempts = match self.run(id, &order, false) {
            Ok(Ok(strategy)) => return Ok(EnableOutcome::Disabled { strategy }),
            Ok(Err(attempts)) => attempts,
            Err(e) => {
                if promoted {
                    self.reclaim_primary(id);
                }
                return Err(e);
            }
        };
        warn!(
            display_id = %id,
            attempts = attempts.len(),
            "Platform refused to disable the display, leaving it enabled"
        );
        if promoted {
            self.reclaim_primary(id);
        }
        Ok(EnableOutcome::DisableDeclined { attempts })
    }

    /// Try `order` until one strategy verifies
    ///
    /// The outer error is a short-circuiting caller error; the inner one
    /// carries every failed attempt once the list is exhausted.
    fn run(
        &self,
        id: &str,
        order: &[Strategy],
        enable: bool,
    ) -> Result<std::result::Result<Strategy, Vec<StrategyAttempt>>> {
        let mut attempts = Vec::new();

        for &strategy in order {
            let started = Instant::now();
            let outcome = self
                .attempt(strategy, id)
                .and_then(|step| match step {
                    Step::Applied => self.verify(id, enable).map(|()| Step::Applied),
                    skipped => Ok(skipped),
                });
            let elapsed = started.elapsed();

            match outcome {
                Ok(Step::Skipped(reason)) => {
                    debug!(display_id = %id, strategy = %strategy, "Strategy skipped: {}", reason);
                }
                Ok(Step::Applied) => {
                    info!(
                        display_id = %id,
                        strategy = %strategy,
                        duration_ms = elapsed.as_millis() as u64,
                        "Strategy succeeded"
                    );
                    self.record(StrategyExecutionResult::succeeded(strategy, id, elapsed));
                    return Ok(Ok(strategy));
                }
                Err(e) => {
                    warn!(
                        display_id = %id,
                        strategy = %strategy,
                        duration_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "Strategy failed"
                    );
                    self.record(StrategyExecutionResult::failed(strategy, id, elapsed, &e));
                    if e.short_circuits() {
                        return Err(e);
                    }
                    attempts.push(StrategyAttempt {
                        strategy,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(Err(attempts))
    }

    fn attempt(&self, strategy: Strategy, id: &str) -> Result<Step> {
        match strategy {
            Strategy::ActivatePath => self.set_path_active(id, true),
            Strategy::ForceExtend => self.force_extend(),
            Strategy::RelaxedModeReenumeration => self.relaxed_mode_set(id),
            Strategy::RestoreFromCache => self.restore_from_cache(id),
            Strategy::AutoDetectMode => self.auto_detect_mode(id),
            Strategy::DeactivatePath => self.set_path_active(id, false),
            Strategy::DetachViaModeSet => self.detach(id),
        }
    }

    /// Poll until the display reports the expected state
    fn verify(&self, id: &str, enabled: bool) -> Result<()> {
        let settle = Duration::from_millis(self.config.settle_delay_ms);
        let polls = self.config.verify_attempts.max(1);
        for poll in 1..=polls {
            if !settle.is_zero() {
                std::thread::sleep(settle);
            }
            // A display that vanished from enumeration counts as disabled
            let state = self
                .enumerate()
                .iter()
                .find(|d| d.id == id)
                .is_some_and(|d| d.is_enabled);
            if state == enabled {
                return Ok(());
            }
            debug!(display_id = %id, poll, "Display not yet in the requested state");
        }
        Err(DisplayError::Transient(format!(
            "{id} still {} after {polls} check(s)",
            if enabled { "disabled" } else { "enabled" }
        )))
    }

    /// Flip the display's topology path, validate, then apply
    fn set_path_active(&self, id: &str, active: bool) -> Result<Step> {
        let mut topology = read_topology(self.api, QueryScope::AllPaths)?;
        let (index, heuristic) = {
            let resolved = paths::resolve(id, &topology.paths)?;
            (resolved.index, resolved.heuristic)
        };
        debug!(display_id = %id, index, heuristic = ?heuristic, "Resolved topology path");

        let path = &mut topology.paths[index];
        if active && !path.target_available {
            return Err(DisplayError::Transient(format!(
                "target of {id} is not available"
            )));
        }
        path.active = active;

        self.api
            .apply_topology(Some(&topology), TopologyFlags::VALIDATE | TopologyFlags::USE_SUPPLIED)?;
        self.api.apply_topology(
            Some(&topology),
            TopologyFlags::APPLY
                | TopologyFlags::USE_SUPPLIED
                | TopologyFlags::ALLOW_CHANGES
                | TopologyFlags::SAVE_TO_DATABASE,
        )?;
        Ok(Step::Applied)
    }

    fn force_extend(&self) -> Result<Step> {
        self.api
            .apply_topology(None, TopologyFlags::APPLY | TopologyFlags::TOPOLOGY_EXTEND)?;
        Ok(Step::Applied)
    }

    /// Set a catalog mode directly, skipping the dry run
    fn relaxed_mode_set(&self, id: &str) -> Result<Step> {
        let catalog = modes::list_modes(self.api, id)?;
        let mode = self
            .cache
            .load(id)
            .map(|cached| cached.resolution)
            .filter(|mode| catalog.iter().any(|m| m.same_timing(mode)))
            .or_else(|| modes::best_mode(&catalog))
            .ok_or_else(|| DisplayError::DriverRejected {
                code: -1,
                message: format!("{id} enumerates no modes"),
            })?;

        let record = self.record_for(id, &mode, self.adjacent_position(id), Orientation::Landscape)?;
        self.api.set_mode(
            id,
            &record,
            FieldMask::RESOLUTION | FieldMask::FREQUENCY | FieldMask::POSITION,
            ApplyFlags::UPDATE_REGISTRY,
        )?;
        Ok(Step::Applied)
    }

    fn restore_from_cache(&self, id: &str) -> Result<Step> {
        let Some(cached) = self.cache.load(id) else {
            return Ok(Step::Skipped("no cached state"));
        };
        let catalog = modes::list_modes(self.api, id)?;
        if !catalog.iter().any(|m| m.same_timing(&cached.resolution)) {
            return Ok(Step::Skipped("cached mode no longer offered"));
        }

        let record = self.record_for(id, &cached.resolution, cached.position, cached.orientation)?;
        let fields = FieldMask::RESOLUTION
            | FieldMask::FREQUENCY
            | FieldMask::POSITION
            | FieldMask::ORIENTATION;
        let mut flags = ApplyFlags::UPDATE_REGISTRY;
        if cached.is_primary {
            flags |= ApplyFlags::SET_PRIMARY;
        }

        self.api.set_mode(id, &record, fields, flags | ApplyFlags::TEST)?;
        self.api.set_mode(id, &record, fields, flags)?;
        Ok(Step::Applied)
    }

    /// Best mode first, then the preferred list; commit the first that validates
    fn auto_detect_mode(&self, id: &str) -> Result<Step> {
        let catalog = modes::list_modes(self.api, id)?;
        let mut candidates: Vec<DisplayMode> = modes::best_mode(&catalog).into_iter().collect();
        for preferred in &self.config.preferred_modes {
            let offered = catalog.iter().any(|m| m.same_timing(preferred));
            if offered && !candidates.iter().any(|c| c.same_timing(preferred)) {
                candidates.push(*preferred);
            }
        }

        let position = self.adjacent_position(id);
        let fields = FieldMask::RESOLUTION | FieldMask::FREQUENCY | FieldMask::POSITION;
        for mode in &candidates {
            let record = self.record_for(id, mode, position, Orientation::Landscape)?;
            match self.api.set_mode(id, &record, fields, ApplyFlags::TEST) {
                Ok(_) => {
                    debug!(display_id = %id, "Auto-detected mode {}", mode);
                    self.api.set_mode(id, &record, fields, ApplyFlags::UPDATE_REGISTRY)?;
                    return Ok(Step::Applied);
                }
                Err(e) => {
                    let e = DisplayError::from(e);
                    if e.short_circuits() {
                        return Err(e);
                    }
                    debug!(display_id = %id, error = %e, "Candidate mode {} rejected", mode);
                }
            }
        }

        Err(DisplayError::DriverRejected {
            code: -1,
            message: format!("none of {} candidate mode(s) validated", candidates.len()),
        })
    }

    fn detach(&self, id: &str) -> Result<Step> {
        let record = ModeRecord::detach();
        let fields = FieldMask::RESOLUTION | FieldMask::POSITION;
        self.api.set_mode(id, &record, fields, ApplyFlags::TEST)?;
        self.api.set_mode(id, &record, fields, ApplyFlags::UPDATE_REGISTRY)?;
        Ok(Step::Applied)
    }

    /// Native record for `mode`, placed at `position`
    fn record_for(
        &self,
        id: &str,
        mode: &DisplayMode,
        position: Position,
        orientation: Orientation,
    ) -> Result<ModeRecord> {
        Ok(match modes::find_exact(self.api, id, mode)? {
            Some(exact) => ModeRecord {
                position,
                orientation,
                ..exact
            },
            None => ModeRecord::synthesized(*mode, position, orientation),
        })
    }

    /// Just right of every other enabled display
    fn adjacent_position(&self, id: &str) -> Position {
        let x = self
            .enumerate()
            .iter()
            .filter(|d| d.is_enabled && d.id != id)
            .map(DisplayInfo::right_edge)
            .max()
            .unwrap_or(0);
        Position::new(x, 0)
    }

    /// Hand the primary role to another enabled display; true if it moved
    fn promote_replacement(&self, id: &str, displays: &[DisplayInfo]) -> bool {
        let Some(next) = displays.iter().find(|d| d.is_enabled && d.id != id) else {
            return false;
        };
        match applier::set_primary(self.api, &next.id) {
            Ok(()) => {
                info!(display_id = %id, new_primary = %next.id, "Moved primary role");
                true
            }
            Err(e) => {
                warn!(display_id = %id, error = %e, "Failed to move primary role");
                false
            }
        }
    }

    /// Give the primary role back after a disable that did not happen
    ///
    /// Origin pinning shifts every display by the inverse of the promotion's
    /// offset, so the layout ends up where it started.
    fn reclaim_primary(&self, id: &str) {
        match applier::set_primary(self.api, id) {
            Ok(()) => info!(display_id = %id, "Restored primary role"),
            Err(e) => error!(display_id = %id, error = %e, "Failed to restore primary role"),
        }
    }

    /// Re-apply cached geometry after an enable that landed elsewhere
    fn reconcile_with_cache(&self, id: &str) {
        let Some(cached) = self.cache.load(id) else {
            return;
        };
        let displays = self.enumerate();
        let Some(current) = displays.iter().find(|d| d.id == id && d.is_enabled) else {
            return;
        };
        let Some(mode) = current.current_mode else {
            return;
        };
        if let Err(e) = self.reconcile(id, &cached, current, &mode) {
            warn!(display_id = %id, error = %e, "Failed to restore cached geometry");
        }
    }

    fn reconcile(
        &self,
        id: &str,
        cached: &CachedDisplayState,
        current: &DisplayInfo,
        mode: &DisplayMode,
    ) -> Result<()> {
        let same_mode = mode.same_timing(&cached.resolution);
        let same_place = current.position.distance(&cached.position) <= POSITION_TOLERANCE_PX
            && current.orientation == cached.orientation;
        if same_mode && same_place {
            return Ok(());
        }

        let catalog = modes::list_modes(self.api, id)?;
        if !catalog.iter().any(|m| m.same_timing(&cached.resolution)) {
            debug!(display_id = %id, "Cached mode no longer offered, keeping current geometry");
            return Ok(());
        }

        debug!(display_id = %id, "Restoring cached geometry after enable");
        let record = self.record_for(id, &cached.resolution, cached.position, cached.orientation)?;
        // Resolution and placement go in separate calls, as the applier does
        if !same_mode {
            self.api.set_mode(
                id,
                &record,
                FieldMask::RESOLUTION | FieldMask::FREQUENCY,
                ApplyFlags::UPDATE_REGISTRY,
            )?;
        }
        if !same_place {
            self.api.set_mode(
                id,
                &record,
                FieldMask::POSITION | FieldMask::ORIENTATION,
                ApplyFlags::UPDATE_REGISTRY,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::simulated::{DriverQuirks, SimOp, SimulatedDisplayApi, SimulatedOutput};
    use crate::native::{NativeError, NativeErrorKind};

    struct Fixture {
        api: SimulatedDisplayApi,
        cache: StateCache,
        tracker: Mutex<StrategyTracker>,
        config: EngineConfig,
    }

    impl Fixture {
        fn new(name: &str, api: SimulatedDisplayApi) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "dtc-orchestrator-{}-{}",
                std::process::id(),
                name
            ));
            let _ = std::fs::remove_dir_all(&dir);
            let config = EngineConfig {
                settle_delay_ms: 0,
                ..EngineConfig::default()
            };
            Self {
                api,
                cache: StateCache::open(dir.join("display_state.json")),
                tracker: Mutex::new(StrategyTracker::new(
                    config.strategy_history_cap,
                    config.strategy_min_samples,
                )),
                config,
            }
        }

        fn orchestrator(&self) -> Orchestrator<'_> {
            Orchestrator::new(&self.api, &self.cache, &self.tracker, &self.config)
        }

        fn display(&self, id: &str) -> DisplayInfo {
            enumerate_displays(&self.api, &self.config)
                .into_iter()
                .find(|d| d.id == id)
                .unwrap()
        }
    }

    fn rig_with_dormant_secondary() -> SimulatedDisplayApi {
        SimulatedDisplayApi::new(vec![
            SimulatedOutput::new("DISPLAY1")
                .modes([DisplayMode::new(1920, 1080, 60)])
                .driving(DisplayMode::new(1920, 1080, 60), Position::default())
                .primary(),
            SimulatedOutput::new("DISPLAY2").modes([
                DisplayMode::new(2560, 1440, 144),
                DisplayMode::new(1920, 1080, 60),
            ]),
        ])
    }

    #[test]
    fn test_disable_then_enable_secondary() {
        let fx = Fixture::new("scenario", SimulatedDisplayApi::two_display_rig());
        let orch = fx.orchestrator();

        let outcome = orch.set_enabled("DISPLAY2", false).unwrap();
        assert_eq!(
            outcome,
            EnableOutcome::Disabled {
                strategy: Strategy::DeactivatePath
            }
        );
        let cached = fx.cache.load("DISPLAY2").unwrap();
        assert_eq!(cached.resolution, DisplayMode::new(2560, 1440, 144));
        let enabled = enumerate_displays(&fx.api, &fx.config)
            .into_iter()
            .filter(|d| d.is_enabled)
            .count();
        assert_eq!(enabled, 1);

        let outcome = orch.set_enabled("DISPLAY2", true).unwrap();
        assert!(matches!(outcome, EnableOutcome::Enabled { .. }));
        let secondary = fx.display("DISPLAY2");
        assert!(secondary.is_enabled);
        assert_eq!(secondary.current_mode, Some(DisplayMode::new(2560, 1440, 144)));
        assert_eq!(secondary.position, Position::new(1920, 0));
    }

    #[test]
    fn test_enable_twice_is_idempotent() {
        let fx = Fixture::new("idempotent", rig_with_dormant_secondary());
        let orch = fx.orchestrator();
        assert!(matches!(
            orch.enable("DISPLAY2").unwrap(),
            EnableOutcome::Enabled { .. }
        ));
        let mutations = fx.api.mutation_count();
        assert_eq!(orch.enable("DISPLAY2").unwrap(), EnableOutcome::AlreadyEnabled);
        assert_eq!(fx.api.mutation_count(), mutations);
    }

    #[test]
    fn test_last_display_cannot_be_disabled() {
        let api = SimulatedDisplayApi::new(vec![
            SimulatedOutput::new("DISPLAY1")
                .modes([DisplayMode::new(1920, 1080, 60)])
                .driving(DisplayMode::new(1920, 1080, 60), Position::default())
                .primary(),
        ]);
        let fx = Fixture::new("last", api);
        let err = fx.orchestrator().disable("DISPLAY1").unwrap_err();
        assert!(matches!(err, DisplayError::LastDisplayDisableRejected(_)));
        assert_eq!(fx.api.mutation_count(), 0);
        assert!(fx.cache.load("DISPLAY1").is_none());
    }

    #[test]
    fn test_unknown_display_short_circuits() {
        let fx = Fixture::new("unknown", SimulatedDisplayApi::two_display_rig());
        let err = fx.orchestrator().enable("DISPLAY7").unwrap_err();
        assert!(matches!(err, DisplayError::NotFound(_)));
        assert!(fx.tracker.lock().unwrap().history().is_empty());
    }

    #[test]
    fn test_falls_through_to_extend() {
        let api = rig_with_dormant_secondary().with_quirks(DriverQuirks {
            reject_path_activation: true,
            ..DriverQuirks::default()
        });
        let fx = Fixture::new("extend", api);
        let outcome = fx.orchestrator().enable("DISPLAY2").unwrap();
        assert_eq!(
            outcome,
            EnableOutcome::Enabled {
                strategy: Strategy::ForceExtend
            }
        );
        let history = fx.tracker.lock().unwrap().history();
        assert_eq!(history.len(), 2);
        assert!(!history[0].success);
        assert_eq!(history[0].strategy, Strategy::ActivatePath);
        assert!(history[1].success);
    }

    #[test]
    fn test_cache_restore_after_fallback_enable() {
        // Secondary sits below the primary; fallbacks would place it to the right
        let api = SimulatedDisplayApi::new(vec![
            SimulatedOutput::new("DISPLAY1")
                .modes([DisplayMode::new(1920, 1080, 60)])
                .driving(DisplayMode::new(1920, 1080, 60), Position::default())
                .primary(),
            SimulatedOutput::new("DISPLAY2")
                .modes([
                    DisplayMode::new(2560, 1440, 144),
                    DisplayMode::new(1920, 1080, 60),
                ])
                .driving(DisplayMode::new(1920, 1080, 60), Position::new(0, 1080)),
        ])
        .with_quirks(DriverQuirks {
            reject_path_activation: true,
            reject_extend: true,
            strict_field_mask: true,
            ..DriverQuirks::default()
        });
        let fx = Fixture::new("restore", api);
        let orch = fx.orchestrator();

        orch.disable("DISPLAY2").unwrap();
        let outcome = orch.enable("DISPLAY2").unwrap();
        assert_eq!(
            outcome,
            EnableOutcome::Enabled {
                strategy: Strategy::RelaxedModeReenumeration
            }
        );

        let secondary = fx.display("DISPLAY2");
        assert_eq!(secondary.current_mode, Some(DisplayMode::new(1920, 1080, 60)));
        assert!(secondary.position.distance(&Position::new(0, 1080)) <= POSITION_TOLERANCE_PX);
    }

    #[test]
    fn test_restore_from_cache_when_relaxed_set_fails() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.update_quirks(|q| {
            q.reject_path_activation = true;
            q.reject_extend = true;
        });
        let fx = Fixture::new("cache-strategy", api);
        let orch = fx.orchestrator();
        orch.disable("DISPLAY2").unwrap();

        fx.api.fail_next(
            SimOp::SetMode,
            NativeError::new(NativeErrorKind::Rejected, -1, "mode set refused"),
        );
        let outcome = orch.enable("DISPLAY2").unwrap();
        assert_eq!(
            outcome,
            EnableOutcome::Enabled {
                strategy: Strategy::RestoreFromCache
            }
        );
        let secondary = fx.display("DISPLAY2");
        assert_eq!(secondary.current_mode, Some(DisplayMode::new(2560, 1440, 144)));
        assert_eq!(secondary.position, Position::new(1920, 0));
    }

    #[test]
    fn test_all_strategies_failed_lists_attempts() {
        let api = rig_with_dormant_secondary().with_quirks(DriverQuirks {
            reject_path_activation: true,
            reject_extend: true,
            ..DriverQuirks::default()
        });
        // Relaxed set, then both auto-detect candidates
        for _ in 0..3 {
            api.fail_next(
                SimOp::SetMode,
                NativeError::new(NativeErrorKind::Rejected, -1, "mode set refused"),
            );
        }
        let fx = Fixture::new("exhausted", api);
        let err = fx.orchestrator().enable("DISPLAY2").unwrap_err();
        let DisplayError::AllStrategiesFailed(attempts) = err else {
            panic!("expected AllStrategiesFailed, got {err:?}");
        };
        let tried: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
        // No cache entry, so the restore strategy is skipped
        assert_eq!(
            tried,
            vec![
                Strategy::ActivatePath,
                Strategy::ForceExtend,
                Strategy::RelaxedModeReenumeration,
                Strategy::AutoDetectMode,
            ]
        );
        assert_eq!(fx.tracker.lock().unwrap().history().len(), 4);
    }

    #[test]
    fn test_permission_denied_stops_the_request() {
        let api = rig_with_dormant_secondary();
        api.fail_next(
            SimOp::QueryTopology,
            NativeError::new(NativeErrorKind::AccessDenied, 5, "access denied"),
        );
        let fx = Fixture::new("denied", api);
        let err = fx.orchestrator().enable("DISPLAY2").unwrap_err();
        assert!(matches!(err, DisplayError::PermissionDenied(_)));
        assert_eq!(fx.tracker.lock().unwrap().history().len(), 1);
    }

    #[test]
    fn test_declined_disable_is_not_an_error() {
        let api = SimulatedDisplayApi::two_display_rig().with_quirks(DriverQuirks {
            reject_path_deactivation: true,
            reject_mode_detach: true,
            ..DriverQuirks::default()
        });
        let fx = Fixture::new("declined", api);
        let outcome = fx.orchestrator().disable("DISPLAY2").unwrap();
        let EnableOutcome::DisableDeclined { attempts } = outcome else {
            panic!("expected DisableDeclined");
        };
        assert_eq!(attempts.len(), 2);
        assert!(fx.display("DISPLAY2").is_enabled);
        // State was cached before the attempts
        assert!(fx.cache.load("DISPLAY2").is_some());
    }

    #[test]
    fn test_declined_primary_disable_keeps_layout() {
        let api = SimulatedDisplayApi::two_display_rig().with_quirks(DriverQuirks {
            reject_path_deactivation: true,
            reject_mode_detach: true,
            ..DriverQuirks::default()
        });
        let fx = Fixture::new("declined-primary", api);
        let outcome = fx.orchestrator().disable("DISPLAY1").unwrap();
        assert!(matches!(outcome, EnableOutcome::DisableDeclined { .. }));

        let primary = fx.display("DISPLAY1");
        assert!(primary.is_enabled);
        assert!(primary.is_primary);
        assert_eq!(primary.position, Position::new(0, 0));
        let secondary = fx.display("DISPLAY2");
        assert!(!secondary.is_primary);
        assert_eq!(secondary.position, Position::new(1920, 0));
    }

    #[test]
    fn test_unwritable_cache_blocks_disable() {
        let fx = Fixture::new("unwritable", SimulatedDisplayApi::two_display_rig());
        // A directory where the state file should be makes every write fail
        std::fs::create_dir_all(fx.cache.path()).unwrap();

        let err = fx.orchestrator().disable("DISPLAY2").unwrap_err();
        assert!(matches!(err, DisplayError::Io(_)));
        assert!(fx.display("DISPLAY2").is_enabled);
        assert!(fx.cache.load("DISPLAY2").is_none());
        assert_eq!(fx.api.mutation_count(), 0);
    }

    #[test]
    fn test_disabling_primary_promotes_another() {
        let fx = Fixture::new("primary", SimulatedDisplayApi::two_display_rig());
        fx.orchestrator().disable("DISPLAY1").unwrap();
        let secondary = fx.display("DISPLAY2");
        assert!(secondary.is_primary);
        assert_eq!(secondary.position, Position::new(0, 0));
        assert!(fx.cache.load("DISPLAY1").unwrap().is_primary);
        assert_eq!(
            fx.orchestrator().disable("DISPLAY1").unwrap(),
            EnableOutcome::AlreadyDisabled
        );
    }

    #[test]
    fn test_ranking_adapts_to_failing_strategy() {
        let api = rig_with_dormant_secondary().with_quirks(DriverQuirks {
            reject_path_activation: true,
            ..DriverQuirks::default()
        });
        let fx = Fixture::new("adaptive", api);
        let orch = fx.orchestrator();

        for _ in 0..fx.config.strategy_min_samples {
            orch.enable("DISPLAY2").unwrap();
            orch.disable("DISPLAY2").unwrap();
        }
        let order = fx.tracker.lock().unwrap().recommend_order(StrategyClass::Enable);
        assert_eq!(order[0], Strategy::ForceExtend);

        // The next request leads with the winner
        orch.enable("DISPLAY2").unwrap();
        let history = fx.tracker.lock().unwrap().history();
        let last = history.last().unwrap();
        assert_eq!(last.strategy, Strategy::ForceExtend);
        assert!(last.success);
    }
}
