// SPDX-License-Identifier: GPL-3.0-only
//! Mode applier
//!
//! Changes resolution, refresh rate or orientation of one enabled output.
//! The requested mode is checked against the output's mode catalog before any
//! mutating call, every change is dry-run before it is committed, and the
//! result is read back afterwards.

use serde::Serialize;

use super::modes;
use super::types::{DisplayMode, Orientation, Position};
use crate::error::{DisplayError, ModeError};
use crate::native::{ApplyFlags, ApplyStatus, DisplayConfigApi, FieldMask, ModeRecord};

/// Successful mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyOutcome {
    Applied,
    /// Accepted by the driver but pending a restart
    RestartRequired,
}

impl From<ApplyStatus> for ApplyOutcome {
    fn from(status: ApplyStatus) -> Self {
        match status {
            ApplyStatus::Applied => ApplyOutcome::Applied,
            ApplyStatus::RestartRequired => ApplyOutcome::RestartRequired,
        }
    }
}

/// One `set_mode` call of a change
struct Step {
    record: ModeRecord,
    fields: FieldMask,
}

/// Split a change into the calls drivers accept
///
/// A resolution change carries only timing fields: some drivers reject it
/// when position or orientation flags ride along. An orientation change on
/// top of a resolution change therefore goes in a second call.
fn plan(base: &ModeRecord, target: ModeRecord, orientation: Orientation) -> Vec<Step> {
    let resizes = base.mode.resolution() != target.mode.resolution();
    let rotates = base.orientation != orientation;

    let mut record = target;
    record.position = base.position;
    record.orientation = orientation;

    if resizes {
        let mut steps = vec![Step {
            record: ModeRecord {
                orientation: base.orientation,
                ..record
            },
            fields: FieldMask::RESOLUTION | FieldMask::FREQUENCY | FieldMask::BITS_PER_PEL,
        }];
        if rotates {
            steps.push(Step {
                record,
                fields: FieldMask::ORIENTATION,
            });
        }
        steps
    } else {
        let mut fields = FieldMask::FREQUENCY;
        if rotates {
            fields |= FieldMask::ORIENTATION;
        }
        vec![Step { record, fields }]
    }
}

/// Apply `mode` in `orientation` to the enabled output `id`
pub fn apply_mode(
    api: &dyn DisplayConfigApi,
    id: &str,
    mode: &DisplayMode,
    orientation: Orientation,
) -> std::result::Result<ApplyOutcome, ModeError> {
    let catalog = modes::list_modes(api, id)?;
    modes::ensure_supported(&catalog, id, mode)?;

    let base = api
        .current_mode(id)?
        .ok_or_else(|| DisplayError::NotFound(format!("{id} (not enabled)")))?;

    // The platform's own record is preferred; synthesized ones get dropped silently
    let target = match modes::find_exact(api, id, mode)? {
        Some(exact) => exact,
        None => {
            debug!(display_id = %id, "No exact mode record for {}, mutating current record", mode);
            let mut record = base;
            record.mode.width = mode.width;
            record.mode.height = mode.height;
            record.mode.refresh_rate_hz = mode.refresh_rate_hz;
            record
        }
    };

    let steps = plan(&base, target, orientation);

    for step in &steps {
        api.set_mode(id, &step.record, step.fields, ApplyFlags::TEST)
            .map_err(|e| {
                warn!(display_id = %id, error = %e, "Dry run rejected mode {}", mode);
                DisplayError::from(e)
            })?;
    }

    let mut outcome = ApplyOutcome::Applied;
    for (committed, step) in steps.iter().enumerate() {
        match api.set_mode(id, &step.record, step.fields, ApplyFlags::UPDATE_REGISTRY) {
            Ok(ApplyStatus::RestartRequired) => outcome = ApplyOutcome::RestartRequired,
            Ok(ApplyStatus::Applied) => {}
            Err(e) => {
                warn!(display_id = %id, error = %e, "Failed to commit mode {}", mode);
                if committed > 0 {
                    roll_back(api, id, &base);
                }
                return Err(e.into());
            }
        }
    }

    match api.current_mode(id) {
        Ok(Some(actual)) if actual.mode.same_timing(mode) && actual.orientation == orientation => {
            info!(display_id = %id, "Applied {} ({})", mode, orientation);
        }
        Ok(actual) => warn!(
            display_id = %id,
            outcome = ?outcome,
            "Driver accepted {} ({}) but reports {:?}; the switch may be deferred",
            mode,
            orientation,
            actual.map(|r| (r.mode, r.orientation))
        ),
        Err(e) => warn!(display_id = %id, error = %e, "Failed to read back mode"),
    }

    Ok(outcome)
}

/// Put `base` back after a change that committed only some of its steps
fn roll_back(api: &dyn DisplayConfigApi, id: &str, base: &ModeRecord) {
    let current = match api.current_mode(id) {
        Ok(Some(current)) => current,
        Ok(None) => {
            warn!(display_id = %id, "Display went inactive mid-change, nothing to roll back");
            return;
        }
        Err(e) => {
            error!(display_id = %id, error = %e, "Cannot read mode to roll back");
            return;
        }
    };
    for step in plan(&current, *base, base.orientation) {
        if let Err(e) = api.set_mode(id, &step.record, step.fields, ApplyFlags::UPDATE_REGISTRY) {
            error!(display_id = %id, error = %e, "Failed to roll back to {}", base.mode);
            return;
        }
    }
    info!(display_id = %id, "Rolled back to {} ({})", base.mode, base.orientation);
}

/// Make `id` the primary output
///
/// Platforms that pin the primary output to the desktop origin get every
/// other enabled output shifted by the same offset first. The shifts are
/// staged and committed together with the primary change.
pub fn set_primary(api: &dyn DisplayConfigApi, id: &str) -> std::result::Result<(), ModeError> {
    let devices = api.enumerate_devices()?;
    let device = devices
        .iter()
        .find(|d| d.device_name == id)
        .ok_or_else(|| DisplayError::NotFound(id.to_string()))?;
    let mut target = api
        .current_mode(id)?
        .ok_or_else(|| DisplayError::NotFound(format!("{id} (not enabled)")))?;

    if device.primary {
        debug!(display_id = %id, "Already primary");
        return Ok(());
    }

    let mut fields = FieldMask::empty();
    let origin = Position::default();
    if api.primary_requires_origin() && target.position != origin {
        let (dx, dy) = (-target.position.x, -target.position.y);
        for other in devices.iter().filter(|d| d.device_name != id) {
            let Some(mut record) = api.current_mode(&other.device_name)? else {
                continue;
            };
            record.position = Position::new(record.position.x + dx, record.position.y + dy);
            api.set_mode(
                &other.device_name,
                &record,
                FieldMask::POSITION,
                ApplyFlags::UPDATE_REGISTRY | ApplyFlags::NO_RESET,
            )?;
        }
        target.position = origin;
        fields |= FieldMask::POSITION;
    }

    api.set_mode(
        id,
        &target,
        fields,
        ApplyFlags::SET_PRIMARY | ApplyFlags::UPDATE_REGISTRY,
    )?;
    info!(display_id = %id, "Set as primary display");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::simulated::{SimOp, SimulatedDisplayApi, SimulatedOutput};
    use crate::native::{NativeError, NativeErrorKind};

    #[test]
    fn test_round_trip_every_supported_mode() {
        let api = SimulatedDisplayApi::two_display_rig();
        for mode in modes::list_modes(&api, "DISPLAY2").unwrap() {
            apply_mode(&api, "DISPLAY2", &mode, Orientation::Landscape).unwrap();
            let current = api.current_mode("DISPLAY2").unwrap().unwrap();
            assert!(current.mode.same_timing(&mode), "{} != {}", current.mode, mode);
        }
    }

    #[test]
    fn test_unsupported_mode_touches_nothing() {
        let api = SimulatedDisplayApi::new(vec![
            SimulatedOutput::new("DISPLAY1")
                .modes([
                    DisplayMode::new(3840, 2160, 60),
                    DisplayMode::new(2560, 1440, 60),
                ])
                .driving(DisplayMode::new(3840, 2160, 60), Position::default())
                .primary(),
        ]);
        let err = apply_mode(
            &api,
            "DISPLAY1",
            &DisplayMode::new(7680, 4320, 240),
            Orientation::Landscape,
        )
        .unwrap_err();
        assert!(matches!(err, DisplayError::UnsupportedMode { .. }));
        assert_eq!(api.mutation_count(), 0);
    }

    #[test]
    fn test_resize_with_rotation_splits_field_masks() {
        // The rig rejects resolution changes that carry orientation flags
        let api = SimulatedDisplayApi::two_display_rig();
        apply_mode(
            &api,
            "DISPLAY2",
            &DisplayMode::new(1920, 1080, 144),
            Orientation::Portrait,
        )
        .unwrap();
        let out = api.output("DISPLAY2").unwrap();
        assert_eq!(out.mode.resolution(), (1920, 1080));
        assert_eq!(out.orientation, Orientation::Portrait);
        assert_eq!(out.position, Position::new(1920, 0));
    }

    #[test]
    fn test_failed_second_commit_rolls_back() {
        let api = SimulatedDisplayApi::two_display_rig();
        // Two dry runs and the resize commit go through; the rotation commit fails
        api.fail_after(
            SimOp::SetMode,
            3,
            NativeError::new(NativeErrorKind::Busy, 170, "adapter busy"),
        );
        let err = apply_mode(
            &api,
            "DISPLAY2",
            &DisplayMode::new(1920, 1080, 144),
            Orientation::Portrait,
        )
        .unwrap_err();
        assert!(matches!(err, DisplayError::Transient(_)));

        let out = api.output("DISPLAY2").unwrap();
        assert_eq!(out.mode, DisplayMode::new(2560, 1440, 144));
        assert_eq!(out.orientation, Orientation::Landscape);
        assert_eq!(out.position, Position::new(1920, 0));
    }

    #[test]
    fn test_refresh_only_change() {
        let api = SimulatedDisplayApi::two_display_rig();
        let outcome = apply_mode(
            &api,
            "DISPLAY2",
            &DisplayMode::new(2560, 1440, 60),
            Orientation::Landscape,
        )
        .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(api.output("DISPLAY2").unwrap().mode.refresh_rate_hz, 60);
    }

    #[test]
    fn test_deferred_switch_reports_restart() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.update_quirks(|q| q.defer_mode_switch = true);
        let outcome = apply_mode(
            &api,
            "DISPLAY1",
            &DisplayMode::new(1280, 1024, 75),
            Orientation::Landscape,
        )
        .unwrap();
        assert_eq!(outcome, ApplyOutcome::RestartRequired);
        assert_eq!(api.output("DISPLAY1").unwrap().mode, DisplayMode::new(1920, 1080, 60));
    }

    #[test]
    fn test_unknown_and_disabled_displays() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.plug(SimulatedOutput::new("DISPLAY3").modes([DisplayMode::new(1280, 720, 60)]));
        let mode = DisplayMode::new(1280, 720, 60);
        assert!(matches!(
            apply_mode(&api, "DISPLAY9", &mode, Orientation::Landscape),
            Err(DisplayError::NotFound(_))
        ));
        assert!(matches!(
            apply_mode(&api, "DISPLAY3", &mode, Orientation::Landscape),
            Err(DisplayError::NotFound(_))
        ));
        assert_eq!(api.mutation_count(), 0);
    }

    #[test]
    fn test_set_primary_moves_desktop_origin() {
        let api = SimulatedDisplayApi::two_display_rig();
        set_primary(&api, "DISPLAY2").unwrap();

        let primary = api.output("DISPLAY2").unwrap();
        assert!(primary.primary);
        assert_eq!(primary.position, Position::new(0, 0));

        let old = api.output("DISPLAY1").unwrap();
        assert!(!old.primary);
        assert_eq!(old.position, Position::new(-1920, 0));
    }

    #[test]
    fn test_set_primary_is_idempotent() {
        let api = SimulatedDisplayApi::two_display_rig();
        set_primary(&api, "DISPLAY1").unwrap();
        assert_eq!(api.mutation_count(), 0);
    }
}
