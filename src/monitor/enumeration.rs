// SPDX-License-Identifier: GPL-3.0-only
//! Display enumerator
//!
//! Builds a fresh [`DisplayInfo`] list from the native interface on every
//! call. Enumeration never fails: any native error degrades to a partial or
//! empty list and a warning, so callers can always draw something.

use std::collections::HashMap;

use super::modes;
use super::types::{DisplayCapabilities, DisplayInfo, Orientation, Position};
use crate::config::EngineConfig;
use crate::error::{DisplayError, Result};
use crate::native::{DeviceRecord, DisplayConfigApi};

/// Width reserved on the canvas for a display whose size is unknown
const PLACEHOLDER_WIDTH: i32 = 1920;

/// Enumerate all outputs, active and inactive
pub fn enumerate_displays(api: &dyn DisplayConfigApi, config: &EngineConfig) -> Vec<DisplayInfo> {
    let devices = match api.enumerate_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate display devices");
            return Vec::new();
        }
    };

    let names = match api.friendly_names() {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Friendly monitor names unavailable, using device names");
            HashMap::new()
        }
    };

    let mut displays: Vec<DisplayInfo> = devices
        .iter()
        .map(|device| describe(api, device, &names))
        .collect();

    place_inactive(&mut displays, config.inactive_gap_px);

    debug!(
        "Enumerated {} display(s) on {} ({} enabled)",
        displays.len(),
        api.backend_name(),
        displays.iter().filter(|d| d.is_enabled).count()
    );
    displays
}

fn describe(
    api: &dyn DisplayConfigApi,
    device: &DeviceRecord,
    names: &HashMap<String, String>,
) -> DisplayInfo {
    let id = device.device_name.clone();
    let name = names.get(&id).cloned().unwrap_or_else(|| id.clone());

    let current = match api.current_mode(&id) {
        Ok(current) => current,
        Err(e) => {
            warn!(display_id = %id, error = %e, "Failed to read current mode");
            None
        }
    };
    if device.active && current.is_none() {
        warn!(display_id = %id, "Device reports active but has no current mode");
    }

    let capabilities = current.map(|record| {
        let mut available_modes = match modes::list_modes(api, &id) {
            Ok(list) => list,
            Err(e) => {
                warn!(display_id = %id, error = %e, "Failed to list modes");
                Vec::new()
            }
        };
        if available_modes.is_empty() {
            warn!(
                display_id = %id,
                "Active display enumerated no modes, reporting only its current mode"
            );
            available_modes.push(record.mode);
        }
        DisplayCapabilities {
            current_mode: record.mode,
            resolutions: modes::resolution_groups(&available_modes),
            available_modes,
        }
    });

    DisplayInfo {
        id,
        name,
        current_mode: current.map(|r| r.mode),
        position: current.map(|r| r.position).unwrap_or_default(),
        orientation: current.map(|r| r.orientation).unwrap_or(Orientation::Landscape),
        is_primary: device.primary && current.is_some(),
        is_enabled: current.is_some(),
        capabilities,
    }
}

/// Give inactive displays non-overlapping positions right of the active ones
pub fn place_inactive(displays: &mut [DisplayInfo], gap: i32) {
    let mut next_x = displays
        .iter()
        .filter(|d| d.is_enabled)
        .map(DisplayInfo::right_edge)
        .max()
        .unwrap_or(0)
        .saturating_add(gap);

    for display in displays.iter_mut().filter(|d| !d.is_enabled) {
        display.position = Position::new(next_x, 0);
        next_x = next_x.saturating_add(PLACEHOLDER_WIDTH).saturating_add(gap);
    }
}

/// Look a display up by id in an enumeration result
pub fn find<'a>(displays: &'a [DisplayInfo], id: &str) -> Result<&'a DisplayInfo> {
    displays
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| DisplayError::NotFound(id.to_string()))
}
