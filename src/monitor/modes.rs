// SPDX-License-Identifier: GPL-3.0-only
//! Mode catalog
//!
//! Walks a device's mode list index by index until the native interface
//! reports the end, and answers "does this output offer that mode".

use std::collections::BTreeMap;

use super::types::{DisplayMode, ResolutionGroup};
use crate::error::{DisplayError, Result};
use crate::native::{DisplayConfigApi, ModeRecord};

/// Hard stop for drivers that never report end-of-list
const MAX_MODE_INDEX: usize = 4096;

/// Every distinct, valid mode record of a device, in enumeration order
fn mode_records(api: &dyn DisplayConfigApi, device: &str) -> Result<Vec<ModeRecord>> {
    let mut records: Vec<ModeRecord> = Vec::new();
    for index in 0..MAX_MODE_INDEX {
        let Some(record) = api.mode_at(device, index)? else {
            return Ok(records);
        };
        if !record.mode.is_valid() {
            debug!(display_id = %device, index, "Skipping invalid mode entry {}", record.mode);
            continue;
        }
        if !records.iter().any(|r| r.mode == record.mode) {
            records.push(record);
        }
    }
    warn!(display_id = %device, "Mode list did not end after {} entries", MAX_MODE_INDEX);
    Ok(records)
}

/// List every mode a device supports
pub fn list_modes(api: &dyn DisplayConfigApi, device: &str) -> Result<Vec<DisplayMode>> {
    Ok(mode_records(api, device)?
        .into_iter()
        .map(|r| r.mode)
        .collect())
}

/// Map each resolution to its ascending, deduplicated refresh rates
pub fn grouped_resolutions(modes: &[DisplayMode]) -> BTreeMap<(u32, u32), Vec<u32>> {
    let mut groups: BTreeMap<(u32, u32), Vec<u32>> = BTreeMap::new();
    for mode in modes.iter().filter(|m| m.is_valid()) {
        groups
            .entry(mode.resolution())
            .or_default()
            .push(mode.refresh_rate_hz);
    }
    for rates in groups.values_mut() {
        rates.sort_unstable();
        rates.dedup();
    }
    groups
}

/// Resolution groups, largest resolution first
pub fn resolution_groups(modes: &[DisplayMode]) -> Vec<ResolutionGroup> {
    let mut groups: Vec<ResolutionGroup> = grouped_resolutions(modes)
        .into_iter()
        .map(|((width, height), refresh_rates)| ResolutionGroup {
            width,
            height,
            refresh_rates,
        })
        .collect();
    groups.sort_by(|a, b| {
        (b.width as u64 * b.height as u64, b.width).cmp(&(a.width as u64 * a.height as u64, a.width))
    });
    groups
}

/// The platform's own record for `target`, matched on width, height and refresh
///
/// Prefers a record with the same depth when several match.
pub fn find_exact(
    api: &dyn DisplayConfigApi,
    device: &str,
    target: &DisplayMode,
) -> Result<Option<ModeRecord>> {
    let records = mode_records(api, device)?;
    Ok(records
        .iter()
        .find(|r| r.mode == *target)
        .or_else(|| records.iter().find(|r| r.mode.same_timing(target)))
        .copied())
}

/// Highest resolution, then highest refresh
pub fn best_mode(modes: &[DisplayMode]) -> Option<DisplayMode> {
    modes
        .iter()
        .filter(|m| m.is_valid())
        .max_by_key(|m| (m.width as u64 * m.height as u64, m.refresh_rate_hz))
        .copied()
}

/// Fail with `UnsupportedMode` unless `mode` is in the catalog
pub fn ensure_supported(modes: &[DisplayMode], device: &str, mode: &DisplayMode) -> Result<()> {
    if modes.iter().any(|m| m.same_timing(mode)) {
        Ok(())
    } else {
        Err(DisplayError::UnsupportedMode {
            id: device.to_string(),
            mode: *mode,
        })
    }
}
