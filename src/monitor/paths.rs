// SPDX-License-Identifier: GPL-3.0-only
//! Topology path resolver
//!
//! Display ids do not appear in topology paths on every platform, so a path
//! is found by a fixed sequence of heuristics. The first heuristic that
//! produces a match wins; heuristics are never combined.
//!
//! 1. Name: the path carries the display's device name.
//! 2. Source id: the id's one-based numeric suffix, minus one, equals the
//!    path's source id.
//! 3. Direct index: the same zero-based number indexes the path array.
//! 4. Wrapped index: that number modulo the path count. Only sound when a
//!    single display is ambiguous; logged whenever it is used.
//!
//! When every path carries a name, the numeric heuristics are skipped: a
//! missing name then means the display has no path.

use serde::Serialize;

use crate::error::{DisplayError, Result};
use crate::native::TopologyPath;

/// Which heuristic located a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PathHeuristic {
    Name,
    SourceId,
    DirectIndex,
    WrappedIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPath<'a> {
    pub path: &'a TopologyPath,
    pub index: usize,
    pub heuristic: PathHeuristic,
}

/// Trailing decimal number of a display id (`DISPLAY2` → 2, `DP-1` → 1)
pub fn display_number(id: &str) -> Option<u32> {
    let digits = id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| &id[i..])?;
    digits.parse().ok()
}

/// Find the topology path that drives display `id`
pub fn resolve<'a>(id: &str, paths: &'a [TopologyPath]) -> Result<ResolvedPath<'a>> {
    let found = move |index: usize, heuristic: PathHeuristic| ResolvedPath {
        path: &paths[index],
        index,
        heuristic,
    };

    if let Some(index) = paths
        .iter()
        .position(|p| p.target_name.as_deref() == Some(id))
    {
        return Ok(found(index, PathHeuristic::Name));
    }

    let all_named = !paths.is_empty() && paths.iter().all(|p| p.target_name.is_some());
    if all_named {
        return Err(DisplayError::PathUnresolved(id.to_string()));
    }

    // Display numbers are one-based
    let Some(zero_based) = display_number(id).and_then(|n| n.checked_sub(1)) else {
        return Err(DisplayError::PathUnresolved(id.to_string()));
    };

    if let Some(index) = paths.iter().position(|p| p.source_id == zero_based) {
        return Ok(found(index, PathHeuristic::SourceId));
    }

    let zero_based = zero_based as usize;
    if zero_based < paths.len() {
        return Ok(found(zero_based, PathHeuristic::DirectIndex));
    }

    if !paths.is_empty() {
        let index = zero_based % paths.len();
        warn!(
            display_id = %id,
            index,
            path_count = paths.len(),
            "Resolved topology path by wrapped index; result is a guess"
        );
        return Ok(found(index, PathHeuristic::WrappedIndex));
    }

    Err(DisplayError::PathUnresolved(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(source_id: u32, target_name: Option<&str>) -> TopologyPath {
        TopologyPath {
            adapter_id: 1,
            source_id,
            target_id: 0x100 + source_id,
            target_name: target_name.map(str::to_string),
            active: true,
            target_available: true,
            source_mode_idx: None,
            target_mode_idx: None,
        }
    }

    #[test]
    fn test_display_number() {
        assert_eq!(display_number("DISPLAY2"), Some(2));
        assert_eq!(display_number(r"\\.\DISPLAY12"), Some(12));
        assert_eq!(display_number("HDMI-A-0"), Some(0));
        assert_eq!(display_number("eDP"), None);
        assert_eq!(display_number(""), None);
    }

    #[test]
    fn test_name_match_wins() {
        let paths = [path(0, Some("HDMI-1")), path(1, Some("DP-1"))];
        let resolved = resolve("DP-1", &paths).unwrap();
        assert_eq!(resolved.index, 1);
        assert_eq!(resolved.heuristic, PathHeuristic::Name);
    }

    #[test]
    fn test_named_paths_do_not_fall_back_to_numbers() {
        let paths = [path(0, Some("HDMI-1")), path(1, Some("DP-1"))];
        assert!(matches!(
            resolve("DP-2", &paths),
            Err(DisplayError::PathUnresolved(_))
        ));
    }

    #[test]
    fn test_source_id_before_direct_index() {
        // Array order differs from source ids
        let paths = [path(1, None), path(0, None)];
        let resolved = resolve("DISPLAY1", &paths).unwrap();
        assert_eq!(resolved.index, 1);
        assert_eq!(resolved.heuristic, PathHeuristic::SourceId);
    }

    #[test]
    fn test_direct_then_wrapped_index() {
        let paths = [path(7, None), path(9, None)];
        let resolved = resolve("DISPLAY2", &paths).unwrap();
        assert_eq!(resolved.index, 1);
        assert_eq!(resolved.heuristic, PathHeuristic::DirectIndex);

        let resolved = resolve("DISPLAY3", &paths).unwrap();
        assert_eq!(resolved.index, 0);
        assert_eq!(resolved.heuristic, PathHeuristic::WrappedIndex);
    }

    #[test]
    fn test_unresolvable_ids() {
        let paths = [path(0, None)];
        assert!(resolve("DISPLAY0", &paths).is_err());
        assert!(resolve("eDP", &paths).is_err());
        assert!(resolve("DISPLAY1", &[]).is_err());
    }
}
