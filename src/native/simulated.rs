// SPDX-License-Identifier: GPL-3.0-only
//! In-memory display-configuration interface
//!
//! Behaves like a path/mode based platform API (numbered `DISPLAYn` devices,
//! zero-based source ids, staged mode changes, a configuration database that
//! remembers the last geometry of every output) and can reproduce the driver
//! quirks the engine has to work around. Every mutating call is counted so
//! callers can assert that nothing was touched.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{
    ApplyFlags, ApplyStatus, DeviceRecord, DisplayConfigApi, FieldMask, ModeRecord, NativeError,
    NativeErrorKind, NativeResult, QueryScope, Topology, TopologyFlags, TopologyMode,
    TopologyPath,
};
use crate::monitor::{DisplayMode, Orientation, Position};

const ADAPTER_ID: u64 = 0x0001_0000;
const TARGET_ID_BASE: u32 = 0x100;

/// Return codes mirroring a typical mode-set API
mod code {
    pub const FAILED: i32 = -1;
    pub const BAD_MODE: i32 = -2;
    pub const BAD_FLAGS: i32 = -4;
    pub const GEN_FAILURE: i32 = 31;
    pub const NOT_SUPPORTED: i32 = 50;
    pub const INVALID_PARAMETER: i32 = 87;
    pub const INSUFFICIENT_BUFFER: i32 = 122;
    pub const DEVICE_NOT_FOUND: i32 = 1169;
}

/// Native operations that accept injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    EnumerateDevices,
    FriendlyNames,
    CurrentMode,
    ModeAt,
    SetMode,
    TopologySizes,
    QueryTopology,
    ApplyTopology,
}

/// Driver behaviours the engine must compensate for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverQuirks {
    /// Refuse to activate an inactive path in place
    pub reject_path_activation: bool,
    /// Refuse the whole-topology extend re-application
    pub reject_extend: bool,
    /// Refuse single-output deactivation through the topology call
    pub reject_path_deactivation: bool,
    /// Refuse the zero-size detach record
    pub reject_mode_detach: bool,
    /// Reject resolution changes that also carry position/orientation flags
    pub strict_field_mask: bool,
    /// Report success for records without a native id but change nothing
    pub ignore_synthesized_records: bool,
    /// Report success for mode changes but defer them to a restart
    pub defer_mode_switch: bool,
    /// The friendly-name source is unreachable
    pub names_unavailable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SavedGeometry {
    mode: DisplayMode,
    position: Position,
    orientation: Orientation,
}

/// One simulated output connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedOutput {
    pub device_name: String,
    pub friendly_name: Option<String>,
    pub modes: Vec<DisplayMode>,
    pub active: bool,
    pub primary: bool,
    pub target_available: bool,
    pub mode: DisplayMode,
    pub position: Position,
    pub orientation: Orientation,
    database: Option<SavedGeometry>,
}

impl SimulatedOutput {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            friendly_name: None,
            modes: Vec::new(),
            active: false,
            primary: false,
            target_available: true,
            mode: DisplayMode::new(0, 0, 0),
            position: Position::default(),
            orientation: Orientation::Landscape,
            database: None,
        }
    }

    pub fn friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    pub fn modes(mut self, modes: impl IntoIterator<Item = DisplayMode>) -> Self {
        self.modes = modes.into_iter().collect();
        self
    }

    /// Drive the output at `mode` from `position`
    pub fn driving(mut self, mode: DisplayMode, position: Position) -> Self {
        self.active = true;
        self.mode = mode;
        self.position = position;
        self.database = Some(SavedGeometry {
            mode,
            position,
            orientation: self.orientation,
        });
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Target is connected but cannot currently be driven
    pub fn unavailable(mut self) -> Self {
        self.target_available = false;
        self
    }

    fn supports(&self, mode: &DisplayMode) -> bool {
        self.modes.iter().any(|m| m.is_valid() && m.same_timing(mode))
    }

    fn best_mode(&self) -> Option<DisplayMode> {
        self.modes
            .iter()
            .filter(|m| m.is_valid())
            .max_by_key(|m| (m.width as u64 * m.height as u64, m.refresh_rate_hz))
            .copied()
    }

    fn right_edge(&self) -> i32 {
        let (width, _) = self.orientation.extent(&self.mode);
        self.position.x + width as i32
    }

    fn record(&self) -> ModeRecord {
        ModeRecord {
            mode: self.mode,
            position: self.position,
            orientation: self.orientation,
            native_id: self
                .modes
                .iter()
                .position(|m| *m == self.mode)
                .map(|i| i as u32),
        }
    }
}

#[derive(Debug)]
struct StagedChange {
    index: usize,
    record: ModeRecord,
    fields: FieldMask,
    flags: ApplyFlags,
}

#[derive(Debug, Default)]
struct SimState {
    outputs: Vec<SimulatedOutput>,
    quirks: DriverQuirks,
    /// Per op: calls to let through first, then the error to return
    failures: HashMap<SimOp, VecDeque<(usize, NativeError)>>,
    staged: Vec<StagedChange>,
    mutations: usize,
}

impl SimState {
    fn take_failure(&mut self, op: SimOp) -> NativeResult<()> {
        let Some(queue) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        match queue.front_mut() {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                Ok(())
            }
            Some(_) => match queue.pop_front() {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn index_of(&self, device: &str) -> NativeResult<usize> {
        self.outputs
            .iter()
            .position(|o| o.device_name == device)
            .ok_or_else(|| {
                NativeError::new(
                    NativeErrorKind::NotFound,
                    code::DEVICE_NOT_FOUND,
                    format!("no device named {device}"),
                )
            })
    }

    fn active_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.active).count()
    }

    fn rightmost_edge(&self) -> i32 {
        self.outputs
            .iter()
            .filter(|o| o.active)
            .map(SimulatedOutput::right_edge)
            .max()
            .unwrap_or(0)
    }

    fn apply_record(&mut self, index: usize, record: &ModeRecord, fields: FieldMask, flags: ApplyFlags) {
        let out = &mut self.outputs[index];
        if fields.contains(FieldMask::PELS_WIDTH) {
            out.mode.width = record.mode.width;
        }
        if fields.contains(FieldMask::PELS_HEIGHT) {
            out.mode.height = record.mode.height;
        }
        if fields.contains(FieldMask::FREQUENCY) {
            out.mode.refresh_rate_hz = record.mode.refresh_rate_hz;
        }
        if fields.contains(FieldMask::BITS_PER_PEL) {
            out.mode.bits_per_pixel = record.mode.bits_per_pixel;
        }
        if fields.contains(FieldMask::POSITION) {
            out.position = record.position;
        }
        if fields.contains(FieldMask::ORIENTATION) {
            out.orientation = record.orientation;
        }
        out.active = true;
        if flags.contains(ApplyFlags::UPDATE_REGISTRY) {
            out.database = Some(SavedGeometry {
                mode: out.mode,
                position: out.position,
                orientation: out.orientation,
            });
        }
        if flags.contains(ApplyFlags::SET_PRIMARY) {
            for (i, o) in self.outputs.iter_mut().enumerate() {
                o.primary = i == index;
            }
        }
    }

    fn deactivate(&mut self, index: usize) {
        let was_primary = self.outputs[index].primary;
        let out = &mut self.outputs[index];
        out.active = false;
        out.primary = false;
        if was_primary {
            if let Some(next) = self.outputs.iter_mut().find(|o| o.active) {
                next.primary = true;
            }
        }
    }

    /// Bring an output up from the database, or its best mode beside the others
    fn activate(&mut self, index: usize, requested: Option<SavedGeometry>) {
        let fallback_x = self.rightmost_edge();
        let out = &self.outputs[index];
        let geometry = requested.or(out.database).or_else(|| {
            out.best_mode().map(|mode| SavedGeometry {
                mode,
                position: Position::new(fallback_x, 0),
                orientation: Orientation::Landscape,
            })
        });
        let Some(geometry) = geometry else {
            return;
        };
        let out = &mut self.outputs[index];
        out.mode = geometry.mode;
        out.position = geometry.position;
        out.orientation = geometry.orientation;
        out.active = true;
        out.database = Some(geometry);
    }

    fn build_topology(&self, scope: QueryScope) -> Topology {
        let mut topology = Topology::default();
        for (i, out) in self.outputs.iter().enumerate() {
            if scope == QueryScope::ActiveOnly && !out.active {
                continue;
            }
            let (source_mode_idx, target_mode_idx) = if out.active {
                topology.modes.push(TopologyMode::Source {
                    width: out.mode.width,
                    height: out.mode.height,
                    position: out.position,
                });
                topology.modes.push(TopologyMode::Target {
                    refresh_rate_hz: out.mode.refresh_rate_hz,
                });
                (Some(topology.modes.len() - 2), Some(topology.modes.len() - 1))
            } else {
                (None, None)
            };
            topology.paths.push(TopologyPath {
                adapter_id: ADAPTER_ID,
                source_id: i as u32,
                target_id: TARGET_ID_BASE + i as u32,
                target_name: None,
                active: out.active,
                target_available: out.target_available,
                source_mode_idx,
                target_mode_idx,
            });
        }
        topology
    }

    /// Geometry described by a path's mode indices, if complete and supported
    fn path_geometry(&self, index: usize, path: &TopologyPath, topology: &Topology) -> Option<SavedGeometry> {
        let out = &self.outputs[index];
        let source = path.source_mode_idx.and_then(|i| topology.modes.get(i))?;
        let TopologyMode::Source { width, height, position } = *source else {
            return None;
        };
        let refresh = match path.target_mode_idx.and_then(|i| topology.modes.get(i)) {
            Some(TopologyMode::Target { refresh_rate_hz }) => Some(*refresh_rate_hz),
            _ => None,
        };
        let mode = out
            .modes
            .iter()
            .filter(|m| m.width == width && m.height == height)
            .filter(|m| refresh.is_none_or(|r| m.refresh_rate_hz == r))
            .max_by_key(|m| m.refresh_rate_hz)
            .copied()?;
        Some(SavedGeometry {
            mode,
            position,
            orientation: out.orientation,
        })
    }
}

/// Simulated display-configuration interface
#[derive(Debug, Default)]
pub struct SimulatedDisplayApi {
    state: Mutex<SimState>,
}

impl SimulatedDisplayApi {
    pub fn new(outputs: Vec<SimulatedOutput>) -> Self {
        Self {
            state: Mutex::new(SimState {
                outputs,
                ..SimState::default()
            }),
        }
    }

    pub fn with_quirks(self, quirks: DriverQuirks) -> Self {
        self.state().quirks = quirks;
        self
    }

    /// Primary 1920×1080@60 at (0,0) beside a 2560×1440@144 panel at (1920,0)
    pub fn two_display_rig() -> Self {
        let primary = SimulatedOutput::new("DISPLAY1")
            .friendly_name("DELL U2419H")
            .modes([
                DisplayMode::new(1920, 1080, 60),
                DisplayMode::new(1920, 1080, 50),
                DisplayMode::new(1680, 1050, 60),
                DisplayMode::new(1280, 1024, 75),
                DisplayMode::new(1280, 1024, 60),
                DisplayMode::new(1024, 768, 60),
            ])
            .driving(DisplayMode::new(1920, 1080, 60), Position::new(0, 0))
            .primary();
        let secondary = SimulatedOutput::new("DISPLAY2")
            .friendly_name("LG 27GL850")
            .modes([
                DisplayMode::new(2560, 1440, 144),
                DisplayMode::new(2560, 1440, 120),
                DisplayMode::new(2560, 1440, 60),
                DisplayMode::new(1920, 1080, 144),
                DisplayMode::new(1920, 1080, 60),
                DisplayMode::new(1280, 720, 60),
            ])
            .driving(DisplayMode::new(2560, 1440, 144), Position::new(1920, 0));
        Self::new(vec![primary, secondary]).with_quirks(DriverQuirks {
            strict_field_mask: true,
            ..DriverQuirks::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: SimOp, err: NativeError) {
        self.fail_after(op, 0, err);
    }

    /// Let `skip` further calls of `op` through, then fail the next one
    pub fn fail_after(&self, op: SimOp, skip: usize, err: NativeError) {
        self.state().failures.entry(op).or_default().push_back((skip, err));
    }

    pub fn update_quirks(&self, update: impl FnOnce(&mut DriverQuirks)) {
        update(&mut self.state().quirks);
    }

    /// Number of calls that changed (or staged a change to) the configuration
    pub fn mutation_count(&self) -> usize {
        self.state().mutations
    }

    pub fn output(&self, device: &str) -> Option<SimulatedOutput> {
        self.state()
            .outputs
            .iter()
            .find(|o| o.device_name == device)
            .cloned()
    }

    /// Connect a new output (inactive until configured)
    pub fn plug(&self, output: SimulatedOutput) {
        self.state().outputs.push(output);
    }
}

impl DisplayConfigApi for SimulatedDisplayApi {
    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    fn enumerate_devices(&self) -> NativeResult<Vec<DeviceRecord>> {
        let mut state = self.state();
        state.take_failure(SimOp::EnumerateDevices)?;
        Ok(state
            .outputs
            .iter()
            .map(|o| DeviceRecord {
                device_name: o.device_name.clone(),
                adapter: "Simulated Display Adapter".to_string(),
                active: o.active,
                primary: o.primary,
            })
            .collect())
    }

    fn friendly_names(&self) -> NativeResult<HashMap<String, String>> {
        let mut state = self.state();
        state.take_failure(SimOp::FriendlyNames)?;
        if state.quirks.names_unavailable {
            return Err(NativeError::new(
                NativeErrorKind::NotSupported,
                code::NOT_SUPPORTED,
                "monitor name source unavailable",
            ));
        }
        Ok(state
            .outputs
            .iter()
            .filter_map(|o| {
                o.friendly_name
                    .as_ref()
                    .map(|name| (o.device_name.clone(), name.clone()))
            })
            .collect())
    }

    fn current_mode(&self, device: &str) -> NativeResult<Option<ModeRecord>> {
        let mut state = self.state();
        state.take_failure(SimOp::CurrentMode)?;
        let index = state.index_of(device)?;
        let out = &state.outputs[index];
        Ok(out.active.then(|| out.record()))
    }

    fn mode_at(&self, device: &str, index: usize) -> NativeResult<Option<ModeRecord>> {
        let mut state = self.state();
        state.take_failure(SimOp::ModeAt)?;
        let out = &state.outputs[state.index_of(device)?];
        Ok(out.modes.get(index).map(|mode| ModeRecord {
            mode: *mode,
            position: Position::default(),
            orientation: Orientation::Landscape,
            native_id: Some(index as u32),
        }))
    }

    fn set_mode(
        &self,
        device: &str,
        record: &ModeRecord,
        fields: FieldMask,
        flags: ApplyFlags,
    ) -> NativeResult<ApplyStatus> {
        let mut state = self.state();
        state.take_failure(SimOp::SetMode)?;
        let index = state.index_of(device)?;

        if record.is_detach() && fields.intersects(FieldMask::RESOLUTION) {
            let out = &state.outputs[index];
            if out.active && state.active_count() <= 1 {
                return Err(NativeError::new(
                    NativeErrorKind::Rejected,
                    code::FAILED,
                    "cannot detach the only active output",
                ));
            }
            if flags.contains(ApplyFlags::TEST) {
                return Ok(ApplyStatus::Applied);
            }
            if state.quirks.reject_mode_detach {
                return Err(NativeError::new(
                    NativeErrorKind::Rejected,
                    code::FAILED,
                    "driver refused to detach output",
                ));
            }
            state.mutations += 1;
            state.deactivate(index);
            return Ok(ApplyStatus::Applied);
        }

        let out = &state.outputs[index];
        let timing_fields = FieldMask::RESOLUTION | FieldMask::FREQUENCY;
        if fields.intersects(timing_fields) && !out.supports(&record.mode) {
            return Err(NativeError::new(
                NativeErrorKind::InvalidParameter,
                code::BAD_MODE,
                format!("mode {} not supported by {device}", record.mode),
            ));
        }
        let resizes = fields.intersects(FieldMask::RESOLUTION)
            && out.active
            && out.mode.resolution() != record.mode.resolution();
        if state.quirks.strict_field_mask
            && resizes
            && fields.intersects(FieldMask::POSITION | FieldMask::ORIENTATION)
        {
            return Err(NativeError::new(
                NativeErrorKind::InvalidParameter,
                code::BAD_FLAGS,
                "resolution change carried position/orientation fields",
            ));
        }

        if flags.contains(ApplyFlags::TEST) {
            return Ok(ApplyStatus::Applied);
        }

        state.mutations += 1;
        if flags.contains(ApplyFlags::NO_RESET) {
            state.staged.push(StagedChange {
                index,
                record: *record,
                fields,
                flags,
            });
            return Ok(ApplyStatus::Applied);
        }

        if state.quirks.ignore_synthesized_records && record.native_id.is_none() {
            state.staged.clear();
            return Ok(ApplyStatus::Applied);
        }
        if state.quirks.defer_mode_switch && fields.intersects(timing_fields) {
            return Ok(ApplyStatus::RestartRequired);
        }

        let staged = std::mem::take(&mut state.staged);
        for change in staged {
            state.apply_record(change.index, &change.record, change.fields, change.flags);
        }
        state.apply_record(index, record, fields, flags);
        Ok(ApplyStatus::Applied)
    }

    fn topology_buffer_sizes(&self, scope: QueryScope) -> NativeResult<(usize, usize)> {
        let mut state = self.state();
        state.take_failure(SimOp::TopologySizes)?;
        let active = state.active_count();
        let paths = match scope {
            QueryScope::AllPaths => state.outputs.len(),
            QueryScope::ActiveOnly => active,
        };
        Ok((paths, active * 2))
    }

    fn query_topology(
        &self,
        scope: QueryScope,
        path_capacity: usize,
        mode_capacity: usize,
    ) -> NativeResult<Topology> {
        let mut state = self.state();
        state.take_failure(SimOp::QueryTopology)?;
        let topology = state.build_topology(scope);
        if topology.paths.len() > path_capacity || topology.modes.len() > mode_capacity {
            return Err(NativeError::new(
                NativeErrorKind::InsufficientBuffer,
                code::INSUFFICIENT_BUFFER,
                "topology buffers too small",
            ));
        }
        Ok(topology)
    }

    fn apply_topology(&self, topology: Option<&Topology>, flags: TopologyFlags) -> NativeResult<()> {
        let mut state = self.state();
        state.take_failure(SimOp::ApplyTopology)?;

        let Some(topology) = topology else {
            if !flags.contains(TopologyFlags::TOPOLOGY_EXTEND) {
                return Err(NativeError::new(
                    NativeErrorKind::InvalidParameter,
                    code::INVALID_PARAMETER,
                    "no paths supplied and no topology requested",
                ));
            }
            if state.quirks.reject_extend {
                return Err(NativeError::new(
                    NativeErrorKind::Rejected,
                    code::GEN_FAILURE,
                    "extend topology refused",
                ));
            }
            if !flags.contains(TopologyFlags::APPLY) {
                return Ok(());
            }
            state.mutations += 1;
            let dormant: Vec<usize> = (0..state.outputs.len())
                .filter(|&i| !state.outputs[i].active && state.outputs[i].target_available)
                .collect();
            for index in dormant {
                state.activate(index, None);
            }
            return Ok(());
        };

        if !flags.contains(TopologyFlags::USE_SUPPLIED) {
            return Err(NativeError::new(
                NativeErrorKind::InvalidParameter,
                code::INVALID_PARAMETER,
                "paths supplied without USE_SUPPLIED",
            ));
        }

        let mut activations = Vec::new();
        let mut deactivations = Vec::new();
        for path in &topology.paths {
            let index = path
                .target_id
                .checked_sub(TARGET_ID_BASE)
                .map(|i| i as usize)
                .filter(|&i| i < state.outputs.len())
                .ok_or_else(|| {
                    NativeError::new(
                        NativeErrorKind::InvalidParameter,
                        code::INVALID_PARAMETER,
                        format!("unknown target id {:#x}", path.target_id),
                    )
                })?;
            let out = &state.outputs[index];
            if path.active && !out.active {
                if !out.target_available {
                    return Err(NativeError::new(
                        NativeErrorKind::Rejected,
                        code::GEN_FAILURE,
                        format!("target {} not available", out.device_name),
                    ));
                }
                if state.quirks.reject_path_activation {
                    return Err(NativeError::new(
                        NativeErrorKind::Rejected,
                        code::GEN_FAILURE,
                        "path activation refused",
                    ));
                }
                activations.push((index, state.path_geometry(index, path, topology)));
            } else if !path.active && out.active {
                if state.quirks.reject_path_deactivation {
                    return Err(NativeError::new(
                        NativeErrorKind::NotSupported,
                        code::NOT_SUPPORTED,
                        "single output deactivation not supported",
                    ));
                }
                deactivations.push(index);
            }
        }

        if state.active_count() + activations.len() <= deactivations.len() {
            return Err(NativeError::new(
                NativeErrorKind::Rejected,
                code::GEN_FAILURE,
                "topology would leave no active output",
            ));
        }
        if !flags.contains(TopologyFlags::APPLY) {
            return Ok(());
        }

        state.mutations += 1;
        for index in deactivations {
            state.deactivate(index);
        }
        for (index, geometry) in activations {
            state.activate(index, geometry);
        }
        Ok(())
    }

    fn primary_requires_origin(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rig_reports_two_active_devices() {
        let api = SimulatedDisplayApi::two_display_rig();
        let devices = api.enumerate_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.active));
        assert!(devices[0].primary);
    }

    #[test]
    fn test_test_flag_never_mutates() {
        let api = SimulatedDisplayApi::two_display_rig();
        let record = ModeRecord::synthesized(
            DisplayMode::new(1280, 1024, 60),
            Position::default(),
            Orientation::Landscape,
        );
        let status = api
            .set_mode("DISPLAY1", &record, FieldMask::RESOLUTION | FieldMask::FREQUENCY, ApplyFlags::TEST)
            .unwrap();
        assert_eq!(status, ApplyStatus::Applied);
        assert_eq!(api.mutation_count(), 0);
        assert_eq!(api.output("DISPLAY1").unwrap().mode, DisplayMode::new(1920, 1080, 60));
    }

    #[test]
    fn test_strict_field_mask_rejects_stale_flags() {
        let api = SimulatedDisplayApi::two_display_rig();
        let record = ModeRecord::synthesized(
            DisplayMode::new(1280, 1024, 60),
            Position::default(),
            Orientation::Landscape,
        );
        let err = api
            .set_mode(
                "DISPLAY1",
                &record,
                FieldMask::RESOLUTION | FieldMask::FREQUENCY | FieldMask::POSITION,
                ApplyFlags::TEST,
            )
            .unwrap_err();
        assert_eq!(err.code, code::BAD_FLAGS);
    }

    #[test]
    fn test_query_with_short_buffer_fails() {
        let api = SimulatedDisplayApi::two_display_rig();
        let err = api.query_topology(QueryScope::AllPaths, 1, 4).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::InsufficientBuffer);
    }

    #[test]
    fn test_deactivated_path_remembers_geometry() {
        let api = SimulatedDisplayApi::two_display_rig();
        let (paths, modes) = api.topology_buffer_sizes(QueryScope::AllPaths).unwrap();
        let mut topology = api.query_topology(QueryScope::AllPaths, paths, modes).unwrap();
        topology.paths[1].active = false;
        api.apply_topology(Some(&topology), TopologyFlags::APPLY | TopologyFlags::USE_SUPPLIED)
            .unwrap();
        assert!(!api.output("DISPLAY2").unwrap().active);

        let (paths, modes) = api.topology_buffer_sizes(QueryScope::AllPaths).unwrap();
        let mut topology = api.query_topology(QueryScope::AllPaths, paths, modes).unwrap();
        topology.paths[1].active = true;
        api.apply_topology(Some(&topology), TopologyFlags::APPLY | TopologyFlags::USE_SUPPLIED)
            .unwrap();

        let out = api.output("DISPLAY2").unwrap();
        assert!(out.active);
        assert_eq!(out.mode, DisplayMode::new(2560, 1440, 144));
        assert_eq!(out.position, Position::new(1920, 0));
    }

    #[test]
    fn test_injected_failure_is_consumed_once() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.fail_next(
            SimOp::EnumerateDevices,
            NativeError::new(NativeErrorKind::Busy, 170, "busy"),
        );
        assert!(api.enumerate_devices().is_err());
        assert!(api.enumerate_devices().is_ok());
    }

    #[test]
    fn test_delayed_failure_skips_earlier_calls() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.fail_after(
            SimOp::EnumerateDevices,
            2,
            NativeError::new(NativeErrorKind::Busy, 170, "busy"),
        );
        assert!(api.enumerate_devices().is_ok());
        assert!(api.enumerate_devices().is_ok());
        assert!(api.enumerate_devices().is_err());
        assert!(api.enumerate_devices().is_ok());
    }
}
