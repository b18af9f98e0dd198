// SPDX-License-Identifier: GPL-3.0-only
//! X11 RandR implementation of the native display-configuration interface
//!
//! Devices are connected RandR outputs named by their connector (`DP-2`,
//! `HDMI-1`, `eDP-1`). A topology path is the pairing of an output with the
//! CRTC that drives it (or would drive it). RandR has no validate-only call,
//! so [`ApplyFlags::TEST`] checks mode membership, CRTC availability and
//! rotation support locally. RandR applies every request immediately, so
//! [`ApplyFlags::NO_RESET`] is accepted and ignored.

use std::collections::HashMap;
use std::sync::Mutex;

use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{self, AtomEnum, ConnectionExt as _};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;

use super::{
    ApplyFlags, ApplyStatus, DeviceRecord, DisplayConfigApi, FieldMask, ModeRecord, NativeError,
    NativeErrorKind, NativeResult, QueryScope, Topology, TopologyFlags, TopologyMode,
    TopologyPath,
};
use crate::monitor::{DisplayMode, Orientation, Position};

/// Oldest RandR version with GetScreenResourcesCurrent and output primary
const MIN_RANDR_VERSION: (u32, u32) = (1, 3);

/// EDID blocks are 128 bytes; names live in the base block
const EDID_BLOCK_LEN: usize = 128;
const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
const EDID_DESCRIPTOR_OFFSETS: [usize; 4] = [54, 72, 90, 108];
const EDID_MONITOR_NAME_TAG: u8 = 0xFC;

/// Used to derive a physical screen size when the screen has to grow
const ASSUMED_DPI: u32 = 96;

impl From<ConnectError> for NativeError {
    fn from(err: ConnectError) -> Self {
        NativeError::new(
            NativeErrorKind::NotSupported,
            -1,
            format!("cannot connect to the X server: {err}"),
        )
    }
}

impl From<ConnectionError> for NativeError {
    fn from(err: ConnectionError) -> Self {
        let kind = match err {
            ConnectionError::UnsupportedExtension => NativeErrorKind::NotSupported,
            _ => NativeErrorKind::Rejected,
        };
        NativeError::new(kind, -1, format!("X11 connection error: {err}"))
    }
}

impl From<ReplyError> for NativeError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::ConnectionError(err) => err.into(),
            ReplyError::X11Error(err) => {
                let kind = match err.error_kind {
                    ErrorKind::Access => NativeErrorKind::AccessDenied,
                    ErrorKind::Value => NativeErrorKind::InvalidParameter,
                    _ => NativeErrorKind::Rejected,
                };
                NativeError::new(
                    kind,
                    i32::from(err.error_code),
                    format!("X11 error {:?} in {:?}", err.error_kind, err.request_name),
                )
            }
        }
    }
}

/// Extract the monitor name descriptor from an EDID base block
pub fn edid_monitor_name(edid: &[u8]) -> Option<String> {
    if edid.len() < EDID_BLOCK_LEN || edid[..8] != EDID_HEADER {
        return None;
    }
    EDID_DESCRIPTOR_OFFSETS.iter().find_map(|&offset| {
        let descriptor = &edid[offset..offset + 18];
        // Display descriptors start with a zero pixel clock
        if descriptor[..3] != [0, 0, 0] || descriptor[3] != EDID_MONITOR_NAME_TAG {
            return None;
        }
        let text: Vec<u8> = descriptor[5..]
            .iter()
            .copied()
            .take_while(|&b| b != 0x0A)
            .collect();
        let name = String::from_utf8_lossy(&text).trim().to_string();
        (!name.is_empty()).then_some(name)
    })
}

/// Refresh rate of a RandR mode line, rounded to whole Hz
pub fn mode_refresh_hz(mode: &randr::ModeInfo) -> u32 {
    if mode.htotal == 0 || mode.vtotal == 0 {
        return 0;
    }
    let mut vtotal = f64::from(mode.vtotal);
    if mode.mode_flags.contains(randr::ModeFlag::DOUBLE_SCAN) {
        vtotal *= 2.0;
    }
    if mode.mode_flags.contains(randr::ModeFlag::INTERLACE) {
        vtotal /= 2.0;
    }
    (f64::from(mode.dot_clock) / (f64::from(mode.htotal) * vtotal)).round() as u32
}

fn to_rotation(orientation: Orientation) -> randr::Rotation {
    match orientation {
        Orientation::Landscape => randr::Rotation::ROTATE0,
        Orientation::Portrait => randr::Rotation::ROTATE90,
        Orientation::LandscapeFlipped => randr::Rotation::ROTATE180,
        Orientation::PortraitFlipped => randr::Rotation::ROTATE270,
    }
}

fn from_rotation(rotation: randr::Rotation) -> Orientation {
    if rotation.contains(randr::Rotation::ROTATE90) {
        Orientation::Portrait
    } else if rotation.contains(randr::Rotation::ROTATE180) {
        Orientation::LandscapeFlipped
    } else if rotation.contains(randr::Rotation::ROTATE270) {
        Orientation::PortraitFlipped
    } else {
        Orientation::Landscape
    }
}

fn output_name(info: &randr::GetOutputInfoReply) -> String {
    String::from_utf8_lossy(&info.name).into_owned()
}

fn to_i16(value: i32, what: &str) -> NativeResult<i16> {
    i16::try_from(value).map_err(|_| {
        NativeError::new(
            NativeErrorKind::InvalidParameter,
            -1,
            format!("{what} {value} outside the X11 coordinate range"),
        )
    })
}

/// One consistent read of the RandR configuration
struct Snapshot {
    resources: randr::GetScreenResourcesCurrentReply,
    outputs: Vec<(randr::Output, randr::GetOutputInfoReply)>,
    crtcs: HashMap<randr::Crtc, randr::GetCrtcInfoReply>,
    primary: randr::Output,
}

impl Snapshot {
    fn output(&self, device: &str) -> NativeResult<&(randr::Output, randr::GetOutputInfoReply)> {
        self.outputs
            .iter()
            .find(|(_, info)| output_name(info) == device)
            .ok_or_else(|| {
                NativeError::new(
                    NativeErrorKind::NotFound,
                    -1,
                    format!("no connected output named {device}"),
                )
            })
    }

    fn mode_info(&self, id: randr::Mode) -> Option<&randr::ModeInfo> {
        self.resources.modes.iter().find(|m| m.id == id)
    }

    fn active_crtc(&self, info: &randr::GetOutputInfoReply) -> Option<&randr::GetCrtcInfoReply> {
        self.crtcs.get(&info.crtc).filter(|c| c.mode != 0)
    }

    /// CRTC currently driving the output, or the first idle one it can use
    fn pick_crtc(&self, info: &randr::GetOutputInfoReply) -> NativeResult<randr::Crtc> {
        if info.crtc != 0 {
            return Ok(info.crtc);
        }
        info.crtcs
            .iter()
            .copied()
            .find(|c| {
                self.crtcs
                    .get(c)
                    .is_some_and(|ci| ci.mode == 0 && ci.outputs.is_empty())
            })
            .ok_or_else(|| {
                NativeError::new(
                    NativeErrorKind::Busy,
                    -1,
                    format!("no idle CRTC can drive {}", output_name(info)),
                )
            })
    }

    /// Mode id on this output matching a size and (optionally) a refresh
    fn find_mode(
        &self,
        info: &randr::GetOutputInfoReply,
        width: u32,
        height: u32,
        refresh: Option<u32>,
    ) -> Option<randr::Mode> {
        info.modes.iter().copied().find(|&id| {
            self.mode_info(id).is_some_and(|m| {
                u32::from(m.width) == width
                    && u32::from(m.height) == height
                    && refresh.is_none_or(|r| mode_refresh_hz(m) == r)
            })
        })
    }

    /// Right edge of the desktop, ignoring one CRTC
    fn rightmost_edge(&self, except: randr::Crtc) -> i32 {
        self.crtcs
            .iter()
            .filter(|(id, c)| **id != except && c.mode != 0)
            .map(|(_, c)| i32::from(c.x) + i32::from(c.width))
            .max()
            .unwrap_or(0)
    }

    fn crtc_index(&self, crtc: randr::Crtc) -> u32 {
        self.resources
            .crtcs
            .iter()
            .position(|&c| c == crtc)
            .unwrap_or(0) as u32
    }
}

/// RandR-backed display-configuration interface
pub struct RandrDisplayApi {
    conn: RustConnection,
    root: xproto::Window,
    root_depth: u8,
    edid_atom: xproto::Atom,
    /// Mode list of the output whose catalog is being walked
    mode_walk: Mutex<Option<(String, Vec<ModeRecord>)>>,
}

impl std::fmt::Debug for RandrDisplayApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RandrDisplayApi(root: {:#x}, depth: {})", self.root, self.root_depth)
    }
}

impl RandrDisplayApi {
    /// Connect to the X server named by `display` (or `$DISPLAY`)
    pub fn connect(display: Option<&str>) -> NativeResult<Self> {
        let (conn, screen_num) = x11rb::connect(display)?;
        let screen = conn.setup().roots.get(screen_num).ok_or_else(|| {
            NativeError::new(
                NativeErrorKind::NotFound,
                -1,
                format!("X server has no screen {screen_num}"),
            )
        })?;
        let (root, root_depth) = (screen.root, screen.root_depth);

        let version = conn.randr_query_version(1, 5)?.reply()?;
        if (version.major_version, version.minor_version) < MIN_RANDR_VERSION {
            return Err(NativeError::new(
                NativeErrorKind::NotSupported,
                -1,
                format!(
                    "RandR {}.{} is too old, need {}.{}",
                    version.major_version,
                    version.minor_version,
                    MIN_RANDR_VERSION.0,
                    MIN_RANDR_VERSION.1
                ),
            ));
        }
        info!(
            "Connected to X11 screen {} with RandR {}.{}",
            screen_num, version.major_version, version.minor_version
        );

        let edid_atom = conn.intern_atom(false, b"EDID")?.reply()?.atom;

        Ok(Self {
            conn,
            root,
            root_depth,
            edid_atom,
            mode_walk: Mutex::new(None),
        })
    }

    fn snapshot(&self) -> NativeResult<Snapshot> {
        let resources = self.conn.randr_get_screen_resources_current(self.root)?.reply()?;

        let mut outputs = Vec::new();
        for &output in &resources.outputs {
            let info = self
                .conn
                .randr_get_output_info(output, resources.config_timestamp)?
                .reply()?;
            if info.connection == randr::Connection::CONNECTED {
                outputs.push((output, info));
            }
        }

        let mut crtcs = HashMap::new();
        for &crtc in &resources.crtcs {
            let info = self
                .conn
                .randr_get_crtc_info(crtc, resources.config_timestamp)?
                .reply()?;
            crtcs.insert(crtc, info);
        }

        let primary = self.conn.randr_get_output_primary(self.root)?.reply()?.output;

        Ok(Snapshot {
            resources,
            outputs,
            crtcs,
            primary,
        })
    }

    fn output_modes(&self, device: &str) -> NativeResult<Vec<ModeRecord>> {
        let snap = self.snapshot()?;
        let (_, info) = snap.output(device)?;
        Ok(info
            .modes
            .iter()
            .filter_map(|&id| snap.mode_info(id))
            .map(|mode| ModeRecord {
                mode: self.display_mode(mode),
                position: Position::default(),
                orientation: Orientation::Landscape,
                native_id: Some(mode.id),
            })
            .collect())
    }

    fn bits_per_pixel(&self) -> u32 {
        // 24-bit visuals are stored in 32-bit pixels
        match self.root_depth {
            24 => 32,
            depth => u32::from(depth),
        }
    }

    fn display_mode(&self, mode: &randr::ModeInfo) -> DisplayMode {
        DisplayMode::new(u32::from(mode.width), u32::from(mode.height), mode_refresh_hz(mode))
            .with_depth(self.bits_per_pixel())
    }

    #[allow(clippy::too_many_arguments)]
    fn configure_crtc(
        &self,
        snap: &Snapshot,
        crtc: randr::Crtc,
        position: Position,
        mode: randr::Mode,
        rotation: randr::Rotation,
        outputs: &[randr::Output],
    ) -> NativeResult<()> {
        let reply = self
            .conn
            .randr_set_crtc_config(
                crtc,
                x11rb::CURRENT_TIME,
                snap.resources.config_timestamp,
                to_i16(position.x, "x")?,
                to_i16(position.y, "y")?,
                mode,
                rotation,
                outputs,
            )?
            .reply()?;

        if reply.status == randr::SetConfig::SUCCESS {
            Ok(())
        } else if reply.status == randr::SetConfig::INVALID_CONFIG_TIME
            || reply.status == randr::SetConfig::INVALID_TIME
        {
            Err(NativeError::new(
                NativeErrorKind::Busy,
                i32::from(u8::from(reply.status)),
                "configuration changed during the request",
            ))
        } else {
            Err(NativeError::new(
                NativeErrorKind::Rejected,
                i32::from(u8::from(reply.status)),
                format!("SetCrtcConfig failed on CRTC {crtc:#x}"),
            ))
        }
    }

    /// Grow the X screen so a CRTC at `position` with `extent` fits
    fn ensure_screen_fits(
        &self,
        snap: &Snapshot,
        crtc: randr::Crtc,
        position: Position,
        extent: (u32, u32),
    ) -> NativeResult<()> {
        let mut width = (position.x.max(0) as u32) + extent.0;
        let mut height = (position.y.max(0) as u32) + extent.1;
        for (id, other) in &snap.crtcs {
            if *id == crtc || other.mode == 0 {
                continue;
            }
            width = width.max((i32::from(other.x) + i32::from(other.width)).max(0) as u32);
            height = height.max((i32::from(other.y) + i32::from(other.height)).max(0) as u32);
        }

        let geometry = self.conn.get_geometry(self.root)?.reply()?;
        if width <= u32::from(geometry.width) && height <= u32::from(geometry.height) {
            return Ok(());
        }

        let range = self.conn.randr_get_screen_size_range(self.root)?.reply()?;
        if width > u32::from(range.max_width) || height > u32::from(range.max_height) {
            return Err(NativeError::new(
                NativeErrorKind::InvalidParameter,
                -1,
                format!(
                    "desktop {}x{} exceeds the maximum screen size {}x{}",
                    width, height, range.max_width, range.max_height
                ),
            ));
        }

        let width = width.max(u32::from(geometry.width));
        let height = height.max(u32::from(geometry.height));
        debug!("Growing X screen to {}x{}", width, height);
        self.conn
            .randr_set_screen_size(
                self.root,
                width as u16,
                height as u16,
                width * 254 / (ASSUMED_DPI * 10),
                height * 254 / (ASSUMED_DPI * 10),
            )?
            .check()?;
        Ok(())
    }

    fn disable_crtc(&self, snap: &Snapshot, crtc: randr::Crtc) -> NativeResult<()> {
        self.configure_crtc(snap, crtc, Position::default(), 0, randr::Rotation::ROTATE0, &[])
    }

    /// Drive an idle output with `mode` at `position`
    fn enable_output(
        &self,
        snap: &Snapshot,
        output: randr::Output,
        info: &randr::GetOutputInfoReply,
        mode: randr::Mode,
        position: Position,
    ) -> NativeResult<()> {
        let crtc = snap.pick_crtc(info)?;
        let mode_info = snap.mode_info(mode).ok_or_else(|| {
            NativeError::new(NativeErrorKind::InvalidParameter, -1, "unknown mode id")
        })?;
        let extent = (u32::from(mode_info.width), u32::from(mode_info.height));
        self.ensure_screen_fits(snap, crtc, position, extent)?;
        self.configure_crtc(snap, crtc, position, mode, randr::Rotation::ROTATE0, &[output])
    }
}

impl DisplayConfigApi for RandrDisplayApi {
    fn backend_name(&self) -> &'static str {
        "x11-randr"
    }

    fn enumerate_devices(&self) -> NativeResult<Vec<DeviceRecord>> {
        let snap = self.snapshot()?;
        Ok(snap
            .outputs
            .iter()
            .map(|(output, info)| DeviceRecord {
                device_name: output_name(info),
                adapter: "RandR".to_string(),
                active: snap.active_crtc(info).is_some(),
                primary: *output == snap.primary,
            })
            .collect())
    }

    fn friendly_names(&self) -> NativeResult<HashMap<String, String>> {
        let snap = self.snapshot()?;
        let mut names = HashMap::new();
        for (output, info) in &snap.outputs {
            let property = self
                .conn
                .randr_get_output_property(
                    *output,
                    self.edid_atom,
                    u32::from(AtomEnum::ANY),
                    0,
                    (EDID_BLOCK_LEN / 4) as u32,
                    false,
                    false,
                )?
                .reply()?;
            match edid_monitor_name(&property.data) {
                Some(name) => {
                    names.insert(output_name(info), name);
                }
                None => debug!("No EDID monitor name for {}", output_name(info)),
            }
        }
        Ok(names)
    }

    fn current_mode(&self, device: &str) -> NativeResult<Option<ModeRecord>> {
        let snap = self.snapshot()?;
        let (_, info) = snap.output(device)?;
        let Some(crtc) = snap.active_crtc(info) else {
            return Ok(None);
        };
        Ok(snap.mode_info(crtc.mode).map(|mode| ModeRecord {
            mode: self.display_mode(mode),
            position: Position::new(i32::from(crtc.x), i32::from(crtc.y)),
            orientation: from_rotation(crtc.rotation),
            native_id: Some(crtc.mode),
        }))
    }

    fn mode_at(&self, device: &str, index: usize) -> NativeResult<Option<ModeRecord>> {
        // A walk starts at index 0; the list read then serves the rest of it
        let mut walk = self.mode_walk.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if index == 0 || walk.as_ref().is_none_or(|(name, _)| name != device) {
            *walk = Some((device.to_string(), self.output_modes(device)?));
        }
        Ok(walk.as_ref().and_then(|(_, modes)| modes.get(index).copied()))
    }

    fn set_mode(
        &self,
        device: &str,
        record: &ModeRecord,
        fields: FieldMask,
        flags: ApplyFlags,
    ) -> NativeResult<ApplyStatus> {
        let snap = self.snapshot()?;
        let (output, info) = snap.output(device)?;

        if record.is_detach() && fields.intersects(FieldMask::RESOLUTION) {
            if info.crtc == 0 || flags.contains(ApplyFlags::TEST) {
                return Ok(ApplyStatus::Applied);
            }
            self.disable_crtc(&snap, info.crtc)?;
            self.conn.flush()?;
            return Ok(ApplyStatus::Applied);
        }

        let crtc = snap.pick_crtc(info)?;
        let current = snap.active_crtc(info);
        let current_mode = current.and_then(|c| snap.mode_info(c.mode));

        let (width, height) = match current_mode {
            Some(m) if !fields.intersects(FieldMask::RESOLUTION) => {
                (u32::from(m.width), u32::from(m.height))
            }
            _ => (record.mode.width, record.mode.height),
        };
        let refresh = match current_mode {
            Some(m) if !fields.contains(FieldMask::FREQUENCY) => Some(mode_refresh_hz(m)),
            _ if fields.contains(FieldMask::FREQUENCY) => Some(record.mode.refresh_rate_hz),
            _ => None,
        };
        let mode = record
            .native_id
            .filter(|id| {
                info.modes.contains(id)
                    && snap.mode_info(*id).is_some_and(|m| {
                        u32::from(m.width) == width
                            && u32::from(m.height) == height
                            && refresh.is_none_or(|r| mode_refresh_hz(m) == r)
                    })
            })
            .or_else(|| snap.find_mode(info, width, height, refresh))
            .ok_or_else(|| {
                NativeError::new(
                    NativeErrorKind::InvalidParameter,
                    -1,
                    format!("{device} offers no {width}x{height} mode at the requested rate"),
                )
            })?;

        let position = match current {
            Some(c) if !fields.contains(FieldMask::POSITION) => {
                Position::new(i32::from(c.x), i32::from(c.y))
            }
            _ => record.position,
        };
        let rotation = match current {
            Some(c) if !fields.contains(FieldMask::ORIENTATION) => c.rotation,
            _ => to_rotation(record.orientation),
        };

        let supported = snap
            .crtcs
            .get(&crtc)
            .is_some_and(|c| c.rotations.contains(rotation));
        if !supported {
            return Err(NativeError::new(
                NativeErrorKind::InvalidParameter,
                -1,
                format!("CRTC {crtc:#x} cannot apply the requested rotation"),
            ));
        }
        if position.x < 0 || position.y < 0 {
            return Err(NativeError::new(
                NativeErrorKind::InvalidParameter,
                -1,
                "X11 outputs cannot sit at negative coordinates",
            ));
        }

        if flags.contains(ApplyFlags::TEST) {
            return Ok(ApplyStatus::Applied);
        }

        let extent = from_rotation(rotation).extent(&DisplayMode::new(width, height, 0));
        self.ensure_screen_fits(&snap, crtc, position, extent)?;
        self.configure_crtc(&snap, crtc, position, mode, rotation, &[*output])?;
        if flags.contains(ApplyFlags::SET_PRIMARY) {
            self.conn.randr_set_output_primary(self.root, *output)?.check()?;
        }
        self.conn.flush()?;
        Ok(ApplyStatus::Applied)
    }

    fn topology_buffer_sizes(&self, scope: QueryScope) -> NativeResult<(usize, usize)> {
        let snap = self.snapshot()?;
        let active = snap
            .outputs
            .iter()
            .filter(|(_, info)| snap.active_crtc(info).is_some())
            .count();
        let paths = match scope {
            QueryScope::AllPaths => snap.outputs.len(),
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
        let snap = self.snapshot()?;
        let mut topology = Topology::default();

        for (output, info) in &snap.outputs {
            let active = snap.active_crtc(info);
            if scope == QueryScope::ActiveOnly && active.is_none() {
                continue;
            }
            let (source_id, source_mode_idx, target_mode_idx) = match active {
                Some(crtc) => {
                    topology.modes.push(TopologyMode::Source {
                        width: u32::from(crtc.width),
                        height: u32::from(crtc.height),
                        position: Position::new(i32::from(crtc.x), i32::from(crtc.y)),
                    });
                    topology.modes.push(TopologyMode::Target {
                        refresh_rate_hz: snap.mode_info(crtc.mode).map(mode_refresh_hz).unwrap_or(0),
                    });
                    (
                        snap.crtc_index(info.crtc),
                        Some(topology.modes.len() - 2),
                        Some(topology.modes.len() - 1),
                    )
                }
                None => {
                    let candidate = snap.pick_crtc(info).ok();
                    (candidate.map(|c| snap.crtc_index(c)).unwrap_or(0), None, None)
                }
            };
            topology.paths.push(TopologyPath {
                adapter_id: u64::from(self.root),
                source_id,
                target_id: *output,
                target_name: Some(output_name(info)),
                active: active.is_some(),
                target_available: !info.crtcs.is_empty() && !info.modes.is_empty(),
                source_mode_idx,
                target_mode_idx,
            });
        }

        if topology.paths.len() > path_capacity || topology.modes.len() > mode_capacity {
            return Err(NativeError::new(
                NativeErrorKind::InsufficientBuffer,
                -1,
                "topology buffers too small",
            ));
        }
        Ok(topology)
    }

    fn apply_topology(&self, topology: Option<&Topology>, flags: TopologyFlags) -> NativeResult<()> {
        let snap = self.snapshot()?;
        let apply = flags.contains(TopologyFlags::APPLY);

        let Some(topology) = topology else {
            if !flags.contains(TopologyFlags::TOPOLOGY_EXTEND) {
                return Err(NativeError::new(
                    NativeErrorKind::InvalidParameter,
                    -1,
                    "no paths supplied and no topology requested",
                ));
            }
            let mut next_x = snap.rightmost_edge(0);
            for (output, info) in &snap.outputs {
                if snap.active_crtc(info).is_some() {
                    continue;
                }
                let Some(&mode) = info.modes.first() else {
                    continue;
                };
                snap.pick_crtc(info)?;
                if apply {
                    // Outputs are placed left to right; re-read so each sees the last one
                    let fresh = self.snapshot()?;
                    let (_, fresh_info) = fresh.output(&output_name(info))?;
                    self.enable_output(&fresh, *output, fresh_info, mode, Position::new(next_x, 0))?;
                }
                next_x += snap.mode_info(mode).map(|m| i32::from(m.width)).unwrap_or(0);
            }
            self.conn.flush()?;
            return Ok(());
        };

        let mut activations = Vec::new();
        let mut deactivations = Vec::new();
        for path in &topology.paths {
            let (output, info) = snap
                .outputs
                .iter()
                .find(|(o, _)| *o == path.target_id)
                .ok_or_else(|| {
                    NativeError::new(
                        NativeErrorKind::InvalidParameter,
                        -1,
                        format!("unknown output {:#x}", path.target_id),
                    )
                })?;
            let active = snap.active_crtc(info).is_some();
            if path.active && !active {
                snap.pick_crtc(info)?;
                let source = path.source_mode_idx.and_then(|i| topology.modes.get(i));
                let refresh = match path.target_mode_idx.and_then(|i| topology.modes.get(i)) {
                    Some(TopologyMode::Target { refresh_rate_hz }) => Some(*refresh_rate_hz),
                    _ => None,
                };
                let (mode, position) = match source {
                    Some(TopologyMode::Source { width, height, position }) => (
                        snap.find_mode(info, *width, *height, refresh),
                        Some(*position),
                    ),
                    _ => (None, None),
                };
                let mode = mode.or_else(|| info.modes.first().copied()).ok_or_else(|| {
                    NativeError::new(
                        NativeErrorKind::Rejected,
                        -1,
                        format!("{} reports no modes", output_name(info)),
                    )
                })?;
                activations.push((*output, output_name(info), mode, position));
            } else if !path.active && active {
                deactivations.push(info.crtc);
            }
        }

        let active_now = snap
            .outputs
            .iter()
            .filter(|(_, info)| snap.active_crtc(info).is_some())
            .count();
        if active_now + activations.len() <= deactivations.len() {
            return Err(NativeError::new(
                NativeErrorKind::Rejected,
                -1,
                "topology would leave no active output",
            ));
        }
        if !apply {
            return Ok(());
        }

        for crtc in deactivations {
            self.disable_crtc(&snap, crtc)?;
        }
        for (output, name, mode, position) in activations {
            let fresh = self.snapshot()?;
            let (_, info) = fresh.output(&name)?;
            let position = position.unwrap_or_else(|| Position::new(fresh.rightmost_edge(0), 0));
            self.enable_output(&fresh, output, info, mode, position)?;
        }
        self.conn.flush()?;
        Ok(())
    }
}
