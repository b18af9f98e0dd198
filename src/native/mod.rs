// SPDX-License-Identifier: GPL-3.0-only
//! Native display-configuration interfaces
//!
//! The engine only talks to the platform through [`DisplayConfigApi`]. Each
//! platform graphics subsystem gets its own implementation of the same
//! contract; supporting another OS means adding one more module here.

#[cfg(feature = "x11-randr")]
pub mod randr;
pub mod simulated;

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::{DisplayMode, Orientation, Position};

/// Failure category reported by a native call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// Device or path name unknown to the platform
    NotFound,
    /// Malformed record or flags
    InvalidParameter,
    /// The driver refused the configuration
    Rejected,
    /// The platform cannot perform this kind of request at all
    NotSupported,
    AccessDenied,
    /// Adapter busy or configuration changed underneath the request
    Busy,
    /// Topology buffers were sized for an older configuration
    InsufficientBuffer,
}

/// Error returned by a native display-configuration call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct NativeError {
    pub kind: NativeErrorKind,
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(kind: NativeErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// One output device as the platform lists it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_name: String,
    pub adapter: String,
    pub active: bool,
    pub primary: bool,
}

/// The platform's own mode record for a device
///
/// `native_id` is the platform handle of an enumerated mode; records built by
/// mutating another record keep the handle of their base, and records the
/// engine synthesizes from scratch have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRecord {
    pub mode: DisplayMode,
    pub position: Position,
    pub orientation: Orientation,
    pub native_id: Option<u32>,
}

impl ModeRecord {
    pub fn synthesized(mode: DisplayMode, position: Position, orientation: Orientation) -> Self {
        Self {
            mode,
            position,
            orientation,
            native_id: None,
        }
    }

    /// Record asking the platform to detach the output
    pub fn detach() -> Self {
        Self {
            mode: DisplayMode {
                width: 0,
                height: 0,
                refresh_rate_hz: 0,
                bits_per_pixel: 0,
            },
            position: Position::default(),
            orientation: Orientation::Landscape,
            native_id: None,
        }
    }

    pub fn is_detach(&self) -> bool {
        self.mode.width == 0 && self.mode.height == 0
    }
}

bitflags! {
    /// Which fields of a [`ModeRecord`] a `set_mode` call carries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FieldMask: u32 {
        const POSITION = 1 << 0;
        const ORIENTATION = 1 << 1;
        const BITS_PER_PEL = 1 << 2;
        const PELS_WIDTH = 1 << 3;
        const PELS_HEIGHT = 1 << 4;
        const FREQUENCY = 1 << 5;
        const RESOLUTION = Self::PELS_WIDTH.bits() | Self::PELS_HEIGHT.bits();
    }
}

bitflags! {
    /// Behaviour flags for `set_mode`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ApplyFlags: u32 {
        /// Validate only, change nothing
        const TEST = 1 << 0;
        /// Persist the record as the device's saved configuration
        const UPDATE_REGISTRY = 1 << 1;
        /// Make this device the primary output
        const SET_PRIMARY = 1 << 2;
        /// Stage the change; the next call without this flag applies it
        const NO_RESET = 1 << 3;
    }
}

bitflags! {
    /// Behaviour flags for `apply_topology`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TopologyFlags: u32 {
        const VALIDATE = 1 << 0;
        const APPLY = 1 << 1;
        const USE_SUPPLIED = 1 << 2;
        const TOPOLOGY_EXTEND = 1 << 3;
        const ALLOW_CHANGES = 1 << 4;
        const SAVE_TO_DATABASE = 1 << 5;
    }
}

/// Outcome of a committed mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Applied,
    /// Accepted, but only takes effect after a restart
    RestartRequired,
}

/// Which paths a topology query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    AllPaths,
    ActiveOnly,
}

/// Linkage between a graphics source and a display target
///
/// Obtained only from [`DisplayConfigApi::query_topology`]; engine code flips
/// `active` and hands the topology back, it never builds paths itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPath {
    pub adapter_id: u64,
    pub source_id: u32,
    pub target_id: u32,
    /// Device name of the target, when the platform exposes it
    pub target_name: Option<String>,
    pub active: bool,
    pub target_available: bool,
    pub source_mode_idx: Option<usize>,
    pub target_mode_idx: Option<usize>,
}

/// Mode entry referenced by index from a [`TopologyPath`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    Source {
        width: u32,
        height: u32,
        position: Position,
    },
    Target {
        refresh_rate_hz: u32,
    },
}

/// Path and mode buffers of one topology query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub paths: Vec<TopologyPath>,
    pub modes: Vec<TopologyMode>,
}

/// Contract every native display-configuration interface implements
pub trait DisplayConfigApi: std::fmt::Debug + Send + Sync {
    /// Short name used in logs
    fn backend_name(&self) -> &'static str;

    /// List every output device, active or not
    fn enumerate_devices(&self) -> NativeResult<Vec<DeviceRecord>>;

    /// Human-friendly monitor names keyed by device name (best effort)
    fn friendly_names(&self) -> NativeResult<HashMap<String, String>>;

    /// Current mode record, `None` when the device is not driven
    fn current_mode(&self, device: &str) -> NativeResult<Option<ModeRecord>>;

    /// Mode record at `index`, `None` once the list is exhausted
    fn mode_at(&self, device: &str, index: usize) -> NativeResult<Option<ModeRecord>>;

    /// Validate (with [`ApplyFlags::TEST`]), stage or apply a mode record
    fn set_mode(
        &self,
        device: &str,
        record: &ModeRecord,
        fields: FieldMask,
        flags: ApplyFlags,
    ) -> NativeResult<ApplyStatus>;

    /// Path and mode buffer sizes needed for [`Self::query_topology`]
    fn topology_buffer_sizes(&self, scope: QueryScope) -> NativeResult<(usize, usize)>;

    /// Read the topology into buffers of the given capacity
    fn query_topology(
        &self,
        scope: QueryScope,
        path_capacity: usize,
        mode_capacity: usize,
    ) -> NativeResult<Topology>;

    /// Validate or apply a topology; `None` lets the platform pick the paths
    fn apply_topology(&self, topology: Option<&Topology>, flags: TopologyFlags) -> NativeResult<()>;

    /// Whether the primary output must sit at the desktop origin
    fn primary_requires_origin(&self) -> bool {
        false
    }
}

/// Query the topology, re-sizing the buffers once if it changed in between
pub fn read_topology(api: &dyn DisplayConfigApi, scope: QueryScope) -> NativeResult<Topology> {
    let (paths, modes) = api.topology_buffer_sizes(scope)?;
    match api.query_topology(scope, paths, modes) {
        Err(err) if err.kind == NativeErrorKind::InsufficientBuffer => {
            debug!("Topology changed between size query and read, retrying once");
            let (paths, modes) = api.topology_buffer_sizes(scope)?;
            api.query_topology(scope, paths, modes)
        }
        other => other,
    }
}

/// Native interface of the running graphics session
#[cfg(feature = "x11-randr")]
pub fn platform_api() -> NativeResult<Arc<dyn DisplayConfigApi>> {
    Ok(Arc::new(randr::RandrDisplayApi::connect(None)?))
}

#[cfg(not(feature = "x11-randr"))]
pub fn platform_api() -> NativeResult<Arc<dyn DisplayConfigApi>> {
    Err(NativeError::new(
        NativeErrorKind::NotSupported,
        -1,
        "built without a native display backend",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::simulated::{SimOp, SimulatedDisplayApi};

    fn short_buffer() -> NativeError {
        NativeError::new(NativeErrorKind::InsufficientBuffer, 122, "buffer too small")
    }

    #[test]
    fn test_read_topology_retries_short_buffer() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.fail_next(SimOp::QueryTopology, short_buffer());
        let topology = read_topology(&api, QueryScope::AllPaths).unwrap();
        assert_eq!(topology.paths.len(), 2);
    }

    #[test]
    fn test_read_topology_retries_only_once() {
        let api = SimulatedDisplayApi::two_display_rig();
        api.fail_next(SimOp::QueryTopology, short_buffer());
        api.fail_next(SimOp::QueryTopology, short_buffer());
        let err = read_topology(&api, QueryScope::AllPaths).unwrap_err();
        assert_eq!(err.kind, NativeErrorKind::InsufficientBuffer);
    }
}
