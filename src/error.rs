// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the display configuration engine
//!
//! Every fallible engine operation returns a [`DisplayError`] with one variant
//! per failure kind. The orchestrator uses [`DisplayError::short_circuits`] to
//! decide whether a failure ends the whole request or only the current
//! strategy.

use serde::Serialize;
use thiserror::Error;

use crate::monitor::DisplayMode;
use crate::native::{NativeError, NativeErrorKind};
use crate::strategy::Strategy;

/// One failed strategy attempt, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: Strategy,
    pub error: String,
}

/// Main engine error type
#[derive(Error, Debug)]
pub enum DisplayError {
    /// Display id does not resolve to any output
    #[error("Display {0} not found")]
    NotFound(String),

    /// Requested mode is absent from the display's enumerated mode list
    #[error("Mode {mode} is not supported by display {id}")]
    UnsupportedMode { id: String, mode: DisplayMode },

    /// Native call returned a failure code
    #[error("Driver rejected the request (code {code}): {message}")]
    DriverRejected { code: i32, message: String },

    /// Caller lacks the rights to change the display configuration
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Retryable failure (busy adapter, stale config timestamp, short buffer)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Disabling this display would leave no enabled output
    #[error("Refusing to disable {0}: it is the last enabled display")]
    LastDisplayDisableRejected(String),

    /// Every strategy was tried and none succeeded
    #[error("All strategies failed ({} attempt(s))", .0.len())]
    AllStrategiesFailed(Vec<StrategyAttempt>),

    /// The display enumerates but a topology snapshot has no path for it
    #[error("No topology path matches display {0}")]
    PathUnresolved(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State or config (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl DisplayError {
    /// Whether the failure is a caller error that no other strategy can fix
    pub fn short_circuits(&self) -> bool {
        matches!(
            self,
            DisplayError::NotFound(_)
                | DisplayError::UnsupportedMode { .. }
                | DisplayError::PermissionDenied(_)
        )
    }
}

impl From<NativeError> for DisplayError {
    fn from(err: NativeError) -> Self {
        match err.kind {
            NativeErrorKind::NotFound => DisplayError::NotFound(err.message),
            NativeErrorKind::AccessDenied => DisplayError::PermissionDenied(err.message),
            NativeErrorKind::Busy | NativeErrorKind::InsufficientBuffer => {
                DisplayError::Transient(err.message)
            }
            NativeErrorKind::InvalidParameter
            | NativeErrorKind::Rejected
            | NativeErrorKind::NotSupported => DisplayError::DriverRejected {
                code: err.code,
                message: err.message,
            },
        }
    }
}

/// Result type alias for DisplayError
pub type Result<T> = std::result::Result<T, DisplayError>;

/// Error returned by mode-changing operations
pub type ModeError = DisplayError;

/// Error returned by enable/disable requests
pub type EnableError = DisplayError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_short_circuit() {
        assert!(DisplayError::NotFound("DP-9".into()).short_circuits());
        assert!(
            DisplayError::UnsupportedMode {
                id: "DP-1".into(),
                mode: DisplayMode::new(7680, 4320, 240),
            }
            .short_circuits()
        );
        assert!(!DisplayError::Transient("busy".into()).short_circuits());
        assert!(
            !DisplayError::DriverRejected {
                code: -1,
                message: "failed".into()
            }
            .short_circuits()
        );
    }

    #[test]
    fn test_native_error_mapping() {
        let err: DisplayError = NativeError::new(NativeErrorKind::Busy, 170, "adapter busy").into();
        assert!(matches!(err, DisplayError::Transient(_)));

        let err: DisplayError = NativeError::new(NativeErrorKind::Rejected, -1, "failed").into();
        assert!(matches!(err, DisplayError::DriverRejected { code: -1, .. }));

        let err: DisplayError =
            NativeError::new(NativeErrorKind::AccessDenied, 5, "access denied").into();
        assert!(matches!(err, DisplayError::PermissionDenied(_)));
    }

    #[test]
    fn test_all_strategies_failed_message() {
        let err = DisplayError::AllStrategiesFailed(vec![
            StrategyAttempt {
                strategy: Strategy::ActivatePath,
                error: "rejected".into(),
            },
            StrategyAttempt {
                strategy: Strategy::ForceExtend,
                error: "rejected".into(),
            },
        ]);
        assert_eq!(err.to_string(), "All strategies failed (2 attempt(s))");
    }
}
