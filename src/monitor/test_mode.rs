// SPDX-License-Identifier: GPL-3.0-only
//! Timed test mode
//!
//! Applies a mode, keeps it for a fixed time, then restores the original
//! mode and orientation. Cancelling restores early. Dropping the handle does
//! not cancel: the test runs to its deadline and still reverts.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::enumeration;
use super::manager::DisplayManager;
use super::types::{DisplayMode, Orientation};
use crate::error::{DisplayError, Result};

/// How a test run ended; the original mode is restored in both cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestModeOutcome {
    Expired,
    Cancelled,
}

/// Handle to a running test mode
#[derive(Debug)]
pub struct TestModeHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<TestModeOutcome>>,
}

impl TestModeHandle {
    /// Revert now instead of at the deadline
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Wait for the revert and get the outcome the callback also saw
    pub async fn wait(self) -> Result<TestModeOutcome> {
        self.task
            .await
            .map_err(|e| DisplayError::TaskJoin(e.to_string()))?
    }
}

/// Start a test run; must be called from within a tokio runtime
pub(super) fn spawn<F>(
    manager: DisplayManager,
    id: String,
    mode: DisplayMode,
    orientation: Orientation,
    duration: Duration,
    on_complete: F,
) -> TestModeHandle
where
    F: FnOnce(&Result<TestModeOutcome>) + Send + 'static,
{
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let result = run(&manager, &id, mode, orientation, duration, cancel_rx).await;
        match &result {
            Ok(outcome) => info!(display_id = %id, outcome = ?outcome, "Test mode finished"),
            Err(e) => warn!(display_id = %id, error = %e, "Test mode failed"),
        }
        on_complete(&result);
        result
    });
    TestModeHandle {
        cancel: Some(cancel_tx),
        task,
    }
}

async fn run(
    manager: &DisplayManager,
    id: &str,
    mode: DisplayMode,
    orientation: Orientation,
    duration: Duration,
    mut cancel: oneshot::Receiver<()>,
) -> Result<TestModeOutcome> {
    let displays = manager.enumerate().await;
    let display = enumeration::find(&displays, id)?;
    let original_mode = display
        .current_mode
        .ok_or_else(|| DisplayError::NotFound(format!("{id} (not enabled)")))?;
    let original_orientation = display.orientation;

    if let Err(e) = manager.apply_mode(id, mode, orientation).await {
        if !still_at(manager, id, &original_mode, original_orientation).await {
            warn!(display_id = %id, "Test mode only partly applied, reverting");
            if let Err(revert) = manager
                .apply_mode(id, original_mode, original_orientation)
                .await
            {
                error!(display_id = %id, error = %revert, "Failed to revert partial test mode");
            }
        }
        return Err(e);
    }
    info!(
        display_id = %id,
        "Testing {} ({}) for {:?}, then reverting to {}",
        mode, orientation, duration, original_mode
    );

    let deadline = Instant::now() + duration;
    let outcome = tokio::select! {
        _ = tokio::time::sleep_until(deadline) => TestModeOutcome::Expired,
        signal = &mut cancel => match signal {
            Ok(()) => TestModeOutcome::Cancelled,
            // Handle dropped without cancelling
            Err(_) => {
                tokio::time::sleep_until(deadline).await;
                TestModeOutcome::Expired
            }
        },
    };

    manager
        .apply_mode(id, original_mode, original_orientation)
        .await?;
    Ok(outcome)
}

/// Whether `id` still runs `mode` in `orientation`
async fn still_at(
    manager: &DisplayManager,
    id: &str,
    mode: &DisplayMode,
    orientation: Orientation,
) -> bool {
    let displays = manager.enumerate().await;
    enumeration::find(&displays, id).is_ok_and(|display| {
        display.current_mode.is_some_and(|current| current.same_timing(mode))
            && display.orientation == orientation
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::native::simulated::{SimOp, SimulatedDisplayApi};
    use crate::native::{NativeError, NativeErrorKind};

    fn manager(name: &str) -> (DisplayManager, Arc<SimulatedDisplayApi>) {
        let dir = std::env::temp_dir().join(format!("dtc-test-mode-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        let api = Arc::new(SimulatedDisplayApi::two_display_rig());
        let config = EngineConfig {
            settle_delay_ms: 0,
            state_file: Some(dir.join("display_state.json")),
            ..EngineConfig::default()
        };
        (DisplayManager::new(api.clone(), config), api)
    }

    const ORIGINAL: DisplayMode = DisplayMode {
        width: 2560,
        height: 1440,
        refresh_rate_hz: 144,
        bits_per_pixel: 32,
    };

    #[tokio::test]
    async fn test_reverts_after_deadline() {
        let (manager, api) = manager("expire");
        let (tx, rx) = oneshot::channel();
        let handle = manager.test_mode(
            "DISPLAY2",
            DisplayMode::new(1920, 1080, 60),
            Orientation::Landscape,
            Duration::from_millis(20),
            move |result| {
                let _ = tx.send(result.as_ref().ok().copied());
            },
        );
        assert_eq!(handle.wait().await.unwrap(), TestModeOutcome::Expired);
        assert_eq!(rx.await.unwrap(), Some(TestModeOutcome::Expired));
        assert_eq!(api.output("DISPLAY2").unwrap().mode, ORIGINAL);
    }

    #[tokio::test]
    async fn test_cancel_reverts_early() {
        let (manager, api) = manager("cancel");
        let mut handle = manager.test_mode(
            "DISPLAY2",
            DisplayMode::new(1920, 1080, 144),
            Orientation::Portrait,
            Duration::from_secs(3600),
            |_| {},
        );
        // Wait for the test mode to be applied before cancelling
        while api.output("DISPLAY2").unwrap().orientation != Orientation::Portrait {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel();
        assert_eq!(handle.wait().await.unwrap(), TestModeOutcome::Cancelled);

        let out = api.output("DISPLAY2").unwrap();
        assert_eq!(out.mode, ORIGINAL);
        assert_eq!(out.orientation, Orientation::Landscape);
    }

    #[tokio::test]
    async fn test_dropped_handle_still_reverts() {
        let (manager, api) = manager("dropped");
        let (tx, rx) = oneshot::channel();
        let handle = manager.test_mode(
            "DISPLAY2",
            DisplayMode::new(2560, 1440, 60),
            Orientation::Landscape,
            Duration::from_millis(20),
            move |result| {
                let _ = tx.send(result.is_ok());
            },
        );
        drop(handle);
        assert!(rx.await.unwrap());
        assert_eq!(api.output("DISPLAY2").unwrap().mode, ORIGINAL);
    }

    #[tokio::test]
    async fn test_unsupported_mode_reports_error() {
        let (manager, api) = manager("unsupported");
        let (tx, rx) = oneshot::channel();
        let handle = manager.test_mode(
            "DISPLAY1",
            DisplayMode::new(7680, 4320, 240),
            Orientation::Landscape,
            Duration::from_millis(20),
            move |result| {
                let _ = tx.send(matches!(result, Err(DisplayError::UnsupportedMode { .. })));
            },
        );
        assert!(handle.wait().await.is_err());
        assert!(rx.await.unwrap());
        assert_eq!(api.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_original_mode() {
        let (manager, api) = manager("partial");
        // Dry runs and the resize commit pass; the rotation commit fails
        api.fail_after(
            SimOp::SetMode,
            3,
            NativeError::new(NativeErrorKind::Busy, 170, "adapter busy"),
        );
        let (tx, rx) = oneshot::channel();
        let handle = manager.test_mode(
            "DISPLAY2",
            DisplayMode::new(1920, 1080, 144),
            Orientation::Portrait,
            Duration::from_secs(3600),
            move |result| {
                let _ = tx.send(result.is_err());
            },
        );
        assert!(matches!(handle.wait().await, Err(DisplayError::Transient(_))));
        assert!(rx.await.unwrap());

        let out = api.output("DISPLAY2").unwrap();
        assert_eq!(out.mode, ORIGINAL);
        assert_eq!(out.orientation, Orientation::Landscape);
    }
}
