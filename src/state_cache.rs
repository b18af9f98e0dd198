// SPDX-License-Identifier: GPL-3.0-only
//! Persisted last-known-good geometry per display
//!
//! One JSON array of [`CachedDisplayState`] in a single file. The file is read
//! once when the cache is opened and rewritten wholesale on every save. Reads
//! come from the in-memory mirror; saves are serialized by a writer lock so
//! two concurrent saves can never interleave their file writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::monitor::{DisplayId, DisplayInfo, DisplayMode, Orientation, Position};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDisplayState {
    pub id: DisplayId,
    pub position: Position,
    pub resolution: DisplayMode,
    pub orientation: Orientation,
    pub is_primary: bool,
    /// Unix seconds
    pub saved_at: u64,
}

impl CachedDisplayState {
    /// Snapshot of an enabled display; `None` when it has no current mode
    pub fn capture(display: &DisplayInfo) -> Option<Self> {
        let resolution = display.current_mode?;
        Some(Self {
            id: display.id.clone(),
            position: display.position,
            resolution,
            orientation: display.orientation,
            is_primary: display.is_primary,
            saved_at: unix_now(),
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct StateCache {
    path: PathBuf,
    entries: RwLock<HashMap<DisplayId, CachedDisplayState>>,
    writer: Mutex<()>,
}

impl StateCache {
    /// Open the cache at `path`, loading whatever it holds
    ///
    /// An absent file is an empty cache. An unreadable or malformed one is
    /// logged and also treated as empty; it is replaced on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::read_file(&path) {
            Ok(entries) => {
                debug!("Loaded {} cached display state(s) from {}", entries.len(), path.display());
                entries
            }
            Err(e) => {
                warn!("Ignoring display state cache {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Self {
            path,
            entries: RwLock::new(entries.into_iter().map(|e| (e.id.clone(), e)).collect()),
            writer: Mutex::new(()),
        }
    }

    fn read_file(path: &Path) -> Result<Vec<CachedDisplayState>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, id: &str) -> Option<CachedDisplayState> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    /// Every entry, ordered by display id
    pub fn entries(&self) -> Vec<CachedDisplayState> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Insert or overwrite one entry and rewrite the file
    ///
    /// The in-memory mirror only takes the entry once the file holds it, so a
    /// failed write leaves both exactly as they were.
    pub fn store(&self, state: CachedDisplayState) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut snapshot: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|entry| entry.id != state.id)
            .cloned()
            .collect();
        snapshot.push(state.clone());
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));

        self.write_file(&snapshot)?;
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(state.id.clone(), state);
        Ok(())
    }

    /// Capture and persist the geometry of `info`
    pub fn save(&self, info: &DisplayInfo) -> bool {
        let Some(state) = CachedDisplayState::capture(info) else {
            warn!(display_id = %info.id, "Display has no current mode, nothing to cache");
            return false;
        };
        match self.store(state) {
            Ok(()) => {
                info!(display_id = %info.id, "Cached display state");
                true
            }
            Err(e) => {
                error!(display_id = %info.id, error = %e, "Failed to persist display state");
                false
            }
        }
    }

    fn write_file(&self, entries: &[CachedDisplayState]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dtc-state-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("display_state.json")
    }

    fn display(id: &str, x: i32) -> DisplayInfo {
        DisplayInfo {
            id: id.to_string(),
            name: id.to_string(),
            current_mode: Some(DisplayMode::new(2560, 1440, 144)),
            position: Position::new(x, 0),
            orientation: Orientation::Landscape,
            is_primary: false,
            is_enabled: true,
            capabilities: None,
        }
    }

    #[test]
    fn test_absent_file_is_empty_cache() {
        let cache = StateCache::open(temp_state_file("absent"));
        assert!(cache.entries().is_empty());
        assert!(cache.load("DISPLAY2").is_none());
    }

    #[test]
    fn test_save_persists_and_reloads() {
        let path = temp_state_file("reload");
        let cache = StateCache::open(&path);
        assert!(cache.save(&display("DISPLAY2", 1920)));
        assert!(cache.save(&display("DISPLAY1", 0)));

        let reopened = StateCache::open(&path);
        let entries = reopened.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "DISPLAY1");
        let cached = reopened.load("DISPLAY2").unwrap();
        assert_eq!(cached.position, Position::new(1920, 0));
        assert_eq!(cached.resolution, DisplayMode::new(2560, 1440, 144));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = StateCache::open(temp_state_file("overwrite"));
        assert!(cache.save(&display("DISPLAY2", 1920)));
        assert!(cache.save(&display("DISPLAY2", 3840)));
        assert_eq!(cache.entries().len(), 1);
        assert_eq!(cache.load("DISPLAY2").unwrap().position.x, 3840);
    }

    #[test]
    fn test_inactive_display_not_saved() {
        let cache = StateCache::open(temp_state_file("inactive"));
        let mut info = display("DISPLAY3", 0);
        info.current_mode = None;
        assert!(!cache.save(&info));
        assert!(cache.load("DISPLAY3").is_none());
    }

    #[test]
    fn test_malformed_file_is_ignored() {
        let path = temp_state_file("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[{ broken").unwrap();
        let cache = StateCache::open(&path);
        assert!(cache.entries().is_empty());
        assert!(cache.save(&display("DISPLAY1", 0)));
        assert_eq!(StateCache::open(&path).entries().len(), 1);
    }

    #[test]
    fn test_concurrent_saves_serialize() {
        let path = temp_state_file("concurrent");
        let cache = std::sync::Arc::new(StateCache::open(&path));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.save(&display(&format!("DISPLAY{i}"), i * 100)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(StateCache::open(&path).entries().len(), 8);
    }

    #[test]
    fn test_failed_write_leaves_mirror_untouched() {
        let path = temp_state_file("unwritable");
        // A directory where the file should be makes the rename fail
        std::fs::create_dir_all(&path).unwrap();
        let cache = StateCache::open(&path);

        assert!(!cache.save(&display("DISPLAY2", 1920)));
        assert!(cache.load("DISPLAY2").is_none());
        assert!(cache.entries().is_empty());
    }
}
