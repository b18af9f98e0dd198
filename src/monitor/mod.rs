// SPDX-License-Identifier: GPL-3.0-only
pub mod applier;
mod enumeration;
mod manager;
pub mod modes;
pub mod paths;
mod test_mode;
mod types;

pub use applier::ApplyOutcome;
pub use enumeration::{enumerate_displays, find, place_inactive};
pub use manager::DisplayManager;
pub use test_mode::{TestModeHandle, TestModeOutcome};
pub use types::*;
