//! Reload cycle state.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Where the reload cycle currently is.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReloadState {
    Idle = 0,
    Checking = 1,
    Reconciling = 2,
}

impl From<u8> for ReloadState {
    fn from(val: u8) -> Self {
        match val {
            1 => ReloadState::Checking,
            2 => ReloadState::Reconciling,
            _ => ReloadState::Idle,
        }
    }
}

/// [`ReloadState`] readable from any thread.
#[derive(Debug, Default)]
pub(crate) struct AtomicReloadState(AtomicU8);

impl AtomicReloadState {
    pub(crate) fn load(&self) -> ReloadState {
        ReloadState::from(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ReloadState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
