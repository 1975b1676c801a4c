// =============================================================================
// Control channel — on-disk control token + in-process wake-up
// =============================================================================
//
// The token file (`data/bot_control.txt`) is the cross-process source of
// truth for the engine's desired run state: a single line containing
// `running`, `paused`, or `stopped`. An absent file reads as `stopped`.
//
// Writes use the tmp + rename pattern so observers never see a torn value.
// The in-process `Notify` lets the control plane wake the engine immediately
// instead of waiting for the next poll tick.
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::info;

use crate::types::ControlState;

pub struct ControlChannel {
    path: PathBuf,
    notify: Notify,
}

impl ControlChannel {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            notify: Notify::new(),
        }
    }

    /// Read the current desired state. Missing or unreadable file ⇒ stopped.
    pub fn state(&self) -> ControlState {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => ControlState::from_token(&content),
            Err(_) => ControlState::Stopped,
        }
    }

    /// Atomically replace the token value and wake any in-process waiter.
    pub fn set_state(&self, state: ControlState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("txt.tmp");
        std::fs::write(&tmp, state.as_str())
            .with_context(|| format!("failed to write control token to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to rename control token to {}", self.path.display()))?;

        info!(state = %state, "control token written");
        self.notify.notify_waiters();
        Ok(())
    }

    /// Wait until nudged or until `timeout` elapses, whichever comes first.
    /// The engine uses this inside its sleep and idle loops.
    pub async fn wait_for_nudge(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}
