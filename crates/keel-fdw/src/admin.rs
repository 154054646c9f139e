// SPDX-License-Identifier: Apache-2.0

//! Administrative interface: session observability and forced close.

use tracing::info;

use crate::cache::SessionManager;
use crate::error::{FdwError, Result};

/// Snapshot of one cached session, for the host's monitoring surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Stable connection name.
    pub name: String,
    pub server: String,
    pub database: String,
    pub username: String,
    /// Statements started on this session so far.
    pub usage: u64,
    /// Current transaction nesting depth; 0 means idle.
    pub tx_depth: u32,
    pub tx_enabled: bool,
    pub ansi_mode: bool,
    pub commits: u64,
    pub rollbacks: u64,
}

impl SessionManager {
    /// Enumerate all cached sessions.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .cache()
            .handles()
            .into_iter()
            .map(|(key, handle)| {
                let cached = handle.lock();
                SessionInfo {
                    name: key.conname(),
                    server: key.server,
                    database: key.database,
                    username: key.username,
                    usage: cached.usage,
                    tx_depth: cached.tx_depth,
                    tx_enabled: cached.tx_enabled,
                    ansi_mode: cached.ansi_mode,
                    commits: cached.commits,
                    rollbacks: cached.rollbacks,
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    /// Force-close a cached session by its connection name.
    ///
    /// Refuses when the session has an in-progress transaction: closing
    /// it would abandon remote state the host still believes in. This is
    /// a safety invariant, not an optimization.
    pub fn close_session(&self, name: &str) -> Result<()> {
        let Some((key, handle)) = self
            .cache()
            .handles()
            .into_iter()
            .find(|(key, _)| key.conname() == name)
        else {
            return Err(FdwError::UnknownSession(name.to_string()));
        };

        {
            let cached = handle.lock();
            if cached.tx_depth > 0 {
                return Err(FdwError::TransactionInProgress(name.to_string()));
            }
        }

        self.cache().remove(&key);

        let mut cached = handle.lock();
        let dsn = cached.dsn_display.clone();
        cached
            .session_mut()
            .disconnect()
            .map_err(|e| FdwError::remote("disconnect", e))?;
        info!(conname = %name, dsn = %dsn, "cached session closed");
        Ok(())
    }
}
