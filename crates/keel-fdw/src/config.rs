// SPDX-License-Identifier: Apache-2.0

//! Process-level configuration for the session manager.

use serde::{Deserialize, Serialize};

/// Configuration for a [`SessionManager`](crate::cache::SessionManager).
///
/// These knobs apply to every session the manager establishes; per-table
/// behavior lives in [`TableOptions`](crate::options::TableOptions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Open a remote transaction around scans on logged databases.
    #[serde(default = "default_transactions")]
    pub transactions: bool,

    /// Prefix for remote savepoint names; the host nesting level is
    /// appended.
    #[serde(default = "default_savepoint_prefix")]
    pub savepoint_prefix: String,

    /// Surface remote connection warnings to the host log.
    #[serde(default = "default_log_connection_warnings")]
    pub log_connection_warnings: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            transactions: default_transactions(),
            savepoint_prefix: default_savepoint_prefix(),
            log_connection_warnings: default_log_connection_warnings(),
        }
    }
}

impl ManagerConfig {
    /// Remote savepoint name for a host nesting level.
    pub fn savepoint_name(&self, level: u32) -> String {
        format!("{}{}", self.savepoint_prefix, level)
    }
}

fn default_transactions() -> bool {
    true
}

fn default_savepoint_prefix() -> String {
    "keelsp".to_string()
}

fn default_log_connection_warnings() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert!(config.transactions);
        assert!(config.log_connection_warnings);
        assert_eq!(config.savepoint_name(2), "keelsp2");
    }
}
