// SPDX-License-Identifier: Apache-2.0

//! The session contract the connector core drives.
//!
//! The vendor client layer owns the physical connection, the prepared
//! statement registry and the descriptor memory. The core only sees this
//! trait: strictly ordered, blocking calls, each leaving a diagnostic
//! behind on failure. A scriptable implementation is enough to exercise
//! the whole scan lifecycle in tests.

use serde::{Deserialize, Serialize};

use crate::sqlstate::{RemoteError, SqlDiagnostic, SqlStateClass};
use crate::types::{ColumnDescriptor, ParamValue, RawRow};

/// Which kind of remote cursor to request at DECLARE time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorKind {
    /// Plain forward-only cursor.
    ReadOnly,
    /// Scrollable cursor; supports repositioning to the first row.
    Scrollable,
    /// Updatable cursor backing a host-level UPDATE or DELETE.
    Updatable,
    /// No cursor at all; the statement is executed directly.
    NoCursor,
}

impl CursorKind {
    pub fn is_scrollable(&self) -> bool {
        matches!(self, CursorKind::Scrollable)
    }
}

/// Session feature flags detected from the connection warning area at
/// establishment time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCapabilities {
    /// The remote database was created with transaction logging.
    pub tx_enabled: bool,
    /// The remote database runs in ANSI mode.
    pub ansi_mode: bool,
}

/// Everything needed to establish one remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDsn {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    /// Client-side locale, if the session should override the default.
    pub client_locale: Option<String>,
    /// Database locale, if known in advance.
    pub db_locale: Option<String>,
}

impl RemoteDsn {
    /// Display form of the connection target, `database@server`.
    pub fn database_string(&self) -> String {
        format!("{}@{}", self.database, self.server)
    }
}

/// Factory for remote sessions, injected into the session manager.
pub trait RemoteConnector: Send + Sync {
    /// Establish a new session. Implementations must leave the connection
    /// diagnostic readable through [`RemoteSession::connection_status`].
    fn connect(&self, dsn: &RemoteDsn) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// One established remote session.
///
/// The client layer keeps a notion of the "current" connection; callers
/// must invoke [`set_current`](RemoteSession::set_current) immediately
/// before the remote calls of a logical step, with no interleaving of
/// another session's selection in between.
pub trait RemoteSession: Send {
    /// Make this session the target of subsequent remote calls.
    fn set_current(&mut self) -> Result<(), RemoteError>;

    /// Connection status as left by establishment or validation.
    fn connection_status(&mut self) -> SqlStateClass;

    /// Feature flags detected at establishment.
    fn capabilities(&self) -> SessionCapabilities;

    /// Drain accumulated non-fatal diagnostics (SQLSTATE class 01).
    fn drain_warnings(&mut self) -> Vec<SqlDiagnostic>;

    /// Prepare `query` under the given statement identifier.
    fn prepare(&mut self, stmt_name: &str, query: &str) -> Result<(), RemoteError>;

    /// Declare a cursor of the requested kind over a prepared statement.
    fn declare_cursor(
        &mut self,
        cursor_name: &str,
        stmt_name: &str,
        kind: CursorKind,
    ) -> Result<(), RemoteError>;

    /// Allocate and populate the named descriptor area for a prepared
    /// statement, returning the result column metadata.
    fn describe(
        &mut self,
        stmt_name: &str,
        descr_name: &str,
    ) -> Result<Vec<ColumnDescriptor>, RemoteError>;

    /// Open a declared cursor, binding any statement parameters.
    fn open_cursor(&mut self, cursor_name: &str, params: &[ParamValue])
        -> Result<(), RemoteError>;

    /// Fetch the next row. `Ok(None)` is the end-of-data sentinel
    /// (SQLSTATE class 02), not an error.
    fn fetch(&mut self, cursor_name: &str) -> Result<Option<RawRow>, RemoteError>;

    /// Reposition a scrollable cursor onto its first row.
    fn reposition_first(&mut self, cursor_name: &str) -> Result<(), RemoteError>;

    /// Execute a prepared statement without a cursor, returning the number
    /// of affected rows.
    fn execute_prepared(
        &mut self,
        stmt_name: &str,
        params: &[ParamValue],
    ) -> Result<u64, RemoteError>;

    /// Close an open cursor.
    fn close_cursor(&mut self, cursor_name: &str) -> Result<(), RemoteError>;

    /// Release the named descriptor area. The client layer owns that
    /// memory; this is its release primitive, not a generic deallocation.
    fn release_descriptor(&mut self, descr_name: &str) -> Result<(), RemoteError>;

    /// Release a declared cursor's statement resource.
    fn free_cursor(&mut self, cursor_name: &str) -> Result<(), RemoteError>;

    /// Release a prepared statement.
    fn free_statement(&mut self, stmt_name: &str) -> Result<(), RemoteError>;

    /// Start a remote transaction.
    fn begin_work(&mut self) -> Result<(), RemoteError>;

    fn commit(&mut self) -> Result<(), RemoteError>;

    fn rollback(&mut self) -> Result<(), RemoteError>;

    /// Set a named savepoint inside the current transaction.
    fn savepoint(&mut self, name: &str) -> Result<(), RemoteError>;

    /// Release a named savepoint, keeping its effects.
    fn release_savepoint(&mut self, name: &str) -> Result<(), RemoteError>;

    /// Roll back to a named savepoint.
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), RemoteError>;

    /// Close the physical connection.
    fn disconnect(&mut self) -> Result<(), RemoteError>;
}
