// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

//! Scriptable in-memory remote server for lifecycle tests.
//!
//! The mock serves one table, records every remote call in a shared log
//! and can be told to fail at a named step, which is enough to exercise
//! the whole scan/modify lifecycle including every unwind path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use keel_remote::{
    CodecError, ColumnDescriptor, CursorKind, ParamValue, RawCell, RawRow, RemoteConnector,
    RemoteDsn, RemoteError, RemoteSession, RemoteType, SessionCapabilities, SqlDiagnostic,
    SqlStateClass, ValueCodec,
};

use keel_fdw::{ManagerConfig, SessionManager, TableOptions};

/// State shared between a test and the sessions it spawned.
#[derive(Default)]
pub struct RemoteState {
    /// Remote calls in invocation order, by operation name.
    pub calls: Vec<String>,
    /// Operation name to fail at, e.g. "open".
    pub fail_on: Option<&'static str>,
    /// Pending diagnostics returned by the next drain.
    pub warnings: Vec<SqlDiagnostic>,
    /// Refuse new connections entirely.
    pub refuse_connections: bool,
    /// How many connections were established.
    pub connections: u32,
}

pub type SharedState = Arc<Mutex<RemoteState>>;

pub fn shared_state() -> SharedState {
    Arc::new(Mutex::new(RemoteState::default()))
}

/// The table every session of a [`MockServer`] serves.
#[derive(Clone)]
pub struct MockTable {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<RawRow>,
}

impl MockTable {
    /// Three-column orders table with three rows.
    pub fn orders() -> Self {
        Self {
            columns: vec![
                ColumnDescriptor::new("id", RemoteType::Integer),
                ColumnDescriptor::new("amount", RemoteType::Decimal),
                ColumnDescriptor::new("note", RemoteType::VarChar),
            ],
            rows: vec![
                text_row(&["1", "10.50", "first"]),
                text_row(&["2", "20.00", "second"]),
                text_row(&["3", "7.25", "third"]),
            ],
        }
    }
}

pub fn text_row(cells: &[&str]) -> RawRow {
    RawRow::new(cells.iter().map(RawCell::from_text).collect())
}

pub struct MockServer {
    pub state: SharedState,
    pub table: MockTable,
    pub capabilities: SessionCapabilities,
}

impl MockServer {
    pub fn new(state: SharedState, table: MockTable) -> Self {
        Self {
            state,
            table,
            capabilities: SessionCapabilities {
                tx_enabled: true,
                ansi_mode: false,
            },
        }
    }
}

impl RemoteConnector for MockServer {
    fn connect(&self, dsn: &RemoteDsn) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(RemoteError::new(
                "08001",
                -908,
                format!("cannot connect to {}", dsn.database_string()),
            ));
        }
        state.connections += 1;
        state.calls.push("connect".into());
        drop(state);

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            capabilities: self.capabilities,
            table: self.table.clone(),
            prepared: HashMap::new(),
            declared: HashMap::new(),
            open_cursors: HashMap::new(),
        }))
    }
}

struct MockSession {
    state: SharedState,
    capabilities: SessionCapabilities,
    table: MockTable,
    /// statement name → query text
    prepared: HashMap<String, String>,
    /// cursor name → statement name
    declared: HashMap<String, String>,
    /// cursor name → next row position
    open_cursors: HashMap<String, usize>,
}

impl MockSession {
    fn record(&mut self, op: &'static str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(op.to_string());
        if state.fail_on == Some(op) {
            return Err(RemoteError::new(
                "IX000",
                -400,
                format!("injected failure at {}", op),
            ));
        }
        Ok(())
    }
}

impl RemoteSession for MockSession {
    fn set_current(&mut self) -> Result<(), RemoteError> {
        self.record("set_current")
    }

    fn connection_status(&mut self) -> SqlStateClass {
        if self.state.lock().warnings.is_empty() {
            SqlStateClass::ConnectionOk
        } else {
            SqlStateClass::ConnectionWarn
        }
    }

    fn capabilities(&self) -> SessionCapabilities {
        self.capabilities
    }

    fn drain_warnings(&mut self) -> Vec<SqlDiagnostic> {
        std::mem::take(&mut self.state.lock().warnings)
    }

    fn prepare(&mut self, stmt_name: &str, query: &str) -> Result<(), RemoteError> {
        self.record("prepare")?;
        self.prepared.insert(stmt_name.into(), query.into());
        Ok(())
    }

    fn declare_cursor(
        &mut self,
        cursor_name: &str,
        stmt_name: &str,
        _kind: CursorKind,
    ) -> Result<(), RemoteError> {
        self.record("declare")?;
        if !self.prepared.contains_key(stmt_name) {
            return Err(RemoteError::new("42602", -310, "no such prepared statement"));
        }
        self.declared.insert(cursor_name.into(), stmt_name.into());
        Ok(())
    }

    fn describe(
        &mut self,
        stmt_name: &str,
        _descr_name: &str,
    ) -> Result<Vec<ColumnDescriptor>, RemoteError> {
        self.record("describe")?;
        if !self.prepared.contains_key(stmt_name) {
            return Err(RemoteError::new("42602", -310, "no such prepared statement"));
        }
        Ok(self.table.columns.clone())
    }

    fn open_cursor(
        &mut self,
        cursor_name: &str,
        _params: &[ParamValue],
    ) -> Result<(), RemoteError> {
        self.record("open")?;
        if !self.declared.contains_key(cursor_name) {
            return Err(RemoteError::new("42602", -310, "no such cursor"));
        }
        self.open_cursors.insert(cursor_name.into(), 0);
        Ok(())
    }

    fn fetch(&mut self, cursor_name: &str) -> Result<Option<RawRow>, RemoteError> {
        self.record("fetch")?;
        let pos = self
            .open_cursors
            .get_mut(cursor_name)
            .ok_or_else(|| RemoteError::new("42602", -310, "cursor not open"))?;

        match self.table.rows.get(*pos) {
            Some(row) => {
                *pos += 1;
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    fn reposition_first(&mut self, cursor_name: &str) -> Result<(), RemoteError> {
        self.record("reposition")?;
        let pos = self
            .open_cursors
            .get_mut(cursor_name)
            .ok_or_else(|| RemoteError::new("42602", -310, "cursor not open"))?;
        *pos = 0;
        Ok(())
    }

    fn execute_prepared(
        &mut self,
        stmt_name: &str,
        _params: &[ParamValue],
    ) -> Result<u64, RemoteError> {
        self.record("execute")?;
        if !self.prepared.contains_key(stmt_name) {
            return Err(RemoteError::new("42602", -310, "no such prepared statement"));
        }
        Ok(1)
    }

    fn close_cursor(&mut self, cursor_name: &str) -> Result<(), RemoteError> {
        self.record("close_cursor")?;
        self.open_cursors.remove(cursor_name);
        Ok(())
    }

    fn release_descriptor(&mut self, _descr_name: &str) -> Result<(), RemoteError> {
        self.record("release_descriptor")
    }

    fn free_cursor(&mut self, cursor_name: &str) -> Result<(), RemoteError> {
        self.record("free_cursor")?;
        self.declared.remove(cursor_name);
        Ok(())
    }

    fn free_statement(&mut self, stmt_name: &str) -> Result<(), RemoteError> {
        self.record("free_statement")?;
        self.prepared.remove(stmt_name);
        Ok(())
    }

    fn begin_work(&mut self) -> Result<(), RemoteError> {
        self.record("begin_work")
    }

    fn commit(&mut self) -> Result<(), RemoteError> {
        self.record("commit")
    }

    fn rollback(&mut self) -> Result<(), RemoteError> {
        self.record("rollback")
    }

    fn savepoint(&mut self, _name: &str) -> Result<(), RemoteError> {
        self.record("savepoint")
    }

    fn release_savepoint(&mut self, _name: &str) -> Result<(), RemoteError> {
        self.record("release_savepoint")
    }

    fn rollback_to_savepoint(&mut self, _name: &str) -> Result<(), RemoteError> {
        self.record("rollback_to_savepoint")
    }

    fn disconnect(&mut self) -> Result<(), RemoteError> {
        self.record("disconnect")
    }
}

/// Codec mapping every remote value to its text form; null stays `None`.
pub struct TextCodec;

impl ValueCodec for TextCodec {
    type Value = Option<String>;

    fn decode(&self, column: &ColumnDescriptor, cell: &RawCell) -> Result<Self::Value, CodecError> {
        let text = std::str::from_utf8(&cell.data).map_err(|_| CodecError::Malformed {
            column: column.name.clone(),
            reason: "not valid UTF-8".into(),
        })?;
        Ok(Some(text.to_string()))
    }

    fn null_value(&self) -> Self::Value {
        None
    }
}

/// Codec that refuses every value, for conversion-failure tests.
pub struct FailingCodec;

impl ValueCodec for FailingCodec {
    type Value = Option<String>;

    fn decode(&self, column: &ColumnDescriptor, _cell: &RawCell) -> Result<Self::Value, CodecError> {
        Err(CodecError::NotRepresentable {
            column: column.name.clone(),
            ty: column.ty,
            reason: "no host type".into(),
        })
    }

    fn null_value(&self) -> Self::Value {
        None
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn table_options() -> TableOptions {
    TableOptions {
        server: "olympia".into(),
        database: "stores".into(),
        username: "scott".into(),
        table: Some("orders".into()),
        ..Default::default()
    }
}

pub fn manager_with(state: &SharedState, table: MockTable) -> SessionManager {
    SessionManager::new(
        Box::new(MockServer::new(Arc::clone(state), table)),
        ManagerConfig::default(),
    )
}

/// Remote calls recorded since the beginning, filtered to the given set.
pub fn calls_of(state: &SharedState, names: &[&str]) -> Vec<String> {
    state
        .lock()
        .calls
        .iter()
        .filter(|c| names.contains(&c.as_str()))
        .cloned()
        .collect()
}
