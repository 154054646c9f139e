// SPDX-License-Identifier: Apache-2.0

//! Scan and modify execution.
//!
//! `ScanExecutor` drives one remote cursor through its whole life:
//! PREPARE → DECLARE → DESCRIBE → OPEN → FETCH* → unwind, with every
//! remote call routed through the error trap so that any failure releases
//! exactly the acquired resources before it surfaces. Planning and
//! beginning are split the way host engines split their callbacks: a
//! serializable [`ScanPlan`] carries the synthesized statement from the
//! plan phase to the begin phase, and a cached plan skips re-planning.

use keel_remote::{
    ColumnDescriptor, CursorKind, ParamValue, RawRow, RemoteError, RemoteSession, SqlDiagnostic,
    ValueCodec,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{AcquireMode, SessionHandle, SessionManager};
use crate::callstack::{ResourceCallStack, ResourceFlag, StatementNames};
use crate::error::{FdwError, Result};
use crate::options::TableOptions;
use crate::pushdown::{FilterExpr, PredicateCompiler, RelationId};
use crate::sql::{
    QuerySynthesizer, RowIdentity, RowIdentityMode, ScanTarget, StatementPurpose, StatementSpec,
    SynthesizedStatement,
};

/// One host column of the foreign table. Dropped columns have no remote
/// counterpart; they are never fetched and always render as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostColumn {
    pub name: String,
    /// Host attribute number; `None` marks a dropped column.
    pub attnum: Option<i16>,
}

impl HostColumn {
    pub fn new(name: impl Into<String>, attnum: i16) -> Self {
        Self {
            name: name.into(),
            attnum: Some(attnum),
        }
    }

    pub fn dropped() -> Self {
        Self {
            name: String::new(),
            attnum: None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.attnum.is_none()
    }
}

/// A scan or update-backing scan as requested by the host.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub options: TableOptions,
    /// Identity of the scanned relation inside the host's query, used to
    /// classify column references during pushdown.
    pub relation: RelationId,
    pub purpose: StatementPurpose,
    /// Host filter tree; top-level entries are implicitly ANDed.
    pub quals: Vec<FilterExpr>,
    pub columns: Vec<HostColumn>,
    /// The host expects to restart this scan with new parameters.
    pub expect_rescan: bool,
}

/// Everything the begin phase needs, produced by the plan phase.
/// Serializable so the host can stash it in its own plan structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPlan {
    pub options: TableOptions,
    pub purpose: StatementPurpose,
    pub target: ScanTarget,
    pub identity: RowIdentityMode,
    /// Reference id minted from the session usage counter.
    pub refid: u64,
    pub names: StatementNames,
    pub statement: SynthesizedStatement,
    pub predicate: Option<String>,
    pub rejected: usize,
    pub columns: Vec<HostColumn>,
}

/// Result of planning: the carryable plan plus the residual quals the
/// host must keep evaluating locally.
#[derive(Debug, Clone)]
pub struct PlannedScan {
    pub plan: ScanPlan,
    pub residual: Vec<FilterExpr>,
}

/// Observability snapshot for the host's EXPLAIN output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanExplain {
    pub query: String,
    pub predicate: Option<String>,
    pub cursor_name: String,
    pub cursor_kind: CursorKind,
    pub refid: u64,
}

/// Life stages of one scan. Transitions correspond 1:1 to call-stack
/// flags, plus Iterating → Exhausted on the end-of-data sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Prepared,
    Declared,
    Described,
    Open,
    Iterating,
    Exhausted,
    Error,
    Closed,
}

/// Plan a scan: compile the pushdown, synthesize the statement and mint
/// the per-statement names. Advances the session usage counter.
pub fn plan_scan(manager: &SessionManager, request: &ScanRequest) -> Result<PlannedScan> {
    request.options.validate()?;

    let acquired = manager.acquire(&request.options, AcquireMode::NewStatement)?;
    let conname = acquired.handle.lock().conname();
    let names = StatementNames::derive(&conname, acquired.refid);

    let (predicate, residual, rejected) = if request.options.predicate_pushdown {
        let compiled = PredicateCompiler::new(request.relation)
            .with_delimident(request.options.delimident)
            .compile(&request.quals);
        (compiled.pushed, compiled.residual, compiled.rejected)
    } else {
        (None, request.quals.clone(), 0)
    };

    let target = match (&request.options.table, &request.options.query) {
        (Some(table), _) => ScanTarget::Table(table.clone()),
        (None, Some(query)) => ScanTarget::Query(query.clone()),
        (None, None) => {
            return Err(FdwError::InvalidOptions(
                "either 'table' or 'query' must be specified".into(),
            ))
        }
    };

    let identity = if request.options.disable_rowid {
        RowIdentityMode::CursorPosition
    } else {
        RowIdentityMode::Token
    };

    let fetched: Vec<String> = request
        .columns
        .iter()
        .filter(|c| !c.is_dropped())
        .map(|c| c.name.clone())
        .collect();

    let statement = QuerySynthesizer::new(request.options.delimident).build(&StatementSpec {
        purpose: request.purpose,
        target: &target,
        predicate: predicate.as_deref(),
        columns: &fetched,
        identity,
        cursor_name: &names.cursor,
        expect_rescan: request.expect_rescan,
    })?;

    debug!(refid = acquired.refid, query = %statement.text, "planned remote scan");

    Ok(PlannedScan {
        plan: ScanPlan {
            options: request.options.clone(),
            purpose: request.purpose,
            target,
            identity,
            refid: acquired.refid,
            names,
            statement,
            predicate,
            rejected,
            columns: request.columns.clone(),
        },
        residual,
    })
}

/// Executes one planned scan.
pub struct ScanExecutor {
    handle: SessionHandle,
    plan: ScanPlan,
    stack: ResourceCallStack,
    phase: ScanPhase,
    remote_columns: Vec<ColumnDescriptor>,
    /// Host column index → position in the fetched row.
    column_map: Vec<Option<usize>>,
    /// Position of the trailing row-identity column, when retrieved.
    identity_position: Option<usize>,
    last_identity: Option<RowIdentity>,
    warnings: Vec<SqlDiagnostic>,
    rows_fetched: u64,
}

impl ScanExecutor {
    /// Reattach to the cached session and drive the cursor open. Does
    /// not advance the usage counter.
    pub fn begin(manager: &SessionManager, plan: ScanPlan) -> Result<Self> {
        let acquired = manager.acquire(&plan.options, AcquireMode::Reattach)?;
        manager.begin_remote_xact(&acquired.handle)?;

        let mut exec = Self {
            handle: acquired.handle,
            plan,
            stack: ResourceCallStack::new(),
            phase: ScanPhase::Idle,
            remote_columns: Vec::new(),
            column_map: Vec::new(),
            identity_position: None,
            last_identity: None,
            warnings: Vec::new(),
            rows_fetched: 0,
        };
        exec.open_remote()?;
        Ok(exec)
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// Warnings drained from the session while this scan ran.
    pub fn warnings(&self) -> &[SqlDiagnostic] {
        &self.warnings
    }

    /// Row identity of the most recently fetched row, when the scan
    /// retrieves one.
    pub fn last_row_identity(&self) -> Option<RowIdentity> {
        self.last_identity
    }

    pub fn explain(&self) -> ScanExplain {
        ScanExplain {
            query: self.plan.statement.text.clone(),
            predicate: self.plan.predicate.clone(),
            cursor_name: self.plan.names.cursor.clone(),
            cursor_kind: self.plan.statement.cursor_kind,
            refid: self.plan.refid,
        }
    }

    fn open_remote(&mut self) -> Result<()> {
        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();

        self.trap(session, "set connection", None, |s| s.set_current())?;

        debug!(statement = %self.plan.names.statement, query = %self.plan.statement.text,
               "prepare query");
        let stmt_text = self.plan.statement.text.clone();
        let names = self.plan.names.clone();
        self.trap(session, "prepare", Some(ResourceFlag::Prepared), |s| {
            s.prepare(&names.statement, &stmt_text)
        })?;
        self.phase = ScanPhase::Prepared;

        debug!(cursor = %names.cursor, "declare cursor");
        let kind = self.plan.statement.cursor_kind;
        self.trap(session, "declare cursor", Some(ResourceFlag::Declared), |s| {
            s.declare_cursor(&names.cursor, &names.statement, kind)
        })?;
        self.phase = ScanPhase::Declared;

        debug!(descriptor = %names.descriptor, "populate descriptor area");
        let described = self.trap(session, "describe", Some(ResourceFlag::Described), |s| {
            s.describe(&names.statement, &names.descriptor)
        })?;
        self.phase = ScanPhase::Described;

        if let Err(e) = self.build_column_map(described) {
            self.stack.unwind(session, &self.plan.names);
            self.phase = ScanPhase::Error;
            return Err(e);
        }

        debug!(cursor = %names.cursor, "open cursor");
        self.trap(session, "open cursor", Some(ResourceFlag::Open), |s| {
            s.open_cursor(&names.cursor, &[])
        })?;
        self.phase = ScanPhase::Open;

        Ok(())
    }

    /// Fetch and convert the next row. `Ok(None)` means the cursor is
    /// exhausted; resources stay acquired until [`end`](Self::end).
    pub fn fetch_next<C: ValueCodec>(&mut self, codec: &C) -> Result<Option<Vec<C::Value>>> {
        match self.phase {
            ScanPhase::Open | ScanPhase::Iterating => {}
            ScanPhase::Exhausted => return Ok(None),
            other => {
                return Err(FdwError::Internal(format!(
                    "fetch on a scan in phase {:?}",
                    other
                )))
            }
        }

        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();

        self.trap(session, "set connection", None, |s| s.set_current())?;

        let cursor = self.plan.names.cursor.clone();
        let row = self.trap(session, "fetch", None, |s| s.fetch(&cursor))?;

        let Some(row) = row else {
            // SQLSTATE class 02: end of data, not an error.
            debug!(cursor = %cursor, rows = self.rows_fetched, "scan end");
            self.phase = ScanPhase::Exhausted;
            return Ok(None);
        };

        self.phase = ScanPhase::Iterating;
        self.rows_fetched += 1;

        match self.assemble_row(codec, &row) {
            Ok(values) => Ok(Some(values)),
            Err(e) => {
                // A conversion failure mid-row must still release the
                // open cursor before it propagates.
                self.stack.unwind(session, &self.plan.names);
                self.phase = ScanPhase::Error;
                Err(e)
            }
        }
    }

    fn assemble_row<C: ValueCodec>(&mut self, codec: &C, row: &RawRow) -> Result<Vec<C::Value>> {
        if let Some(pos) = self.identity_position {
            self.last_identity = Some(decode_row_identity(row, pos)?);
        }

        let mut values = Vec::with_capacity(self.column_map.len());
        for (host_idx, remote_pos) in self.column_map.iter().enumerate() {
            let Some(pos) = remote_pos else {
                values.push(codec.null_value());
                continue;
            };

            let descriptor = &self.remote_columns[*pos];
            let cell = row.cells.get(*pos).ok_or_else(|| {
                FdwError::Internal(format!("fetched row has no column {}", pos))
            })?;

            if cell.is_null() {
                values.push(codec.null_value());
            } else {
                let value =
                    codec
                        .decode(descriptor, cell)
                        .map_err(|source| FdwError::Conversion {
                            column: self.plan.columns[host_idx].name.clone(),
                            source,
                        })?;
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Restart the scan. Scrollable cursors reposition to their first
    /// row; any other kind closes and reopens the cursor. The choice was
    /// fixed at plan time by the cursor kind.
    pub fn rescan(&mut self) -> Result<()> {
        match self.phase {
            ScanPhase::Open | ScanPhase::Iterating | ScanPhase::Exhausted => {}
            other => {
                return Err(FdwError::Internal(format!(
                    "rescan on a scan in phase {:?}",
                    other
                )))
            }
        }

        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();

        self.trap(session, "set connection", None, |s| s.set_current())?;

        let cursor = self.plan.names.cursor.clone();
        if self.plan.statement.cursor_kind.is_scrollable() {
            debug!(cursor = %cursor, "rescan: reposition to first row");
            self.trap(session, "reposition", None, |s| s.reposition_first(&cursor))?;
        } else {
            debug!(cursor = %cursor, "rescan: close and reopen");
            self.trap(session, "close cursor", None, |s| s.close_cursor(&cursor))?;
            self.trap(session, "open cursor", None, |s| s.open_cursor(&cursor, &[]))?;
        }

        self.phase = ScanPhase::Open;
        self.rows_fetched = 0;
        self.last_identity = None;
        Ok(())
    }

    /// Tear the scan down, releasing every acquired remote resource.
    /// Safe in any phase, including before the first fetch.
    pub fn end(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.phase == ScanPhase::Closed {
            return;
        }
        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();
        if let Err(e) = session.set_current() {
            warn!("set connection failed during scan teardown: {}", e);
        }
        self.stack.unwind(session, &self.plan.names);
        self.phase = ScanPhase::Closed;
    }

    /// The error trap: run one remote call, surface drained warnings,
    /// push the acquired flag on success, unwind fully and attach the
    /// local step name on failure.
    fn trap<T>(
        &mut self,
        session: &mut dyn RemoteSession,
        step: &'static str,
        flag: Option<ResourceFlag>,
        call: impl FnOnce(&mut dyn RemoteSession) -> std::result::Result<T, RemoteError>,
    ) -> Result<T> {
        let result = call(session);

        for diag in session.drain_warnings() {
            warn!(step, sqlstate = %diag.sqlstate, "remote warning: {}", diag.message);
            self.warnings.push(diag);
        }

        match result {
            Ok(value) => {
                self.stack.push(flag);
                Ok(value)
            }
            Err(e) => {
                if e.class().requires_unwind() {
                    self.stack.unwind(session, &self.plan.names);
                }
                self.phase = ScanPhase::Error;
                Err(FdwError::remote(step, e))
            }
        }
    }

    fn build_column_map(&mut self, described: Vec<ColumnDescriptor>) -> Result<()> {
        let fetched = self
            .plan
            .columns
            .iter()
            .filter(|c| !c.is_dropped())
            .count();
        let with_identity = self.plan.purpose == StatementPurpose::SelectForUpdate
            && self.plan.identity == RowIdentityMode::Token
            && !self.plan.target.is_query();
        let expected = fetched + usize::from(with_identity);

        // A query target projects whatever its text says; the host's
        // column list must still line up with it.
        if described.len() != expected && !self.plan.target.is_query() {
            return Err(FdwError::Internal(format!(
                "remote result has {} columns, expected {}",
                described.len(),
                expected
            )));
        }

        let mut next = 0usize;
        self.column_map = self
            .plan
            .columns
            .iter()
            .map(|c| {
                if c.is_dropped() {
                    None
                } else {
                    let pos = next;
                    next += 1;
                    Some(pos)
                }
            })
            .collect();

        self.identity_position = with_identity.then_some(described.len() - 1);
        self.remote_columns = described;
        Ok(())
    }
}

impl Drop for ScanExecutor {
    fn drop(&mut self) {
        // Host abandonment without end() must not leak remote resources.
        self.teardown();
    }
}

fn decode_row_identity(row: &RawRow, pos: usize) -> Result<RowIdentity> {
    let cell = row
        .cells
        .get(pos)
        .ok_or_else(|| FdwError::Internal("fetched row has no identity column".into()))?;
    let text = std::str::from_utf8(&cell.data)
        .map_err(|_| FdwError::Internal("row identity column is not valid text".into()))?;
    let raw: u64 = text
        .trim()
        .parse()
        .map_err(|_| FdwError::Internal(format!("malformed row identity \"{}\"", text)))?;
    Ok(RowIdentity::from_host_token(raw))
}

/// A modify statement as requested by the host.
#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub options: TableOptions,
    /// Insert, Update or Delete.
    pub purpose: StatementPurpose,
    /// Affected host columns, in the order values will be bound.
    pub columns: Vec<String>,
    /// Cursor of the backing scan, for CURRENT OF row identity.
    pub scan_cursor: Option<String>,
}

/// Executes INSERT/UPDATE/DELETE statements prepared once and run per
/// row.
pub struct ModifyExecutor {
    handle: SessionHandle,
    names: StatementNames,
    identity: RowIdentityMode,
    purpose: StatementPurpose,
    stack: ResourceCallStack,
    statement: SynthesizedStatement,
    warnings: Vec<SqlDiagnostic>,
    rows_affected: u64,
    closed: bool,
}

impl ModifyExecutor {
    pub fn begin(manager: &SessionManager, request: &ModifyRequest) -> Result<Self> {
        if !matches!(
            request.purpose,
            StatementPurpose::Insert | StatementPurpose::Update | StatementPurpose::Delete
        ) {
            return Err(FdwError::Internal(format!(
                "modify executor cannot run {:?}",
                request.purpose
            )));
        }
        request.options.validate()?;

        let table = match &request.options.table {
            Some(table) => ScanTarget::Table(table.clone()),
            None => {
                return Err(FdwError::InvalidOptions(
                    "a 'query' table cannot back INSERT, UPDATE or DELETE".into(),
                ))
            }
        };

        let identity = if request.options.disable_rowid {
            RowIdentityMode::CursorPosition
        } else {
            RowIdentityMode::Token
        };

        if identity == RowIdentityMode::CursorPosition
            && matches!(
                request.purpose,
                StatementPurpose::Update | StatementPurpose::Delete
            )
            && request.scan_cursor.is_none()
        {
            return Err(FdwError::Internal(
                "cursor-position row identity requires the backing scan's cursor".into(),
            ));
        }

        let acquired = manager.acquire(&request.options, AcquireMode::NewStatement)?;
        let conname = acquired.handle.lock().conname();
        let names = StatementNames::derive(&conname, acquired.refid);

        let cursor_name = request
            .scan_cursor
            .clone()
            .unwrap_or_else(|| names.cursor.clone());
        let statement = QuerySynthesizer::new(request.options.delimident).build(&StatementSpec {
            purpose: request.purpose,
            target: &table,
            predicate: None,
            columns: &request.columns,
            identity,
            cursor_name: &cursor_name,
            expect_rescan: false,
        })?;

        manager.begin_remote_xact(&acquired.handle)?;

        let mut exec = Self {
            handle: acquired.handle,
            names,
            identity,
            purpose: request.purpose,
            stack: ResourceCallStack::new(),
            statement,
            warnings: Vec::new(),
            rows_affected: 0,
            closed: false,
        };
        exec.prepare_remote()?;
        Ok(exec)
    }

    pub fn statement_text(&self) -> &str {
        &self.statement.text
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn warnings(&self) -> &[SqlDiagnostic] {
        &self.warnings
    }

    fn prepare_remote(&mut self) -> Result<()> {
        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();

        self.trap(session, "set connection", None, |s| s.set_current())?;

        debug!(statement = %self.names.statement, query = %self.statement.text,
               "prepare modify statement");
        let names = self.names.clone();
        let text = self.statement.text.clone();
        self.trap(session, "prepare", Some(ResourceFlag::Prepared), |s| {
            s.prepare(&names.statement, &text)
        })?;
        Ok(())
    }

    /// Execute the prepared statement for one row. For token-identity
    /// UPDATE/DELETE the row-identity parameter is appended after the
    /// column values, matching the placeholder order of the synthesized
    /// text.
    pub fn execute(&mut self, values: &[ParamValue], identity: Option<RowIdentity>) -> Result<u64> {
        if self.closed {
            return Err(FdwError::Internal("execute on a closed modify".into()));
        }

        let needs_identity = self.identity == RowIdentityMode::Token
            && matches!(
                self.purpose,
                StatementPurpose::Update | StatementPurpose::Delete
            );

        let mut params = values.to_vec();
        if needs_identity {
            let token = identity.ok_or_else(|| {
                FdwError::Internal("update/delete without a row identity token".into())
            })?;
            params.push(token.as_param());
        }

        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();

        self.trap(session, "set connection", None, |s| s.set_current())?;

        let stmt = self.names.statement.clone();
        let affected = self.trap(session, "execute", None, |s| {
            s.execute_prepared(&stmt, &params)
        })?;
        self.rows_affected += affected;
        Ok(affected)
    }

    pub fn end(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        let handle = self.handle.clone();
        let mut cached = handle.lock();
        let session = cached.session_mut();
        if let Err(e) = session.set_current() {
            warn!("set connection failed during modify teardown: {}", e);
        }
        self.stack.unwind(session, &self.names);
        self.closed = true;
    }

    fn trap<T>(
        &mut self,
        session: &mut dyn RemoteSession,
        step: &'static str,
        flag: Option<ResourceFlag>,
        call: impl FnOnce(&mut dyn RemoteSession) -> std::result::Result<T, RemoteError>,
    ) -> Result<T> {
        let result = call(session);

        for diag in session.drain_warnings() {
            warn!(step, sqlstate = %diag.sqlstate, "remote warning: {}", diag.message);
            self.warnings.push(diag);
        }

        match result {
            Ok(value) => {
                self.stack.push(flag);
                Ok(value)
            }
            Err(e) => {
                if e.class().requires_unwind() {
                    self.stack.unwind(session, &self.names);
                }
                Err(FdwError::remote(step, e))
            }
        }
    }
}

impl Drop for ModifyExecutor {
    fn drop(&mut self) {
        self.teardown();
    }
}
