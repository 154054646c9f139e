// SPDX-License-Identifier: Apache-2.0

//! End-to-end scan lifecycle tests against the scripted mock remote.

mod common;

use common::*;

use keel_fdw::{
    plan_scan, FdwError, HostColumn, RelationId, ScanExecutor, ScanPhase, ScanRequest,
    StatementPurpose,
};
use keel_remote::{ColumnDescriptor, CursorKind, RemoteType};

const ACQUIRE_OPS: [&str; 4] = ["prepare", "declare", "describe", "open"];
const RELEASE_OPS: [&str; 4] = [
    "close_cursor",
    "release_descriptor",
    "free_cursor",
    "free_statement",
];

fn orders_request() -> ScanRequest {
    ScanRequest {
        options: table_options(),
        relation: RelationId(1),
        purpose: StatementPurpose::Select,
        quals: Vec::new(),
        columns: vec![
            HostColumn::new("id", 1),
            HostColumn::new("amount", 2),
            HostColumn::new("note", 3),
        ],
        expect_rescan: false,
    }
}

#[test]
fn test_full_scan_fetches_all_rows() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    assert_eq!(planned.plan.refid, 1);
    assert_eq!(
        planned.plan.statement.text,
        "SELECT id, amount, note FROM orders"
    );

    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();
    assert_eq!(scan.phase(), ScanPhase::Open);

    let mut rows = Vec::new();
    while let Some(row) = scan.fetch_next(&TextCodec).unwrap() {
        rows.push(row);
    }
    assert_eq!(scan.phase(), ScanPhase::Exhausted);
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows[0],
        vec![
            Some("1".to_string()),
            Some("10.50".to_string()),
            Some("first".to_string())
        ]
    );

    // Fetching past exhaustion stays at the sentinel.
    assert!(scan.fetch_next(&TextCodec).unwrap().is_none());

    scan.end();

    // Acquisition is a strict prefix of the fixed order; teardown is the
    // exact reverse.
    assert_eq!(calls_of(&state, &ACQUIRE_OPS), ACQUIRE_OPS);
    assert_eq!(calls_of(&state, &RELEASE_OPS), RELEASE_OPS);
}

#[test]
fn test_zero_fetch_abandonment_unwinds_cleanly() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let scan = ScanExecutor::begin(&manager, planned.plan).unwrap();

    // Host abandons the scan before the first fetch (LIMIT 0 upstream).
    scan.end();

    assert!(calls_of(&state, &["fetch"]).is_empty());
    assert_eq!(calls_of(&state, &RELEASE_OPS), RELEASE_OPS);
}

#[test]
fn test_failure_at_open_releases_acquired_prefix() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());
    state.lock().fail_on = Some("open");

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let result = ScanExecutor::begin(&manager, planned.plan);
    assert!(matches!(
        result,
        Err(FdwError::Remote {
            step: "open cursor",
            ..
        })
    ));

    // Open never succeeded, so there is no cursor to close; everything
    // acquired before it is released in reverse order.
    assert_eq!(
        calls_of(&state, &RELEASE_OPS),
        vec!["release_descriptor", "free_cursor", "free_statement"]
    );
}

#[test]
fn test_failure_at_declare_releases_statement_only() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());
    state.lock().fail_on = Some("declare");

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let result = ScanExecutor::begin(&manager, planned.plan);
    assert!(result.is_err());

    assert_eq!(calls_of(&state, &RELEASE_OPS), vec!["free_statement"]);
}

#[test]
fn test_fetch_failure_unwinds_fully() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();

    state.lock().fail_on = Some("fetch");
    let result = scan.fetch_next(&TextCodec);
    assert!(matches!(
        result,
        Err(FdwError::Remote { step: "fetch", .. })
    ));
    assert_eq!(scan.phase(), ScanPhase::Error);

    assert_eq!(calls_of(&state, &RELEASE_OPS), RELEASE_OPS);
}

#[test]
fn test_conversion_failure_unwinds_before_propagating() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();

    let result = scan.fetch_next(&FailingCodec);
    assert!(matches!(result, Err(FdwError::Conversion { .. })));
    assert_eq!(scan.phase(), ScanPhase::Error);

    // The open cursor was released even though the row had already been
    // fetched.
    assert_eq!(calls_of(&state, &RELEASE_OPS), RELEASE_OPS);
}

#[test]
fn test_rescan_scrollable_repositions() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let mut request = orders_request();
    request.expect_rescan = true;

    let planned = plan_scan(&manager, &request).unwrap();
    assert_eq!(planned.plan.statement.cursor_kind, CursorKind::Scrollable);

    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();
    while scan.fetch_next(&TextCodec).unwrap().is_some() {}
    assert_eq!(scan.rows_fetched(), 3);

    scan.rescan().unwrap();
    assert_eq!(scan.phase(), ScanPhase::Open);

    let row = scan.fetch_next(&TextCodec).unwrap().unwrap();
    assert_eq!(row[0], Some("1".to_string()));

    assert_eq!(calls_of(&state, &["reposition"]), vec!["reposition"]);
    scan.end();
}

#[test]
fn test_rescan_forward_only_reopens() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    assert_eq!(planned.plan.statement.cursor_kind, CursorKind::ReadOnly);

    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();
    let _ = scan.fetch_next(&TextCodec).unwrap();

    scan.rescan().unwrap();
    let row = scan.fetch_next(&TextCodec).unwrap().unwrap();
    assert_eq!(row[0], Some("1".to_string()));

    // Close followed by a second open, no repositioning.
    assert!(calls_of(&state, &["reposition"]).is_empty());
    assert_eq!(
        calls_of(&state, &["open", "close_cursor"]),
        vec!["open", "close_cursor", "open"]
    );
    scan.end();
}

#[test]
fn test_dropped_columns_are_nulled_not_fetched() {
    init_tracing();
    let state = shared_state();
    // The remote table only has the two surviving columns.
    let table = MockTable {
        columns: vec![
            ColumnDescriptor::new("id", RemoteType::Integer),
            ColumnDescriptor::new("note", RemoteType::VarChar),
        ],
        rows: vec![text_row(&["1", "first"])],
    };
    let manager = manager_with(&state, table);

    let mut request = orders_request();
    request.columns = vec![
        HostColumn::new("id", 1),
        HostColumn::dropped(),
        HostColumn::new("note", 3),
    ];

    let planned = plan_scan(&manager, &request).unwrap();
    assert_eq!(planned.plan.statement.text, "SELECT id, note FROM orders");

    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();
    let row = scan.fetch_next(&TextCodec).unwrap().unwrap();
    assert_eq!(
        row,
        vec![Some("1".to_string()), None, Some("first".to_string())]
    );
    scan.end();
}

#[test]
fn test_remote_warning_is_surfaced_and_flow_continues() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let mut scan = ScanExecutor::begin(&manager, planned.plan).unwrap();

    state.lock().warnings.push(keel_remote::SqlDiagnostic::new(
        "01003",
        100,
        "null value eliminated in set function",
    ));

    let row = scan.fetch_next(&TextCodec).unwrap();
    assert!(row.is_some());
    assert_eq!(scan.warnings().len(), 1);
    assert_eq!(scan.warnings()[0].sqlstate, "01003");
    scan.end();
}

#[test]
fn test_same_session_distinct_refids() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let first = plan_scan(&manager, &orders_request()).unwrap();
    let second = plan_scan(&manager, &orders_request()).unwrap();

    assert_eq!(first.plan.refid, 1);
    assert_eq!(second.plan.refid, 2);
    assert_ne!(first.plan.names.statement, second.plan.names.statement);
    assert_ne!(first.plan.names.cursor, second.plan.names.cursor);

    // One physical connection serves both scans.
    assert_eq!(state.lock().connections, 1);
    assert_eq!(manager.cache().len(), 1);
}

#[test]
fn test_connection_failure_allows_clean_retry() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());
    state.lock().refuse_connections = true;

    let result = plan_scan(&manager, &orders_request());
    assert!(matches!(result, Err(FdwError::Connection { .. })));
    assert!(manager.cache().is_empty());

    // Next use retries from scratch.
    state.lock().refuse_connections = false;
    let planned = plan_scan(&manager, &orders_request()).unwrap();
    assert_eq!(planned.plan.refid, 1);
}

#[test]
fn test_plan_serialization_round_trip() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let json = serde_json::to_string(&planned.plan).unwrap();
    let restored: keel_fdw::ScanPlan = serde_json::from_str(&json).unwrap();

    // A host may carry the plan between its plan and begin callbacks;
    // beginning from the deserialized copy must work identically.
    let mut scan = ScanExecutor::begin(&manager, restored).unwrap();
    let row = scan.fetch_next(&TextCodec).unwrap().unwrap();
    assert_eq!(row[0], Some("1".to_string()));
    scan.end();
}

#[test]
fn test_pushdown_reaches_remote_statement() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let mut request = orders_request();
    request.quals = vec![keel_fdw::FilterExpr::compare(
        keel_fdw::pushdown::OperatorName::standard(">"),
        keel_fdw::FilterExpr::column(RelationId(1), "amount", 2),
        keel_fdw::FilterExpr::literal(keel_fdw::ScalarValue::Int(10)),
    )];

    let planned = plan_scan(&manager, &request).unwrap();
    assert_eq!(
        planned.plan.statement.text,
        "SELECT id, amount, note FROM orders WHERE amount > 10"
    );
    assert!(planned.residual.is_empty());
}

#[test]
fn test_disabled_pushdown_leaves_quals_residual() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let mut request = orders_request();
    request.options.predicate_pushdown = false;
    request.quals = vec![keel_fdw::FilterExpr::compare(
        keel_fdw::pushdown::OperatorName::standard("="),
        keel_fdw::FilterExpr::column(RelationId(1), "id", 1),
        keel_fdw::FilterExpr::literal(keel_fdw::ScalarValue::Int(1)),
    )];

    let planned = plan_scan(&manager, &request).unwrap();
    assert_eq!(planned.plan.statement.text, "SELECT id, amount, note FROM orders");
    assert_eq!(planned.residual.len(), 1);
}

#[test]
fn test_explain_snapshot() {
    init_tracing();
    let state = shared_state();
    let manager = manager_with(&state, MockTable::orders());

    let planned = plan_scan(&manager, &orders_request()).unwrap();
    let scan = ScanExecutor::begin(&manager, planned.plan).unwrap();

    let explain = scan.explain();
    assert_eq!(explain.query, "SELECT id, amount, note FROM orders");
    assert_eq!(explain.refid, 1);
    assert_eq!(explain.cursor_kind, CursorKind::ReadOnly);
    assert!(explain.cursor_name.ends_with("_cur1"));
    scan.end();
}
