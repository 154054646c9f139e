// SPDX-License-Identifier: Apache-2.0

//! Foreign-table connector core for remote relational data sources.
//!
//! This crate lets a host query engine treat tables in a remote
//! relational database as if they were local: it compiles the host's
//! filter predicates into a remote WHERE fragment, drives a remote
//! cursor, and streams raw rows back through the host's value codec.
//!
//! # Architecture
//!
//! ```text
//! Host scan/modify request
//!   ↓
//! SessionManager (connection cache, transactions)
//!   ↓
//! PredicateCompiler → QuerySynthesizer
//!   ↓
//! ScanExecutor / ModifyExecutor
//!   ↓
//! ResourceCallStack over a RemoteSession
//!   ↓
//! Rows → ValueCodec → host values
//! ```
//!
//! Three invariants carry the design:
//!
//! - One cached session per `{server, database, user}` key, with a usage
//!   counter that mints unique remote statement names and only advances
//!   when a new logical statement starts.
//! - Remote resources are acquired in a fixed order (prepare, declare,
//!   describe, open) and released in exact reverse order by an
//!   idempotent unwind that runs on every error path.
//! - Predicates are pushed down only when provably safe; an OR with any
//!   unsafe branch rejects the whole pushdown rather than changing
//!   result semantics.

pub mod admin;
pub mod cache;
pub mod callstack;
pub mod config;
pub mod error;
pub mod exec;
pub mod options;
pub mod pushdown;
pub mod sql;

// Re-exports
pub use admin::SessionInfo;
pub use cache::{AcquireMode, ConnectionCache, ConnectionKey, SessionManager};
pub use callstack::{ResourceCallStack, ResourceFlag, StatementNames};
pub use config::ManagerConfig;
pub use error::{FdwError, Result};
pub use exec::{
    HostColumn, ModifyExecutor, ModifyRequest, PlannedScan, ScanExecutor, ScanExplain, ScanPhase,
    ScanPlan, ScanRequest, plan_scan,
};
pub use options::TableOptions;
pub use pushdown::{CompiledPredicate, FilterExpr, PredicateCompiler, RelationId, ScalarValue};
pub use sql::{
    QuerySynthesizer, RowIdentity, RowIdentityMode, ScanTarget, StatementPurpose,
    SynthesizedStatement,
};
