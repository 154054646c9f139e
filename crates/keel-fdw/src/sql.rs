// SPDX-License-Identifier: Apache-2.0

//! Remote statement synthesis.
//!
//! Combines the scan target, the compiled predicate and the statement
//! purpose into final remote SQL plus the cursor kind to request.
//! Placeholder order always matches the column order recorded for later
//! binding; getting that wrong corrupts writes silently, so the builders
//! are the only place statement text is assembled.

use keel_remote::{CursorKind, ParamValue};
use serde::{Deserialize, Serialize};

use crate::error::{FdwError, Result};
use crate::pushdown::deparse::quote_ident;

/// Why a statement is being synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementPurpose {
    /// Plain read scan.
    Select,
    /// Read scan known to back a host-level UPDATE or DELETE.
    SelectForUpdate,
    Insert,
    Update,
    Delete,
}

/// What the scan runs against: a remote table or pre-formed query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanTarget {
    Table(String),
    Query(String),
}

impl ScanTarget {
    pub fn is_query(&self) -> bool {
        matches!(self, ScanTarget::Query(_))
    }
}

/// How UPDATE/DELETE statements identify their target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowIdentityMode {
    /// `WHERE CURRENT OF <cursor>` against the scan cursor.
    CursorPosition,
    /// An explicit equality on the retrieved row-identity token.
    Token,
}

/// Name of the hidden row-identity column retrieved for token-mode
/// write-back.
pub const ROW_IDENTITY_COLUMN: &str = "rowid";

/// Opaque row-identity token.
///
/// The encoding is owned by the remote storage engine; the connector
/// only decodes it from the host's junk column and hands it back as a
/// bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIdentity(u64);

impl RowIdentity {
    /// Decode the token carried in the host's junk column.
    pub fn from_host_token(raw: u64) -> Self {
        Self(raw)
    }

    /// Encode the token for the remote row-identity predicate.
    pub fn as_param(&self) -> ParamValue {
        ParamValue::Int(self.0 as i64)
    }
}

/// A synthesized statement plus the cursor kind to request for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedStatement {
    pub text: String,
    pub cursor_kind: CursorKind,
}

/// Everything the synthesizer needs for one statement.
#[derive(Debug, Clone)]
pub struct StatementSpec<'a> {
    pub purpose: StatementPurpose,
    pub target: &'a ScanTarget,
    /// Compiled pushdown fragment, if any.
    pub predicate: Option<&'a str>,
    /// Host column names, in binding order.
    pub columns: &'a [String],
    pub identity: RowIdentityMode,
    /// Cursor backing `CURRENT OF` row identity.
    pub cursor_name: &'a str,
    /// The host expects to restart this scan with new parameters.
    pub expect_rescan: bool,
}

/// Builds remote statement text.
pub struct QuerySynthesizer {
    delimident: bool,
}

impl QuerySynthesizer {
    pub fn new(delimident: bool) -> Self {
        Self { delimident }
    }

    pub fn build(&self, spec: &StatementSpec<'_>) -> Result<SynthesizedStatement> {
        match spec.purpose {
            StatementPurpose::Select | StatementPurpose::SelectForUpdate => self.build_scan(spec),
            StatementPurpose::Insert => self.build_insert(spec),
            StatementPurpose::Update => self.build_update(spec),
            StatementPurpose::Delete => self.build_delete(spec),
        }
    }

    fn build_scan(&self, spec: &StatementSpec<'_>) -> Result<SynthesizedStatement> {
        let table = match spec.target {
            ScanTarget::Table(name) => name,
            ScanTarget::Query(query) => {
                // Arbitrary query text cannot back a write and exposes no
                // stable identity column.
                if spec.purpose == StatementPurpose::SelectForUpdate {
                    return Err(FdwError::InvalidOptions(
                        "a 'query' table cannot back UPDATE or DELETE".into(),
                    ));
                }
                let text = match spec.predicate {
                    Some(pred) => format!("{} WHERE {}", query, pred),
                    None => query.clone(),
                };
                let cursor_kind = if spec.expect_rescan {
                    CursorKind::Scrollable
                } else {
                    CursorKind::ReadOnly
                };
                return Ok(SynthesizedStatement { text, cursor_kind });
            }
        };

        let mut columns: Vec<String> = spec
            .columns
            .iter()
            .map(|c| quote_ident(c, self.delimident))
            .collect();

        // Token-mode write-back needs the identity column in the result
        // set; it rides along as the last projected column.
        let updatable = spec.purpose == StatementPurpose::SelectForUpdate;
        if updatable && spec.identity == RowIdentityMode::Token {
            columns.push(ROW_IDENTITY_COLUMN.to_string());
        }

        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };

        let mut text = format!(
            "SELECT {} FROM {}",
            projection,
            quote_ident(table, self.delimident)
        );
        if let Some(pred) = spec.predicate {
            text.push_str(" WHERE ");
            text.push_str(pred);
        }

        let cursor_kind = if updatable && spec.identity == RowIdentityMode::CursorPosition {
            text.push_str(" FOR UPDATE");
            CursorKind::Updatable
        } else if spec.expect_rescan {
            CursorKind::Scrollable
        } else {
            CursorKind::ReadOnly
        };

        Ok(SynthesizedStatement { text, cursor_kind })
    }

    fn build_insert(&self, spec: &StatementSpec<'_>) -> Result<SynthesizedStatement> {
        let table = self.writable_table(spec)?;
        if spec.columns.is_empty() {
            return Err(FdwError::Internal(
                "empty column list for foreign table".into(),
            ));
        }

        let columns: Vec<String> = spec
            .columns
            .iter()
            .map(|c| quote_ident(c, self.delimident))
            .collect();
        let placeholders = vec!["?"; spec.columns.len()].join(", ");

        Ok(SynthesizedStatement {
            text: format!(
                "INSERT INTO {}({}) VALUES({})",
                table,
                columns.join(", "),
                placeholders
            ),
            cursor_kind: CursorKind::NoCursor,
        })
    }

    fn build_update(&self, spec: &StatementSpec<'_>) -> Result<SynthesizedStatement> {
        let table = self.writable_table(spec)?;
        if spec.columns.is_empty() {
            return Err(FdwError::Internal(
                "empty column list for foreign table".into(),
            ));
        }

        let assignments: Vec<String> = spec
            .columns
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c, self.delimident)))
            .collect();

        Ok(SynthesizedStatement {
            text: format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments.join(", "),
                self.identity_predicate(spec)
            ),
            cursor_kind: CursorKind::NoCursor,
        })
    }

    fn build_delete(&self, spec: &StatementSpec<'_>) -> Result<SynthesizedStatement> {
        let table = self.writable_table(spec)?;

        Ok(SynthesizedStatement {
            text: format!(
                "DELETE FROM {} WHERE {}",
                table,
                self.identity_predicate(spec)
            ),
            cursor_kind: CursorKind::NoCursor,
        })
    }

    fn writable_table(&self, spec: &StatementSpec<'_>) -> Result<String> {
        match spec.target {
            ScanTarget::Table(name) => Ok(quote_ident(name, self.delimident)),
            ScanTarget::Query(_) => Err(FdwError::InvalidOptions(
                "a 'query' table cannot back INSERT, UPDATE or DELETE".into(),
            )),
        }
    }

    fn identity_predicate(&self, spec: &StatementSpec<'_>) -> String {
        match spec.identity {
            RowIdentityMode::CursorPosition => format!("CURRENT OF {}", spec.cursor_name),
            RowIdentityMode::Token => format!("{} = ?", ROW_IDENTITY_COLUMN),
        }
    }
}
