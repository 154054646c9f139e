// SPDX-License-Identifier: Apache-2.0

//! Remote-resource lifecycle state machine.
//!
//! Every scan or modify allocates remote objects in a fixed order:
//! prepared statement, declared cursor, descriptor area, open cursor.
//! The call stack records which acquisitions have succeeded so that any
//! error path — and normal completion — can release exactly the acquired
//! subset, in reverse order, exactly once.

use keel_remote::RemoteSession;
use tracing::{debug, warn};

/// One kind of remote resource, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFlag {
    /// Statement has been prepared.
    Prepared,
    /// Cursor has been declared over the prepared statement.
    Declared,
    /// Descriptor area has been allocated and populated.
    Described,
    /// Cursor is open.
    Open,
}

const ACQUISITION_ORDER: [ResourceFlag; 4] = [
    ResourceFlag::Prepared,
    ResourceFlag::Declared,
    ResourceFlag::Described,
    ResourceFlag::Open,
];

/// Remote object names for one scan, derived from the connection name and
/// the statement reference id. Unique among all concurrent statements on
/// the same session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatementNames {
    pub statement: String,
    pub cursor: String,
    pub descriptor: String,
}

impl StatementNames {
    pub fn derive(conname: &str, refid: u64) -> Self {
        Self {
            statement: format!("{}_stmt{}", conname, refid),
            cursor: format!("{}_cur{}", conname, refid),
            descriptor: format!("{}_descr{}", conname, refid),
        }
    }
}

/// The set of currently acquired resource kinds.
///
/// Flags are only ever added in acquisition order and removed in strict
/// reverse order by [`unwind`](ResourceCallStack::unwind), which is
/// idempotent and safe to call in any state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCallStack {
    prepared: bool,
    declared: bool,
    described: bool,
    open: bool,
}

impl ResourceCallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful acquisition. `None` is the "no new resource"
    /// sentinel used by calls that do not acquire anything.
    pub fn push(&mut self, flag: Option<ResourceFlag>) {
        let Some(flag) = flag else { return };
        *self.slot(flag) = true;
    }

    /// Clear one flag. Only unwind uses this.
    fn pop(&mut self, flag: ResourceFlag) {
        *self.slot(flag) = false;
    }

    pub fn contains(&self, flag: ResourceFlag) -> bool {
        match flag {
            ResourceFlag::Prepared => self.prepared,
            ResourceFlag::Declared => self.declared,
            ResourceFlag::Described => self.described,
            ResourceFlag::Open => self.open,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.prepared || self.declared || self.described || self.open)
    }

    /// Currently set flags in acquisition order.
    pub fn acquired(&self) -> Vec<ResourceFlag> {
        ACQUISITION_ORDER
            .into_iter()
            .filter(|f| self.contains(*f))
            .collect()
    }

    fn slot(&mut self, flag: ResourceFlag) -> &mut bool {
        match flag {
            ResourceFlag::Prepared => &mut self.prepared,
            ResourceFlag::Declared => &mut self.declared,
            ResourceFlag::Described => &mut self.described,
            ResourceFlag::Open => &mut self.open,
        }
    }

    /// Release every acquired resource in reverse acquisition order and
    /// leave the stack empty.
    ///
    /// Runs on every error path and on normal completion, possibly more
    /// than once, so release failures are logged and swallowed: a cursor
    /// that cannot be closed must not mask the error that got us here.
    /// The descriptor area belongs to the client layer and is released
    /// through its own primitive.
    pub fn unwind(&mut self, session: &mut dyn RemoteSession, names: &StatementNames) {
        if self.open {
            debug!(cursor = %names.cursor, "undo open");
            if let Err(e) = session.close_cursor(&names.cursor) {
                warn!(cursor = %names.cursor, "close cursor failed during unwind: {}", e);
            }
            self.pop(ResourceFlag::Open);
        }

        if self.described {
            debug!(descriptor = %names.descriptor, "undo describe");
            if let Err(e) = session.release_descriptor(&names.descriptor) {
                warn!(descriptor = %names.descriptor,
                      "release descriptor failed during unwind: {}", e);
            }
            self.pop(ResourceFlag::Described);
        }

        if self.declared {
            debug!(cursor = %names.cursor, "undo declare");
            if let Err(e) = session.free_cursor(&names.cursor) {
                warn!(cursor = %names.cursor, "free cursor failed during unwind: {}", e);
            }
            self.pop(ResourceFlag::Declared);
        }

        if self.prepared {
            debug!(statement = %names.statement, "undo prepare");
            if let Err(e) = session.free_statement(&names.statement) {
                warn!(statement = %names.statement,
                      "free statement failed during unwind: {}", e);
            }
            self.pop(ResourceFlag::Prepared);
        }

        *self = Self::default();
    }
}
