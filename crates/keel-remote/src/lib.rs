// SPDX-License-Identifier: Apache-2.0

//! Remote client contract for the keel foreign-table connector.
//!
//! This crate defines the boundary between the connector core
//! (`keel-fdw`) and the vendor client layer that owns the physical
//! connection to the remote relational engine:
//!
//! ```text
//! Host query engine
//!   ↓
//! keel-fdw (cache, call stack, pushdown, executors)
//!   ↓
//! RemoteConnector / RemoteSession   (this crate)
//!   ↓
//! Vendor client library → remote engine
//! ```
//!
//! Nothing here talks to a network. The traits describe the ordered,
//! blocking call surface the core drives (prepare → declare → describe →
//! open → fetch → teardown), the SQLSTATE diagnostics it classifies, and
//! the codec boundary through which rows leave the core.

pub mod codec;
pub mod session;
pub mod sqlstate;
pub mod types;

// Re-exports
pub use codec::{CodecError, ValueCodec};
pub use session::{
    CursorKind, RemoteConnector, RemoteDsn, RemoteSession, SessionCapabilities,
};
pub use sqlstate::{RemoteError, SqlDiagnostic, SqlStateClass};
pub use types::{ColumnDescriptor, Indicator, ParamValue, RawCell, RawRow, RemoteType};
