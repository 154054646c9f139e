// SPDX-License-Identifier: Apache-2.0

//! Value codec contract.
//!
//! Converting a raw fetched buffer into a host-native value is the host's
//! business; the core only promises to hand over the column descriptor,
//! the buffer and the null indicator, and to treat a conversion failure
//! as a runtime error that unwinds the scan.

use thiserror::Error;

use crate::types::{ColumnDescriptor, RawCell, RemoteType};

/// Errors signalled by a codec implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The remote value has no representation in the host type system.
    #[error("column {column}: remote type {ty:?} is not representable: {reason}")]
    NotRepresentable {
        column: String,
        ty: RemoteType,
        reason: String,
    },

    /// The buffer contents do not match the declared column type.
    #[error("column {column}: malformed value: {reason}")]
    Malformed { column: String, reason: String },
}

/// Converts raw remote values into host-native values.
pub trait ValueCodec {
    /// Host-native value type.
    type Value;

    /// Decode one cell. Called once per row per fetched column; never
    /// called for dropped host columns.
    fn decode(&self, column: &ColumnDescriptor, cell: &RawCell) -> Result<Self::Value, CodecError>;

    /// The host's null representation, used for SQL NULL and for host
    /// columns with no remote counterpart.
    fn null_value(&self) -> Self::Value;
}
