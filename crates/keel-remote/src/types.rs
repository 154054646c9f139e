// SPDX-License-Identifier: Apache-2.0

//! Wire-level types shared between the connector core and the client layer.
//!
//! The remote engine's column types are a closed set. Keeping them as an
//! exhaustive enum means the codec boundary and the pushdown literal rules
//! are checked at compile time when a new wire type is added.

use serde::{Deserialize, Serialize};

/// Declared type of a remote column or literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteType {
    Char,
    VarChar,
    NChar,
    NVarChar,
    LongVarChar,
    Text,
    Bytes,
    SmallInt,
    Integer,
    BigInt,
    Serial,
    BigSerial,
    SmallFloat,
    Float,
    Decimal,
    Money,
    Boolean,
    Date,
    DateTime,
    Interval,
}

impl RemoteType {
    /// Date/time/interval family. Literals of these types are never safe
    /// to render without session locale context.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            RemoteType::Date | RemoteType::DateTime | RemoteType::Interval
        )
    }

    /// Character-string family.
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            RemoteType::Char
                | RemoteType::VarChar
                | RemoteType::NChar
                | RemoteType::NVarChar
                | RemoteType::LongVarChar
                | RemoteType::Text
        )
    }

    /// Whether a literal of this type is rendered inside quotes in the
    /// remote dialect. Character, byte and temporal values are quoted;
    /// numeric and boolean values are not.
    pub fn needs_quoting(&self) -> bool {
        self.is_character() || self.is_temporal() || matches!(self, RemoteType::Bytes)
    }
}

/// Null indicator attached to every fetched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Null,
    NotNull,
    /// The client layer could not produce a usable value.
    NotValid,
}

/// One raw fetched value: buffer plus indicator. Interpretation is the
/// codec's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    pub data: Vec<u8>,
    pub indicator: Indicator,
}

impl RawCell {
    pub fn null() -> Self {
        Self {
            data: Vec::new(),
            indicator: Indicator::Null,
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            indicator: Indicator::NotNull,
        }
    }

    pub fn from_text(text: impl AsRef<str>) -> Self {
        Self::from_bytes(text.as_ref().as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        self.indicator == Indicator::Null
    }
}

/// One row as fetched from an open cursor, prior to any conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn new(cells: Vec<RawCell>) -> Self {
        Self { cells }
    }
}

/// Column metadata obtained from the remote descriptor area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: RemoteType,
    /// Declared length, or -1 for fixed-size types.
    pub len: i32,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, ty: RemoteType) -> Self {
        Self {
            name: name.into(),
            ty,
            len: -1,
            nullable: true,
        }
    }
}

/// Value bound to a `?` placeholder of a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Decimal/money values travel in their textual form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
}
