// SPDX-License-Identifier: Apache-2.0

//! The filter expression tree handed over by the host query engine.
//!
//! The host supplies an already-parsed tree of typed nodes; the compiler
//! only classifies and re-emits them. Node kinds outside this set arrive
//! as [`FilterExpr::Opaque`] and are rejected, never crashed on.

use keel_remote::RemoteType;

/// Identity of a relation inside the host's query. The compiler only
/// pushes column references that belong to the scanned relation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationId(pub u32);

/// A literal value together with its declared remote type.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f64),
    /// Decimal/money values in textual form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Temporal values carry their textual rendering but are never
    /// pushed down.
    Date(String),
    Timestamp(String),
    Interval(String),
}

impl ScalarValue {
    /// The remote wire type this literal renders as.
    pub fn remote_type(&self) -> RemoteType {
        match self {
            ScalarValue::Bool(_) => RemoteType::Boolean,
            ScalarValue::SmallInt(_) => RemoteType::SmallInt,
            ScalarValue::Int(_) => RemoteType::Integer,
            ScalarValue::BigInt(_) => RemoteType::BigInt,
            ScalarValue::Float(_) => RemoteType::Float,
            ScalarValue::Decimal(_) => RemoteType::Decimal,
            ScalarValue::Text(_) => RemoteType::VarChar,
            ScalarValue::Bytes(_) => RemoteType::Bytes,
            ScalarValue::Date(_) => RemoteType::Date,
            ScalarValue::Timestamp(_) => RemoteType::DateTime,
            ScalarValue::Interval(_) => RemoteType::Interval,
        }
    }

    pub fn is_temporal(&self) -> bool {
        self.remote_type().is_temporal()
    }
}

/// Namespace an operator was resolved in. Only operators from the
/// standard namespace are candidates for pushdown; a same-named operator
/// from an extension namespace has no guaranteed remote semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorNamespace {
    Standard,
    Extension(String),
}

/// A named binary operator as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorName {
    pub name: String,
    pub namespace: OperatorNamespace,
}

impl OperatorName {
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: OperatorNamespace::Standard,
        }
    }

    pub fn extension(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: OperatorNamespace::Extension(namespace.into()),
        }
    }
}

/// Reference to a column of some relation in the host's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub relation: RelationId,
    pub name: String,
    pub attnum: i16,
}

/// A type coercion wrapper, e.g. around the left side of an IN-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeCoercion {
    pub target: RemoteType,
    pub typemod: i32,
}

/// Boolean connective kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
    Not,
}

impl Connective {
    pub fn keyword(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
            Connective::Not => "NOT",
        }
    }
}

/// One node of the host's filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Column(ColumnRef),
    Literal(ScalarValue),
    /// Binary operator application.
    Compare {
        op: OperatorName,
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },
    /// AND/OR over two or more operands, NOT over exactly one.
    Connective {
        kind: Connective,
        args: Vec<FilterExpr>,
    },
    /// List membership: `target IN (elements...)`.
    InList {
        target: Box<FilterExpr>,
        elements: Vec<ScalarValue>,
    },
    /// `IS [NOT] NULL`.
    NullTest {
        arg: Box<FilterExpr>,
        negated: bool,
    },
    /// Type coercion wrapper.
    Coerce {
        arg: Box<FilterExpr>,
        coercion: TypeCoercion,
    },
    /// Any node kind the host knows but this connector does not:
    /// function calls, sub-selects, row comparisons. Always rejected.
    Opaque { description: String },
}

impl FilterExpr {
    pub fn column(relation: RelationId, name: impl Into<String>, attnum: i16) -> Self {
        FilterExpr::Column(ColumnRef {
            relation,
            name: name.into(),
            attnum,
        })
    }

    pub fn literal(value: ScalarValue) -> Self {
        FilterExpr::Literal(value)
    }

    pub fn compare(op: OperatorName, left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(args: Vec<FilterExpr>) -> Self {
        FilterExpr::Connective {
            kind: Connective::And,
            args,
        }
    }

    pub fn or(args: Vec<FilterExpr>) -> Self {
        FilterExpr::Connective {
            kind: Connective::Or,
            args,
        }
    }

    pub fn not(arg: FilterExpr) -> Self {
        FilterExpr::Connective {
            kind: Connective::Not,
            args: vec![arg],
        }
    }
}
