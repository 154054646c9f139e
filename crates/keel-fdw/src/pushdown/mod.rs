// SPDX-License-Identifier: Apache-2.0

//! Predicate pushdown: classification, rewriting and deparsing of the
//! host's filter tree into a remote WHERE fragment plus a residual list.

pub mod compile;
pub mod deparse;
pub mod expr;

pub use compile::{CompiledPredicate, PredicateCompiler};
pub use deparse::{DeparseStatus, OprKind, PushdownNode};
pub use expr::{
    ColumnRef, Connective, FilterExpr, OperatorName, OperatorNamespace, RelationId, ScalarValue,
    TypeCoercion,
};
