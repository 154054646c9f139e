// SPDX-License-Identifier: Apache-2.0

//! The pushdown compiler: a single bottom-up pass over the host's filter
//! tree.
//!
//! Each qual is classified, deparsed and collected into a flat list of
//! predicate nodes with synthetic connective markers between siblings.
//! Anything not provably safe is demoted to the residual list and
//! evaluated locally by the host after rows arrive — with one exception:
//! a rejection anywhere in a tree containing an OR poisons the whole
//! pushdown, because omitting a disjunct (or weakening one) changes
//! result semantics rather than merely over-fetching.

use tracing::{debug, trace};

use super::deparse::{
    assemble, deparse_literal, deparse_literal_as, quote_ident, DeparsedLiteral, OprKind,
    PushdownNode,
};
use super::expr::{
    ColumnRef, Connective, FilterExpr, OperatorName, OperatorNamespace, RelationId, ScalarValue,
};

/// Recursion bound mirroring the host's own expression-depth guard.
const MAX_DEPTH: usize = 128;

/// Result of compiling a qual list against one scanned relation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    /// Deparsed predicate fragment, ready for the remote WHERE clause.
    pub pushed: Option<String>,
    /// Sub-expressions the host must still evaluate locally.
    pub residual: Vec<FilterExpr>,
    /// Number of rejected sub-expressions.
    pub rejected: usize,
}

impl CompiledPredicate {
    pub fn nothing_pushed(&self) -> bool {
        self.pushed.is_none()
    }
}

/// Classifies and deparses filter trees for one scanned relation.
pub struct PredicateCompiler {
    target: RelationId,
    delimident: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walked {
    Pushed,
    Rejected,
}

#[derive(Default)]
struct WalkState {
    nodes: Vec<PushdownNode>,
    residual: Vec<FilterExpr>,
    rejected: usize,
    saw_or: bool,
}

impl PredicateCompiler {
    pub fn new(target: RelationId) -> Self {
        Self {
            target,
            delimident: false,
        }
    }

    pub fn with_delimident(mut self, delimident: bool) -> Self {
        self.delimident = delimident;
        self
    }

    /// Compile the host's qual list. The list members are implicitly
    /// ANDed top-level conjuncts.
    pub fn compile(&self, quals: &[FilterExpr]) -> CompiledPredicate {
        let mut st = WalkState::default();

        for (i, qual) in quals.iter().enumerate() {
            if i > 0 {
                st.nodes.push(PushdownNode::Marker(Connective::And));
            }
            if self.walk(qual, 0, &mut st) == Walked::Rejected {
                st.rejected += 1;
                st.residual.push(qual.clone());
            }
        }

        // An OR anywhere plus any rejection anywhere: partial pushdown
        // would change semantics, so push nothing and leave the original
        // tree for local evaluation.
        if st.saw_or && st.rejected > 0 {
            debug!(
                rejected = st.rejected,
                "rejecting entire pushdown: OR with removed sub-expression"
            );
            return CompiledPredicate {
                pushed: None,
                residual: quals.to_vec(),
                rejected: st.rejected,
            };
        }

        let pushed = assemble(&st.nodes);
        if let Some(text) = &pushed {
            trace!(predicate = %text, "deparsed pushdown predicate");
        }

        CompiledPredicate {
            pushed,
            residual: st.residual,
            rejected: st.rejected,
        }
    }

    fn walk(&self, expr: &FilterExpr, depth: usize, st: &mut WalkState) -> Walked {
        if depth >= MAX_DEPTH {
            return Walked::Rejected;
        }

        match expr {
            FilterExpr::Connective {
                kind: Connective::And,
                args,
            } => {
                // Partial pushdown of a conjunction is sound: dropped
                // conjuncts just over-fetch and get re-checked locally.
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        st.nodes.push(PushdownNode::Marker(Connective::And));
                    }
                    if self.walk(arg, depth + 1, st) == Walked::Rejected {
                        st.rejected += 1;
                        st.residual.push(arg.clone());
                    }
                }
                Walked::Pushed
            }

            FilterExpr::Connective {
                kind: Connective::Or,
                args,
            } => {
                st.saw_or = true;
                let mut any_rejected = false;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        st.nodes.push(PushdownNode::Marker(Connective::Or));
                    }
                    if self.walk(arg, depth + 1, st) == Walked::Rejected {
                        any_rejected = true;
                    }
                }
                if any_rejected {
                    Walked::Rejected
                } else {
                    Walked::Pushed
                }
            }

            FilterExpr::Connective {
                kind: Connective::Not,
                args,
            } => {
                let [arg] = args.as_slice() else {
                    return Walked::Rejected;
                };

                let mark = st.nodes.len();
                if self.walk(arg, depth + 1, st) == Walked::Rejected {
                    st.nodes.truncate(mark);
                    return Walked::Rejected;
                }

                let inner: Vec<PushdownNode> = st.nodes.split_off(mark);
                match assemble(&inner) {
                    Some(text) => {
                        st.nodes.push(PushdownNode::finalized(
                            OprKind::Not,
                            format!("NOT ({})", text),
                        ));
                        Walked::Pushed
                    }
                    None => Walked::Rejected,
                }
            }

            FilterExpr::Compare { op, left, right } => self.cook_comparison(op, left, right, st),

            FilterExpr::InList { target, elements } => self.cook_in_list(target, elements, st),

            FilterExpr::NullTest { arg, negated } => self.cook_null_test(arg, *negated, st),

            // A bare column, literal, coercion or unknown node is not a
            // predicate the remote side can evaluate.
            FilterExpr::Column(_)
            | FilterExpr::Literal(_)
            | FilterExpr::Coerce { .. }
            | FilterExpr::Opaque { .. } => Walked::Rejected,
        }
    }

    fn cook_comparison(
        &self,
        op: &OperatorName,
        left: &FilterExpr,
        right: &FilterExpr,
        st: &mut WalkState,
    ) -> Walked {
        let Some(kind) = map_operator(op) else {
            trace!(operator = %op.name, "operator not in pushdown allow-list");
            return Walked::Rejected;
        };

        let (Some(l), Some(r)) = (self.operand(left), self.operand(right)) else {
            return Walked::Rejected;
        };

        let text = format!("{} {} {}", l.text, kind.sql(), r.text);
        if l.rewritten || r.rewritten {
            // The rewritten literal forces a re-cook before the node can
            // be trusted.
            let mut node = PushdownNode::partially_rewritten(kind);
            node.finalize(text);
            st.nodes.push(node);
        } else {
            st.nodes.push(PushdownNode::finalized(kind, text));
        }
        Walked::Pushed
    }

    /// Deparse a comparison operand: a column of the scanned relation or
    /// a non-temporal literal. Anything else rejects the comparison.
    fn operand(&self, expr: &FilterExpr) -> Option<DeparsedLiteral> {
        match expr {
            FilterExpr::Column(col) => self.column_text(col).map(|text| DeparsedLiteral {
                text,
                rewritten: false,
            }),
            FilterExpr::Literal(value) => {
                if value.is_temporal() {
                    trace!("temporal literal rejected from pushdown");
                    None
                } else {
                    Some(deparse_literal(value))
                }
            }
            _ => None,
        }
    }

    fn cook_in_list(
        &self,
        target: &FilterExpr,
        elements: &[ScalarValue],
        st: &mut WalkState,
    ) -> Walked {
        // The left side must be a plain column reference, optionally
        // behind one type coercion whose target applies to every element.
        let (column, coercion) = match target {
            FilterExpr::Column(col) => (col, None),
            FilterExpr::Coerce { arg, coercion } => match arg.as_ref() {
                FilterExpr::Column(col) => (col, Some(*coercion)),
                _ => return Walked::Rejected,
            },
            _ => return Walked::Rejected,
        };

        let Some(column_text) = self.column_text(column) else {
            return Walked::Rejected;
        };

        if let Some(c) = coercion {
            if c.target.is_temporal() {
                return Walked::Rejected;
            }
        }
        if elements.is_empty() || elements.iter().any(|v| v.is_temporal()) {
            return Walked::Rejected;
        }

        let mut rewritten = false;
        let mut parts = Vec::with_capacity(elements.len());
        for value in elements {
            let lit = match coercion {
                Some(c) => deparse_literal_as(value, c.target),
                None => deparse_literal(value),
            };
            rewritten |= lit.rewritten;
            parts.push(lit.text);
        }

        let text = format!("{} IN({})", column_text, parts.join(", "));
        if rewritten {
            let mut node = PushdownNode::partially_rewritten(OprKind::In);
            node.finalize(text);
            st.nodes.push(node);
        } else {
            st.nodes.push(PushdownNode::finalized(OprKind::In, text));
        }
        Walked::Pushed
    }

    fn cook_null_test(&self, arg: &FilterExpr, negated: bool, st: &mut WalkState) -> Walked {
        let FilterExpr::Column(col) = arg else {
            return Walked::Rejected;
        };
        let Some(column_text) = self.column_text(col) else {
            return Walked::Rejected;
        };

        let kind = if negated {
            OprKind::IsNotNull
        } else {
            OprKind::IsNull
        };
        st.nodes.push(PushdownNode::finalized(
            kind,
            format!("{} {}", column_text, kind.sql()),
        ));
        Walked::Pushed
    }

    /// Deparse a column reference, or `None` when it belongs to another
    /// relation (outer-query references must stay local).
    fn column_text(&self, col: &ColumnRef) -> Option<String> {
        if col.relation != self.target {
            trace!(column = %col.name, "outer-relation column rejected from pushdown");
            return None;
        }
        Some(quote_ident(&col.name, self.delimident))
    }
}

/// Map a host operator onto the pushdown allow-list. Only operators from
/// the standard namespace qualify; a same-named operator from an
/// extension has no guaranteed remote semantics.
fn map_operator(op: &OperatorName) -> Option<OprKind> {
    if op.namespace != OperatorNamespace::Standard {
        return None;
    }
    match op.name.as_str() {
        "=" => Some(OprKind::Eq),
        "<>" => Some(OprKind::Ne),
        "<" => Some(OprKind::Lt),
        "<=" => Some(OprKind::Le),
        ">" => Some(OprKind::Gt),
        ">=" => Some(OprKind::Ge),
        "~~" => Some(OprKind::Like),
        _ => None,
    }
}
