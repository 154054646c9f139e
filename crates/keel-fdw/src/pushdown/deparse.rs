// SPDX-License-Identifier: Apache-2.0

//! Rendering classified predicates in the remote dialect.
//!
//! Literal quoting follows the remote engine's rules: character, byte and
//! temporal values are quoted with embedded quotes doubled; numeric and
//! boolean values are rendered bare. The final predicate text is
//! assembled from the flat node list, inserting the most recently seen
//! connective keyword between entries and defaulting to AND.

use keel_remote::RemoteType;

use super::expr::{Connective, ScalarValue};

/// Deparse progress of one predicate node. Only finalized text may ever
/// reach the emitted predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeparseStatus {
    Pending,
    /// A literal operand was rewritten into a safe equivalent; the node
    /// must be re-cooked before it can be emitted.
    PartiallyRewritten,
    Finalized,
}

/// Operator kind of a pushable predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OprKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    In,
    IsNull,
    IsNotNull,
    Not,
}

impl OprKind {
    pub fn sql(&self) -> &'static str {
        match self {
            OprKind::Eq => "=",
            OprKind::Ne => "<>",
            OprKind::Lt => "<",
            OprKind::Le => "<=",
            OprKind::Gt => ">",
            OprKind::Ge => ">=",
            OprKind::Like => "LIKE",
            OprKind::In => "IN",
            OprKind::IsNull => "IS NULL",
            OprKind::IsNotNull => "IS NOT NULL",
            OprKind::Not => "NOT",
        }
    }
}

/// One entry of the flat predicate list built by the compiler: either a
/// classified predicate or a synthetic connective marker between two
/// sibling predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum PushdownNode {
    Predicate {
        opr: OprKind,
        status: DeparseStatus,
        text: String,
    },
    Marker(Connective),
}

impl PushdownNode {
    pub fn finalized(opr: OprKind, text: String) -> Self {
        PushdownNode::Predicate {
            opr,
            status: DeparseStatus::Finalized,
            text,
        }
    }

    /// A node whose operands needed rewriting; carries the rewritten
    /// pieces but no trustworthy text yet.
    pub fn partially_rewritten(opr: OprKind) -> Self {
        PushdownNode::Predicate {
            opr,
            status: DeparseStatus::PartiallyRewritten,
            text: String::new(),
        }
    }

    /// Re-cook a partially rewritten node into its final text.
    pub fn finalize(&mut self, text: String) {
        if let PushdownNode::Predicate {
            status,
            text: slot, ..
        } = self
        {
            *slot = text;
            *status = DeparseStatus::Finalized;
        }
    }
}

/// A deparsed literal plus whether it had to be rewritten to become safe
/// for the remote dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeparsedLiteral {
    pub text: String,
    pub rewritten: bool,
}

/// Render a literal in the remote dialect.
pub fn deparse_literal(value: &ScalarValue) -> DeparsedLiteral {
    match value {
        ScalarValue::Bool(b) => bare(if *b { "'t'" } else { "'f'" }),
        ScalarValue::SmallInt(v) => bare(v.to_string()),
        ScalarValue::Int(v) => bare(v.to_string()),
        ScalarValue::BigInt(v) => bare(v.to_string()),
        ScalarValue::Float(v) => bare(v.to_string()),
        ScalarValue::Decimal(v) => bare(v.clone()),
        ScalarValue::Text(v) => quoted(v),
        ScalarValue::Bytes(v) => quoted(&String::from_utf8_lossy(v)),
        ScalarValue::Date(v) | ScalarValue::Timestamp(v) | ScalarValue::Interval(v) => quoted(v),
    }
}

/// Render a literal as if it had the given target type, used when an
/// IN-list sits behind a type coercion that must be applied uniformly.
pub fn deparse_literal_as(value: &ScalarValue, target: RemoteType) -> DeparsedLiteral {
    let plain = deparse_literal(value);
    let already_quoted = plain.text.starts_with('\'');

    if target.needs_quoting() && !already_quoted {
        DeparsedLiteral {
            text: format!("'{}'", plain.text),
            rewritten: plain.rewritten,
        }
    } else {
        plain
    }
}

fn bare(text: impl Into<String>) -> DeparsedLiteral {
    DeparsedLiteral {
        text: text.into(),
        rewritten: false,
    }
}

fn quoted(raw: &str) -> DeparsedLiteral {
    // Embedded quotes get doubled; that rewrite makes an otherwise
    // remote-incompatible literal safe and forces a re-cook of the
    // containing predicate.
    let rewritten = raw.contains('\'');
    let escaped = raw.replace('\'', "''");
    DeparsedLiteral {
        text: format!("'{}'", escaped),
        rewritten,
    }
}

/// Quote a remote identifier when DELIMIDENT-style quoting is on.
pub fn quote_ident(name: &str, delimident: bool) -> String {
    if delimident {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}

/// Assemble the final predicate text from the flat node list.
///
/// Returns `None` when the list holds no finalized predicate. Nodes that
/// are not finalized are never emitted.
pub fn assemble(nodes: &[PushdownNode]) -> Option<String> {
    let mut out = String::new();
    let mut connective = Connective::And;

    for node in nodes {
        match node {
            PushdownNode::Marker(kind) => connective = *kind,
            PushdownNode::Predicate { status, text, .. } => {
                debug_assert_eq!(*status, DeparseStatus::Finalized);
                if *status != DeparseStatus::Finalized {
                    continue;
                }
                if !out.is_empty() {
                    out.push(' ');
                    out.push_str(connective.keyword());
                    out.push(' ');
                }
                out.push_str(text);
            }
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_literals_bare() {
        assert_eq!(deparse_literal(&ScalarValue::Int(5)).text, "5");
        assert_eq!(deparse_literal(&ScalarValue::BigInt(-9)).text, "-9");
        assert_eq!(
            deparse_literal(&ScalarValue::Decimal("10.25".into())).text,
            "10.25"
        );
    }

    #[test]
    fn test_text_literals_quoted() {
        let lit = deparse_literal(&ScalarValue::Text("a".into()));
        assert_eq!(lit.text, "'a'");
        assert!(!lit.rewritten);
    }

    #[test]
    fn test_embedded_quote_is_rewritten() {
        let lit = deparse_literal(&ScalarValue::Text("O'Brien".into()));
        assert_eq!(lit.text, "'O''Brien'");
        assert!(lit.rewritten);
    }

    #[test]
    fn test_coerced_literal() {
        let lit = deparse_literal_as(&ScalarValue::Int(5), RemoteType::Char);
        assert_eq!(lit.text, "'5'");

        let lit = deparse_literal_as(&ScalarValue::Text("x".into()), RemoteType::Char);
        assert_eq!(lit.text, "'x'");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("col", false), "col");
        assert_eq!(quote_ident("col", true), "\"col\"");
    }

    #[test]
    fn test_assemble_defaults_to_and() {
        let nodes = vec![
            PushdownNode::finalized(OprKind::Eq, "a = 1".into()),
            PushdownNode::finalized(OprKind::Gt, "b > 2".into()),
        ];
        assert_eq!(assemble(&nodes).as_deref(), Some("a = 1 AND b > 2"));
    }

    #[test]
    fn test_assemble_uses_markers() {
        let nodes = vec![
            PushdownNode::finalized(OprKind::Eq, "a = 1".into()),
            PushdownNode::Marker(Connective::Or),
            PushdownNode::finalized(OprKind::Gt, "b > 2".into()),
        ];
        assert_eq!(assemble(&nodes).as_deref(), Some("a = 1 OR b > 2"));
    }

    #[test]
    fn test_assemble_empty() {
        assert_eq!(assemble(&[]), None);
        assert_eq!(assemble(&[PushdownNode::Marker(Connective::And)]), None);
    }
}
