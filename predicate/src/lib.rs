//! Pushdown filter expression tree: an `And`/`Or`/binary-comparison union
//! evaluated against a decoded row.
//!
//! These expressions are built by the query plan compiler from an
//! [`chain_types::ArchiveQuery`] and handed to the query executor, which
//! evaluates them against a chunk's columns to decide which row groups (and
//! eventually rows) can be skipped.

#![warn(missing_debug_implementations, missing_docs)]

use std::fmt;

/// A binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `=`
    Eq,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Eq => "=",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
        };
        f.write_str(s)
    }
}

/// A pushdown predicate tree over column values.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Always true; the identity element for `And`, used for filter-less
    /// scans (e.g. `includeAllBlocks`).
    True,
    /// Conjunction. An empty list is `True`.
    And(Vec<Predicate>),
    /// Disjunction. An empty list matches nothing.
    Or(Vec<Predicate>),
    /// `column op literal`.
    Bin {
        /// Column name.
        column: String,
        /// Comparison operator.
        op: BinOp,
        /// Literal value, pre-rendered (hex string, decimal, etc).
        literal: String,
    },
    /// `column IN (values)`, the pushdown form of a multi-value `OR`
    /// equality chain built by `_in_condition` in the original engine.
    In {
        /// Column name.
        column: String,
        /// Candidate values; matches if the column equals any of them.
        values: Vec<String>,
    },
}

impl Predicate {
    /// `column = literal`.
    pub fn eq(column: impl Into<String>, literal: impl Into<String>) -> Self {
        Predicate::Bin {
            column: column.into(),
            op: BinOp::Eq,
            literal: literal.into(),
        }
    }

    /// `column IN (values)`. An empty `values` list collapses to `True`,
    /// matching `_in_condition`'s "no filter means no restriction" rule.
    pub fn in_set(column: impl Into<String>, values: Vec<String>) -> Self {
        if values.is_empty() {
            Predicate::True
        } else {
            Predicate::In {
                column: column.into(),
                values,
            }
        }
    }

    /// The inclusive block-range predicate every item query is implicitly
    /// ANDed with, mirroring `_add_block_range_condition`.
    pub fn block_range(column: &str, from_block: u64, to_block: Option<u64>) -> Self {
        let mut ops = vec![Predicate::Bin {
            column: column.to_string(),
            op: BinOp::Ge,
            literal: from_block.to_string(),
        }];
        if let Some(to_block) = to_block {
            ops.push(Predicate::Bin {
                column: column.to_string(),
                op: BinOp::Le,
                literal: to_block.to_string(),
            });
        }
        Predicate::And(ops)
    }

    /// Conjoin two predicates, flattening nested `And`s and dropping `True`.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, b) => b,
            (a, Predicate::True) => a,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), b) => {
                a.push(b);
                Predicate::And(a)
            }
            (a, Predicate::And(mut b)) => {
                b.insert(0, a);
                Predicate::And(b)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Disjoin two predicates, flattening nested `Or`s.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut a), Predicate::Or(b)) => {
                a.extend(b);
                Predicate::Or(a)
            }
            (Predicate::Or(mut a), b) => {
                a.push(b);
                Predicate::Or(a)
            }
            (a, Predicate::Or(mut b)) => {
                b.insert(0, a);
                Predicate::Or(b)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    /// True if this predicate cannot exclude any row (an always-true scan).
    pub fn is_trivial(&self) -> bool {
        matches!(self, Predicate::True) || matches!(self, Predicate::And(ops) if ops.is_empty())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => write!(f, "true"),
            Predicate::And(ops) => {
                let rendered: Vec<String> = ops.iter().map(|o| format!("({o})")).collect();
                if rendered.is_empty() {
                    write!(f, "true")
                } else {
                    write!(f, "{}", rendered.join(" AND "))
                }
            }
            Predicate::Or(ops) => {
                let rendered: Vec<String> = ops.iter().map(|o| format!("({o})")).collect();
                write!(f, "{}", rendered.join(" OR "))
            }
            Predicate::Bin { column, op, literal } => write!(f, "{column} {op} {literal}"),
            Predicate::In { column, values } => {
                write!(f, "{column} IN ({})", values.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_range_renders_both_bounds() {
        let p = Predicate::block_range("number", 100, Some(200));
        assert_eq!(p.to_string(), "(number >= 100) AND (number <= 200)");
    }

    #[test]
    fn block_range_without_upper_bound() {
        let p = Predicate::block_range("number", 100, None);
        assert_eq!(p.to_string(), "(number >= 100)");
    }

    #[test]
    fn empty_in_set_is_trivial() {
        assert_eq!(Predicate::in_set("address", vec![]), Predicate::True);
    }

    #[test]
    fn and_flattens_nested_conjunctions() {
        let a = Predicate::eq("a", "1");
        let b = Predicate::eq("b", "2");
        let c = Predicate::eq("c", "3");
        let combined = a.and(b).and(c);
        assert_eq!(
            combined,
            Predicate::And(vec![
                Predicate::eq("a", "1"),
                Predicate::eq("b", "2"),
                Predicate::eq("c", "3"),
            ])
        );
    }
}
