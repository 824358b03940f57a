//! Reference expressions bound to instance nodes.
//!
//! This is a small serializable AST, not a parsed language: form definitions
//! store expressions in this shape and the engine hands them to an
//! evaluator untouched. [`Expr::references`] is the static analysis the
//! form build step uses to find what an expression reads.

use serde::{Deserialize, Serialize};

use crate::reference::TreeReference;
use crate::value::Value;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// An expression over the instance tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    /// The value of the first node the reference denotes.
    Ref(TreeReference),
    /// 1-based position of the referenced node within its repeat series.
    Position(TreeReference),
    /// Number of nodes the reference denotes.
    Count(TreeReference),
    /// Numeric sum over every node the reference denotes.
    Sum(TreeReference),
    Now,
    Today,
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Concat(Vec<Expr>),
}

impl Expr {
    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    pub fn reference(reference: TreeReference) -> Self {
        Expr::Ref(reference)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    pub fn if_then_else(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Every node reference the expression reads, in first-seen order
    /// without duplicates. References are returned as written; relative
    /// ones still need a context.
    pub fn references(&self) -> Vec<TreeReference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<TreeReference>) {
        match self {
            Expr::Ref(r) | Expr::Position(r) | Expr::Count(r) | Expr::Sum(r) => {
                if !out.contains(r) {
                    out.push(r.clone());
                }
            }
            Expr::Literal(_) | Expr::Now | Expr::Today => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
            Expr::Not(inner) => inner.collect_references(out),
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_references(out);
                then.collect_references(out);
                otherwise.collect_references(out);
            }
            Expr::Concat(parts) => {
                for part in parts {
                    part.collect_references(out);
                }
            }
        }
    }

    /// Whether the expression reads the clock.
    pub fn is_volatile(&self) -> bool {
        match self {
            Expr::Now | Expr::Today => true,
            Expr::Literal(_)
            | Expr::Ref(_)
            | Expr::Position(_)
            | Expr::Count(_)
            | Expr::Sum(_) => false,
            Expr::Binary { lhs, rhs, .. } => lhs.is_volatile() || rhs.is_volatile(),
            Expr::Not(inner) => inner.is_volatile(),
            Expr::If {
                condition,
                then,
                otherwise,
            } => condition.is_volatile() || then.is_volatile() || otherwise.is_volatile(),
            Expr::Concat(parts) => parts.iter().any(Expr::is_volatile),
        }
    }
}
