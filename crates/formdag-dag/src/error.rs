//! Error types for the recalculation engine.

use formdag_core::{CoreError, TreeReference};

use crate::graph::CycleError;

/// Errors from building or driving the recalculation engine.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("node not found: {0}")]
    NodeNotFound(TreeReference),

    #[error("{0} is not a repeat instance")]
    NotRepeatInstance(TreeReference),

    #[error("{0} points into a repeat template")]
    TemplateReference(TreeReference),
}

/// Failures reported by an expression evaluator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Reference(#[from] CoreError),

    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0} has no repeat position")]
    NoPosition(TreeReference),

    #[error("{0}")]
    Failed(String),
}
