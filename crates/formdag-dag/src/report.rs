//! What a recalculation pass did.

use formdag_core::{ConstraintState, TreeReference, Value};

use crate::triggerable::TriggerableId;

/// A state change applied to one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Value {
        previous: Option<Value>,
        current: Option<Value>,
    },
    Relevance(bool),
    Required(bool),
    Constraint(ConstraintState),
    /// Value removed because an ancestor became non-relevant.
    Cleared,
}

/// A change and what caused it. `triggerable` is `None` for the edit that
/// started the pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub triggerable: Option<TriggerableId>,
    pub target: TreeReference,
    pub change: Change,
}

/// A triggerable that could not be applied to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub triggerable: TriggerableId,
    pub target: TreeReference,
    pub reason: String,
}

/// Outcome of one engine operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalcReport {
    /// Applied changes, in the order they happened.
    pub updates: Vec<AppliedUpdate>,
    /// Triggerables evaluated, in visiting order.
    pub evaluated: Vec<TriggerableId>,
    pub failures: Vec<Failure>,
}

impl RecalcReport {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.evaluated.is_empty() && self.failures.is_empty()
    }

    /// Value writes only.
    pub fn value_updates(&self) -> impl Iterator<Item = &AppliedUpdate> {
        self.updates
            .iter()
            .filter(|u| matches!(u.change, Change::Value { .. }))
    }

    pub fn merge(&mut self, other: RecalcReport) {
        self.updates.extend(other.updates);
        self.evaluated.extend(other.evaluated);
        self.failures.extend(other.failures);
    }
}
