//! Triggerables: expression bindings with the references they read and
//! the node they act on.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use formdag_core::{CoreError, Expr, TreeReference};

/// Arena index of a triggerable in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerableId(pub usize);

impl fmt::Display for TriggerableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a value-setting action fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum ActionEvent {
    /// Once, when the form is first initialised.
    FirstLoad,
    /// Whenever the value at `source` changes.
    ValueChanged { source: TreeReference },
}

/// What a triggerable does with its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerableKind {
    /// Write the result to the target.
    Calculate,
    /// Set the target's relevance flag.
    Relevant,
    /// Set the target's required flag.
    Required,
    /// Validate the target's answer.
    Constraint {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Write the result to the target when `event` occurs.
    SetValueAction { event: ActionEvent },
}

impl TriggerableKind {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerableKind::Calculate => "calculate",
            TriggerableKind::Relevant => "relevant",
            TriggerableKind::Required => "required",
            TriggerableKind::Constraint { .. } => "constraint",
            TriggerableKind::SetValueAction { .. } => "setvalue",
        }
    }

    /// Kinds whose result is written into the target's value.
    pub fn writes_value(&self) -> bool {
        matches!(
            self,
            TriggerableKind::Calculate | TriggerableKind::SetValueAction { .. }
        )
    }
}

/// A single expression binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triggerable {
    kind: TriggerableKind,
    expr: Expr,
    target: TreeReference,
    triggers: BTreeSet<TreeReference>,
}

impl Triggerable {
    /// Bind `expr` to `target`.
    ///
    /// The target must be absolute and is stored generic. Triggers are the
    /// expression's references anchored at the target, except for
    /// value-changed actions whose only trigger is their source and
    /// first-load actions which have none.
    pub fn new(kind: TriggerableKind, expr: Expr, target: TreeReference) -> Result<Self, CoreError> {
        if !target.is_absolute() {
            return Err(CoreError::InvalidReference {
                input: target.to_string(),
                reason: "triggerable targets must be absolute".into(),
            });
        }
        let target = target.genericize();

        let mut kind = kind;
        let triggers = match &mut kind {
            TriggerableKind::SetValueAction {
                event: ActionEvent::FirstLoad,
            } => BTreeSet::new(),
            TriggerableKind::SetValueAction {
                event: ActionEvent::ValueChanged { source },
            } => {
                *source = source.contextualize(&target)?.genericize();
                BTreeSet::from([source.clone()])
            }
            _ => expr
                .references()
                .iter()
                .map(|r| r.contextualize(&target).map(|r| r.genericize()))
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            kind,
            expr,
            target,
            triggers,
        })
    }

    pub fn calculate(expr: Expr, target: TreeReference) -> Result<Self, CoreError> {
        Self::new(TriggerableKind::Calculate, expr, target)
    }

    pub fn relevant(expr: Expr, target: TreeReference) -> Result<Self, CoreError> {
        Self::new(TriggerableKind::Relevant, expr, target)
    }

    pub fn required(expr: Expr, target: TreeReference) -> Result<Self, CoreError> {
        Self::new(TriggerableKind::Required, expr, target)
    }

    pub fn constraint(
        expr: Expr,
        target: TreeReference,
        message: Option<String>,
    ) -> Result<Self, CoreError> {
        Self::new(TriggerableKind::Constraint { message }, expr, target)
    }

    pub fn set_value(
        expr: Expr,
        target: TreeReference,
        event: ActionEvent,
    ) -> Result<Self, CoreError> {
        Self::new(TriggerableKind::SetValueAction { event }, expr, target)
    }

    pub fn kind(&self) -> &TriggerableKind {
        &self.kind
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn target(&self) -> &TreeReference {
        &self.target
    }

    pub fn triggers(&self) -> &BTreeSet<TreeReference> {
        &self.triggers
    }

    /// Value-changed actions wait for their source; everything else runs
    /// during initialisation.
    pub fn fires_on_initialize(&self) -> bool {
        !matches!(
            self.kind,
            TriggerableKind::SetValueAction {
                event: ActionEvent::ValueChanged { .. }
            }
        )
    }

    /// Whether a change at `reference` is read by this triggerable.
    pub fn is_triggered_by(&self, reference: &TreeReference) -> bool {
        self.triggers.iter().any(|t| t.intersects(reference))
    }

    /// Whether this triggerable's effect on its target can be observed at
    /// `trigger`.
    pub fn feeds(&self, trigger: &TreeReference) -> bool {
        self.target.intersects(trigger)
            || (self.kind == TriggerableKind::Relevant && self.target.covers(trigger))
    }
}

impl fmt::Display for Triggerable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.label(), self.target)
    }
}
