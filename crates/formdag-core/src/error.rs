//! Error types for the instance tree and reference resolver.

use crate::reference::TreeReference;

/// Errors from tree navigation, reference handling, and value conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid reference '{input}': {reason}")]
    InvalidReference { input: String, reason: String },

    #[error("relative reference {reference} needs an absolute context, got {context}")]
    NeedsContext { reference: String, context: String },

    #[error("unresolvable reference {reference}: no '{step}' under {prefix}")]
    Unresolvable {
        reference: TreeReference,
        step: String,
        prefix: TreeReference,
    },

    #[error("node not found: {0}")]
    NodeNotFound(TreeReference),

    #[error("no repeat template '{name}' under {parent}")]
    NoTemplate { parent: TreeReference, name: String },

    #[error("{0} is not a repeat instance")]
    NotRepeatInstance(TreeReference),

    #[error("cannot convert '{text}' to {data_type}")]
    InvalidValue { text: String, data_type: String },

    #[error("unknown value type '{0}'")]
    UnknownValueType(String),
}
