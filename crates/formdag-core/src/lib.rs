//! Instance tree, tree references and typed values for form definitions.
//!
//! This crate holds the data side of a form: the mutable instance tree,
//! the path references that address it, the resolver that expands generic
//! references against the current tree shape, and the expression AST that
//! bindings are written in.

pub mod error;
pub mod expr;
pub mod instance;
pub mod reference;
pub mod tree;
pub mod value;
pub mod value_registry;

pub use error::CoreError;
pub use expr::{BinaryOp, Expr};
pub use instance::FormInstance;
pub use reference::{Multiplicity, RefKind, RefStep, TreeReference};
pub use tree::{Attribute, ConstraintState, TreeElement};
pub use value::{DataType, Value};
pub use value_registry::ValueTypeRegistry;
