//! Form definitions on top of the formdag engine.
//!
//! A [`FormDefinition`] is the authored JSON form. [`FormBuilder`] turns it
//! into a [`FormDef`], which owns the instance tree and the recalculation
//! engine and exposes the edits a host performs: answering a question,
//! inserting and deleting repeat instances. [`FormFile`] stores a form with
//! its answers in the `.fdf` binary format.

pub mod builder;
pub mod definition;
pub mod error;
pub mod form;
pub mod serialize;

pub use builder::FormBuilder;
pub use definition::{ActionBind, Bind, FormDefinition, InstanceNode};
pub use error::FormError;
pub use form::FormDef;
pub use serialize::{FormFile, Section, SectionInfo};

/// Identity of a form definition, kept across form files.
pub type FormId = uuid::Uuid;
