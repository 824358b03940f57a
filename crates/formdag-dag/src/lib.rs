//! Dependency-directed recalculation for form definitions.
//!
//! Bindings over the instance tree (calculations, relevance and required
//! conditions, constraints, value-setting actions) are registered as
//! [`Triggerable`]s. [`DependencyGraph`] orders them and rejects cycles,
//! and [`Dag`] runs them: once at initialisation and then only for the
//! part of the graph an edit or a repeat insert/delete can affect.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod graph;
pub mod registry;
pub mod report;
pub mod triggerable;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, NonRelevantPolicy};
pub use engine::{Dag, EngineContext};
pub use error::{DagError, EvaluationError};
pub use evaluator::{EvaluationContext, Evaluator, ExprEvaluator};
pub use event::{Event, EventNotifier, LogNotifier, NullNotifier, RecordingNotifier};
pub use graph::{CycleError, CycleMember, DependencyGraph};
pub use registry::TriggerableRegistry;
pub use report::{AppliedUpdate, Change, Failure, RecalcReport};
pub use triggerable::{ActionEvent, Triggerable, TriggerableId, TriggerableKind};
