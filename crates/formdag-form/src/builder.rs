//! Turning a definition (or a stored form) into a runnable [`FormDef`].
//!
//! # Example
//!
//! ```rust
//! use formdag_form::{FormBuilder, FormDefinition};
//!
//! let definition = FormDefinition::from_json(r#"{
//!     "title": "Tip",
//!     "instance": { "name": "data", "children": [
//!         { "name": "bill", "type": "decimal", "value": "40" },
//!         { "name": "tip", "type": "decimal" }
//!     ]},
//!     "binds": [{ "target": "/data/tip", "calculate": { "binary": {
//!         "op": "mul", "lhs": { "ref": "/data/bill" },
//!         "rhs": { "literal": { "type": "decimal", "value": 0.25 } } } } }]
//! }"#).unwrap();
//!
//! let mut form = FormBuilder::new(definition).build().unwrap();
//! form.initialize();
//! let tip = formdag_core::TreeReference::parse("/data[0]/tip[0]").unwrap();
//! assert_eq!(form.value(&tip), Some(&formdag_core::Value::Decimal(10.0)));
//! ```

use std::sync::Arc;

use formdag_core::{FormInstance, TreeElement, TreeReference, ValueTypeRegistry};
use formdag_dag::{
    Clock, Dag, EngineConfig, EventNotifier, Evaluator, ExprEvaluator, NullNotifier,
    TriggerableRegistry,
};

use crate::definition::FormDefinition;
use crate::error::FormError;
use crate::form::FormDef;
use crate::serialize::FormFile;
use crate::FormId;

enum Source {
    Definition(FormDefinition),
    Stored(FormFile),
}

/// Configures and builds a [`FormDef`].
pub struct FormBuilder {
    source: Source,
    config: Option<EngineConfig>,
    values: ValueTypeRegistry,
    clock: Option<Arc<dyn Clock>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    notifier: Option<Arc<dyn EventNotifier>>,
    answers: Option<FormInstance>,
}

impl FormBuilder {
    /// Build from an authored definition.
    pub fn new(definition: FormDefinition) -> Self {
        Self::with_source(Source::Definition(definition))
    }

    /// Build from a stored form. The stored engine configuration applies
    /// unless [`with_config`](Self::with_config) overrides it.
    pub fn from_file(file: FormFile) -> Self {
        Self::with_source(Source::Stored(file))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            config: None,
            values: ValueTypeRegistry::with_defaults(),
            clock: None,
            evaluator: None,
            notifier: None,
            answers: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Value types used to construct initial answers.
    pub fn with_value_types(mut self, values: ValueTypeRegistry) -> Self {
        self.values = values;
        self
    }

    /// Clock for the default evaluator. Ignored with a custom evaluator.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Answers to restore onto the built instance, typically the instance
    /// of an earlier stored form. Missing repeat instances are created from
    /// templates.
    pub fn with_answers(mut self, saved: FormInstance) -> Self {
        self.answers = Some(saved);
        self
    }

    /// Build the instance and the dependency graph. Fails on a bind that
    /// targets an undeclared node or on a dependency cycle.
    pub fn build(self) -> Result<FormDef, FormError> {
        let (id, title, mut instance, triggerables, stored_config) = match self.source {
            Source::Definition(definition) => {
                let instance = definition.instance(&self.values)?;
                let triggerables = definition.triggerables()?;
                let id = definition.id.unwrap_or_else(FormId::new_v4);
                (id, definition.title, instance, triggerables, None)
            }
            Source::Stored(file) => (
                file.id,
                file.title,
                file.instance,
                file.triggerables,
                Some(file.config),
            ),
        };

        if let Some(saved) = &self.answers {
            instance.populate(saved)?;
        }

        let mut registry = TriggerableRegistry::new();
        for triggerable in triggerables {
            if !is_declared(&instance, triggerable.target()) {
                return Err(FormError::UnknownTarget(triggerable.target().clone()));
            }
            registry.register(triggerable);
        }
        let config = self.config.or(stored_config).unwrap_or_default();
        let dag = Dag::new(registry, config)?;

        let evaluator = match (self.evaluator, self.clock) {
            (Some(evaluator), _) => evaluator,
            (None, Some(clock)) => Arc::new(ExprEvaluator::new(clock)),
            (None, None) => Arc::new(ExprEvaluator::default()),
        };
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(NullNotifier));

        log::debug!(
            "built form '{title}' ({id}): {} triggerables",
            dag.registry().len()
        );
        Ok(FormDef::from_parts(id, title, instance, dag, evaluator, notifier))
    }
}

/// Whether the instance skeleton has a node, template or instance, at
/// every step of the generic `reference`.
fn is_declared(instance: &FormInstance, reference: &TreeReference) -> bool {
    let mut steps = reference.steps().iter();
    match steps.next() {
        Some(step) if step.name == instance.name() => {}
        _ => return false,
    }
    let mut node: &TreeElement = instance.root();
    for step in steps {
        let next = node
            .template_child(&step.name)
            .or_else(|| node.children().iter().find(|c| c.name() == step.name));
        match next {
            Some(child) => node = child,
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use formdag_dag::{DagError, FixedClock};

    fn definition(binds: &str) -> FormDefinition {
        FormDefinition::from_json(&format!(
            r#"{{
                "title": "Loop",
                "instance": {{ "name": "data", "children": [
                    {{ "name": "a" }}, {{ "name": "b" }},
                    {{ "name": "rep", "template": true, "children": [{{ "name": "x" }}] }}
                ]}},
                "binds": {binds}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn targets_under_templates_are_declared() {
        let form = FormBuilder::new(definition(
            r#"[{ "target": "/data/rep/x", "calculate": { "position": ".." } }]"#,
        ))
        .build()
        .unwrap();
        assert_eq!(form.dag().registry().len(), 1);
    }

    #[test]
    fn undeclared_target_is_rejected() {
        let err = FormBuilder::new(definition(
            r#"[{ "target": "/data/missing", "calculate": "now" }]"#,
        ))
        .build()
        .unwrap_err();
        assert!(matches!(err, FormError::UnknownTarget(_)));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = FormBuilder::new(definition(
            r#"[{ "target": "/data/a", "calculate": { "ref": "/data/b" } },
                { "target": "/data/b", "calculate": { "ref": "/data/a" } }]"#,
        ))
        .build()
        .unwrap_err();
        match err {
            FormError::Dag(DagError::Cycle(cycle)) => assert_eq!(cycle.members.len(), 2),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn initial_answers_use_given_value_types() {
        let mut def = definition("[]");
        def.instance.children[0].data_type = formdag_core::DataType::Int;
        def.instance.children[0].value = Some("3".into());

        let form = FormBuilder::new(def.clone()).build().unwrap();
        let a = TreeReference::parse("/data[0]/a[0]").unwrap();
        assert_eq!(form.value(&a), Some(&formdag_core::Value::Int(3)));

        let err = FormBuilder::new(def)
            .with_value_types(ValueTypeRegistry::new())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            FormError::Core(formdag_core::CoreError::UnknownValueType(_))
        ));
    }

    struct Constant;

    impl Evaluator for Constant {
        fn evaluate(
            &self,
            _expr: &formdag_core::Expr,
            _cx: &formdag_dag::EvaluationContext<'_>,
        ) -> Result<formdag_core::Value, formdag_dag::EvaluationError> {
            Ok(formdag_core::Value::Int(42))
        }
    }

    #[test]
    fn custom_evaluator_is_used() {
        let mut form = FormBuilder::new(definition(
            r#"[{ "target": "/data/a", "calculate": "now" }]"#,
        ))
        .with_evaluator(Arc::new(Constant))
        .build()
        .unwrap();
        form.initialize();
        let a = TreeReference::parse("/data[0]/a[0]").unwrap();
        assert_eq!(form.value(&a), Some(&formdag_core::Value::Int(42)));
    }

    #[test]
    fn saved_answers_are_restored_before_initialize() {
        let binds = r#"[{ "target": "/data/b", "calculate": { "ref": "/data/a" } },
            { "target": "/data/rep/x", "calculate": { "position": ".." } }]"#;
        let mut earlier = FormBuilder::new(definition(binds)).build().unwrap();
        let a = TreeReference::parse("/data[0]/a[0]").unwrap();
        let data = TreeReference::parse("/data[0]").unwrap();
        earlier
            .set_value(&a, Some(formdag_core::Value::Text("kept".into())))
            .unwrap();
        earlier.insert_repeat(&data, "rep", 0).unwrap();
        earlier.insert_repeat(&data, "rep", 1).unwrap();

        let mut form = FormBuilder::new(definition(binds))
            .with_answers(earlier.instance().clone())
            .build()
            .unwrap();
        form.initialize();

        let b = TreeReference::parse("/data[0]/b[0]").unwrap();
        let x = TreeReference::parse("/data[0]/rep[1]/x[0]").unwrap();
        assert_eq!(form.value(&a), Some(&formdag_core::Value::Text("kept".into())));
        assert_eq!(form.value(&b), Some(&formdag_core::Value::Text("kept".into())));
        assert_eq!(form.value(&x), Some(&formdag_core::Value::Decimal(2.0)));
    }

    #[test]
    fn answers_from_another_form_are_rejected() {
        let other = FormInstance::new(TreeElement::new("survey"));
        let err = FormBuilder::new(definition("[]"))
            .with_answers(other)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            FormError::Core(formdag_core::CoreError::NodeNotFound(_))
        ));
    }

    #[test]
    fn definition_id_is_kept() {
        let mut def = definition("[]");
        let id = FormId::new_v4();
        def.id = Some(id);
        let form = FormBuilder::new(def)
            .with_clock(Arc::new(FixedClock::new(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap(),
            )))
            .build()
            .unwrap();
        assert_eq!(form.id(), id);
        assert_eq!(form.title(), "Loop");
    }
}
