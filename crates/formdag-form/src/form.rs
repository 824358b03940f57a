//! A built form: the instance tree plus the engine that keeps it current.

use std::sync::Arc;

use formdag_core::{FormInstance, TreeElement, TreeReference, Value};
use formdag_dag::{Dag, EngineContext, EventNotifier, Evaluator, RecalcReport};

use crate::error::FormError;
use crate::FormId;

/// A runnable form.
///
/// Every mutation goes through the engine, so after any call returns the
/// instance is consistent with the form's binds.
pub struct FormDef {
    id: FormId,
    title: String,
    instance: FormInstance,
    dag: Dag,
    evaluator: Arc<dyn Evaluator>,
    notifier: Arc<dyn EventNotifier>,
}

impl FormDef {
    pub(crate) fn from_parts(
        id: FormId,
        title: String,
        instance: FormInstance,
        dag: Dag,
        evaluator: Arc<dyn Evaluator>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            id,
            title,
            instance,
            dag,
            evaluator,
            notifier,
        }
    }

    pub fn id(&self) -> FormId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn instance(&self) -> &FormInstance {
        &self.instance
    }

    /// Direct access to the tree. Changes made here bypass recalculation.
    pub fn instance_mut(&mut self) -> &mut FormInstance {
        &mut self.instance
    }

    /// The engine, for diagnostics.
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Replace the receiver of engine events.
    pub fn set_event_notifier(&mut self, notifier: Arc<dyn EventNotifier>) {
        self.notifier = notifier;
    }

    /// Current answer at a concrete reference.
    pub fn value(&self, reference: &TreeReference) -> Option<&Value> {
        self.instance.resolve(reference).and_then(TreeElement::value)
    }

    /// Run every bind once.
    pub fn initialize(&mut self) -> RecalcReport {
        let cx = EngineContext::new(&*self.evaluator, &*self.notifier);
        self.dag.initialize(&mut self.instance, &cx)
    }

    /// Answer a question and recalculate what depends on it.
    pub fn set_value(
        &mut self,
        reference: &TreeReference,
        value: Option<Value>,
    ) -> Result<RecalcReport, FormError> {
        let cx = EngineContext::new(&*self.evaluator, &*self.notifier);
        Ok(self
            .dag
            .on_value_changed(&mut self.instance, reference, value, &cx)?)
    }

    /// Add a repeat instance of `name` under `parent` at `position`.
    pub fn insert_repeat(
        &mut self,
        parent: &TreeReference,
        name: &str,
        position: usize,
    ) -> Result<(TreeReference, RecalcReport), FormError> {
        let cx = EngineContext::new(&*self.evaluator, &*self.notifier);
        Ok(self
            .dag
            .insert_repeat_instance(&mut self.instance, parent, name, position, &cx)?)
    }

    /// Remove the repeat instance at `reference`, renumber its later
    /// siblings, and recalculate.
    pub fn delete_repeat(&mut self, reference: &TreeReference) -> Result<RecalcReport, FormError> {
        let parent = reference
            .parent()
            .ok_or_else(|| formdag_core::CoreError::NotRepeatInstance(reference.clone()))?;
        let removed = self.instance.remove_repeat(reference)?;
        log::debug!("removed {reference}");
        self.delete_repeat_group(Some(reference), &parent, &removed)
    }

    /// Recalculate after `deleted` has left `parent`'s series.
    ///
    /// [`delete_repeat`](Self::delete_repeat) calls this after removing the
    /// node; hosts that restructure the tree themselves call it directly.
    pub fn delete_repeat_group(
        &mut self,
        deleted_ref: Option<&TreeReference>,
        parent: &TreeReference,
        deleted: &TreeElement,
    ) -> Result<RecalcReport, FormError> {
        let cx = EngineContext::new(&*self.evaluator, &*self.notifier);
        Ok(self
            .dag
            .delete_repeat_group(&mut self.instance, deleted_ref, parent, deleted, &cx)?)
    }
}

impl std::fmt::Debug for FormDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormDef")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("instance", &self.instance)
            .field("dag", &self.dag)
            .finish_non_exhaustive()
    }
}
