//! The recalculation engine.
//!
//! [`Dag`] owns the triggerables and their dependency graph and keeps an
//! instance consistent with them: a full sweep at initialisation, an
//! affected-subset sweep after each edit, and sibling-by-sibling repair
//! after repeat instances are inserted or deleted.
//!
//! Each sweep visits triggerables in the graph's topological order and
//! evaluates each at most once. A triggerable is evaluated against the
//! concrete targets its generic target denotes near the references that
//! changed, so an edit inside one repeat instance only recomputes that
//! instance's dependents.

use std::collections::{BTreeSet, HashSet};

use formdag_core::{
    ConstraintState, FormInstance, Multiplicity, TreeElement, TreeReference, Value,
};

use crate::config::{EngineConfig, NonRelevantPolicy};
use crate::error::{DagError, EvaluationError};
use crate::evaluator::{EvaluationContext, Evaluator};
use crate::event::{Event, EventNotifier};
use crate::graph::DependencyGraph;
use crate::registry::TriggerableRegistry;
use crate::report::{AppliedUpdate, Change, Failure, RecalcReport};
use crate::triggerable::{Triggerable, TriggerableId, TriggerableKind};

/// The collaborators an engine operation calls out to.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub evaluator: &'a dyn Evaluator,
    pub notifier: &'a dyn EventNotifier,
}

impl<'a> EngineContext<'a> {
    pub fn new(evaluator: &'a dyn Evaluator, notifier: &'a dyn EventNotifier) -> Self {
        Self {
            evaluator,
            notifier,
        }
    }
}

/// Triggerables, their dependency graph, and the sweeps that apply them.
#[derive(Debug, Clone)]
pub struct Dag {
    registry: TriggerableRegistry,
    graph: DependencyGraph,
    config: EngineConfig,
}

impl Dag {
    /// Build the dependency graph. Fails if the triggerables form a cycle.
    pub fn new(registry: TriggerableRegistry, config: EngineConfig) -> Result<Self, DagError> {
        let graph = match DependencyGraph::build(&registry) {
            Ok(graph) => graph,
            Err(cycle) => {
                log::error!("{cycle}");
                return Err(cycle.into());
            }
        };
        log::debug!(
            "dependency graph built: {} triggerables, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(Self {
            registry,
            graph,
            config,
        })
    }

    pub fn registry(&self) -> &TriggerableRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every triggerable once, in topological order, over every
    /// concrete target that currently exists. Value-changed actions wait
    /// for their source and are skipped.
    pub fn initialize(&mut self, instance: &mut FormInstance, cx: &EngineContext<'_>) -> RecalcReport {
        let mut report = RecalcReport::default();
        for &id in self.graph.order() {
            let Some(triggerable) = self.registry.get(id) else {
                continue;
            };
            if triggerable.fires_on_initialize() {
                self.evaluate(id, triggerable, instance, &[], cx, &mut report);
            }
        }
        log::debug!(
            "initialized: {} evaluated, {} updates, {} failures",
            report.evaluated.len(),
            report.updates.len(),
            report.failures.len()
        );
        self.refresh_targets(instance);
        report
    }

    /// Set the value at `reference` and recompute everything that depends
    /// on it.
    ///
    /// The value is converted to the node's type first; if the result
    /// equals the current value nothing happens.
    pub fn on_value_changed(
        &mut self,
        instance: &mut FormInstance,
        reference: &TreeReference,
        value: Option<Value>,
        cx: &EngineContext<'_>,
    ) -> Result<RecalcReport, DagError> {
        reject_template(reference)?;
        let node = instance
            .resolve_mut(reference)
            .ok_or_else(|| DagError::NodeNotFound(reference.clone()))?;
        let value = match value {
            Some(v) if !v.is_blank() => Some(v.cast(node.data_type())?),
            _ => None,
        };
        if node.value() == value.as_ref() {
            log::debug!("{reference}: value unchanged, nothing to recalculate");
            return Ok(RecalcReport::default());
        }
        let previous = node.set_value(value.clone());

        let mut report = RecalcReport::default();
        report.updates.push(AppliedUpdate {
            triggerable: None,
            target: reference.clone(),
            change: Change::Value {
                previous,
                current: value,
            },
        });
        let mut fired = BTreeSet::new();
        let seeds = vec![Touched::Value(reference.clone())];
        self.propagate(instance, seeds, &mut fired, cx, &mut report);
        log::debug!(
            "{reference} changed: {} evaluated, {} updates",
            report.evaluated.len(),
            report.updates.len()
        );
        Ok(report)
    }

    /// Create a repeat instance of `name` under `parent` at `position` and
    /// bring the instance up to date.
    ///
    /// The new instance is initialised like the form was. Siblings shifted
    /// up by the insertion are then recomputed in ascending order, and last
    /// everything reading the series (counts, sums) is refreshed.
    pub fn insert_repeat_instance(
        &mut self,
        instance: &mut FormInstance,
        parent: &TreeReference,
        name: &str,
        position: usize,
        cx: &EngineContext<'_>,
    ) -> Result<(TreeReference, RecalcReport), DagError> {
        reject_template(parent)?;
        let inserted = instance.insert_repeat(parent, name, position)?;
        let mut report = RecalcReport::default();

        let series = inserted.genericize();
        let mut fired = BTreeSet::new();
        for &id in self.graph.order() {
            let Some(triggerable) = self.registry.get(id) else {
                continue;
            };
            if triggerable.fires_on_initialize() && series.covers(triggerable.target()) {
                fired.insert(id);
                self.evaluate(id, triggerable, instance, &[inserted.clone()], cx, &mut report);
            }
        }
        self.summarize("Created", &inserted, fired.len(), cx);

        let index = inserted
            .multiplicity_last()
            .and_then(Multiplicity::index)
            .unwrap_or(0);
        let count = instance
            .resolve(parent)
            .map(|node| node.series_count(name))
            .unwrap_or(0);
        for shifted in index + 1..count {
            let sibling = parent.child_at(name, Multiplicity::Index(shifted));
            self.repair_sibling("Shifted", instance, &sibling, cx, &mut report);
        }

        let mut fired = BTreeSet::new();
        let seeds = Touched::states(instance.subtree_refs(&inserted));
        self.propagate(instance, seeds, &mut fired, cx, &mut report);

        self.refresh_targets(instance);
        log::debug!("inserted {inserted}: {} updates", report.updates.len());
        Ok((inserted, report))
    }

    /// Recompute after a repeat instance was deleted.
    ///
    /// `deleted` is the removed element; it keeps the multiplicity it had.
    /// Every sibling now at or after that position is processed in
    /// ascending order: triggerables reading the sibling are recomputed,
    /// then a `Deleted` summary is published for the sibling and for each
    /// of its children. With `deleted_ref` set, triggerables that read the
    /// removed subtree are refreshed afterwards.
    pub fn delete_repeat_group(
        &mut self,
        instance: &mut FormInstance,
        deleted_ref: Option<&TreeReference>,
        parent: &TreeReference,
        deleted: &TreeElement,
        cx: &EngineContext<'_>,
    ) -> Result<RecalcReport, DagError> {
        let Multiplicity::Index(start) = deleted.multiplicity() else {
            return Err(DagError::NotRepeatInstance(
                parent.child_at(deleted.name(), deleted.multiplicity()),
            ));
        };
        let count = instance
            .resolve(parent)
            .ok_or_else(|| DagError::NodeNotFound(parent.clone()))?
            .series_count(deleted.name());

        let mut report = RecalcReport::default();
        for index in start..count {
            let sibling = parent.child_at(deleted.name(), Multiplicity::Index(index));
            self.repair_sibling("Deleted", instance, &sibling, cx, &mut report);
        }

        if let Some(deleted_ref) = deleted_ref {
            let mut fired = BTreeSet::new();
            let seeds = Touched::states(deleted.subtree_refs(deleted_ref));
            self.propagate(instance, seeds, &mut fired, cx, &mut report);
        }

        self.refresh_targets(instance);
        log::debug!(
            "deleted {}[{start}] under {parent}: {} updates",
            deleted.name(),
            report.updates.len()
        );
        Ok(report)
    }

    /// Recompute what reads a renumbered sibling, then what reads each of
    /// its children, publishing a running count after each.
    fn repair_sibling(
        &self,
        lead: &str,
        instance: &mut FormInstance,
        sibling: &TreeReference,
        cx: &EngineContext<'_>,
        report: &mut RecalcReport,
    ) {
        let mut fired = BTreeSet::new();
        let seeds = vec![Touched::State(sibling.clone())];
        self.propagate(instance, seeds, &mut fired, cx, report);
        self.summarize(lead, sibling, fired.len(), cx);

        let children: Vec<TreeReference> = instance
            .resolve(sibling)
            .map(|node| {
                node.children()
                    .iter()
                    .filter(|c| !c.is_template())
                    .map(|c| sibling.child_at(c.name(), c.multiplicity()))
                    .collect()
            })
            .unwrap_or_default();
        for child in children {
            let seeds = vec![Touched::State(child.clone())];
            self.propagate(instance, seeds, &mut fired, cx, report);
            self.summarize(lead, &child, fired.len(), cx);
        }
    }

    fn summarize(&self, lead: &str, reference: &TreeReference, fired: usize, cx: &EngineContext<'_>) {
        if self.config.publish_summaries {
            cx.notifier
                .publish_event(&Event::summary(lead, reference, fired));
        }
    }

    /// Sweep the triggerables affected by changes at `seeds`.
    ///
    /// Triggerables already in `fired` are not evaluated again. Each one is
    /// anchored at the changed references it reads; if none of them do (it
    /// was reached through the graph but its input did not change), it is
    /// anchored at the first seed. Value-changed actions are anchored only
    /// by answers that changed, never by renumbered or inserted nodes.
    fn propagate(
        &self,
        instance: &mut FormInstance,
        seeds: Vec<Touched>,
        fired: &mut BTreeSet<TriggerableId>,
        cx: &EngineContext<'_>,
        report: &mut RecalcReport,
    ) {
        let Some(fallback) = seeds.first().map(|t| t.reference().clone()) else {
            return;
        };
        let direct: BTreeSet<TriggerableId> = seeds
            .iter()
            .flat_map(|seed| self.registry.triggered_by(seed.reference()))
            .collect();
        let mut changed = seeds;

        for id in self.graph.affected_by(direct) {
            if fired.contains(&id) {
                continue;
            }
            let Some(triggerable) = self.registry.get(id) else {
                continue;
            };
            let waits_for_value = !triggerable.fires_on_initialize();
            let mut anchors: Vec<TreeReference> = changed
                .iter()
                .filter(|c| c.is_value() || !waits_for_value)
                .map(Touched::reference)
                .filter(|c| triggerable.is_triggered_by(c))
                .cloned()
                .collect();
            if anchors.is_empty() {
                if waits_for_value {
                    continue;
                }
                anchors.push(fallback.clone());
            }
            fired.insert(id);
            let written = self.evaluate(id, triggerable, instance, &anchors, cx, report);
            changed.extend(written);
        }
    }

    /// Concrete targets of `triggerable` near `anchors`, or everywhere
    /// when there are no anchors.
    fn targets(
        triggerable: &Triggerable,
        instance: &FormInstance,
        anchors: &[TreeReference],
    ) -> Result<Vec<TreeReference>, formdag_core::CoreError> {
        if anchors.is_empty() {
            return instance.expand(triggerable.target(), None);
        }
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for anchor in anchors {
            let pattern = triggerable.target().contextualize(anchor)?;
            for target in instance.expand(&pattern, None)? {
                if seen.insert(target.clone()) {
                    targets.push(target);
                }
            }
        }
        Ok(targets)
    }

    /// Evaluate one triggerable over its targets and apply the results.
    /// Returns the nodes that changed.
    fn evaluate(
        &self,
        id: TriggerableId,
        triggerable: &Triggerable,
        instance: &mut FormInstance,
        anchors: &[TreeReference],
        cx: &EngineContext<'_>,
        report: &mut RecalcReport,
    ) -> Vec<Touched> {
        report.evaluated.push(id);
        let targets = match Self::targets(triggerable, instance, anchors) {
            Ok(targets) => targets,
            Err(e) => {
                log::warn!("skipping {id} {triggerable}: {e}");
                report.failures.push(Failure {
                    triggerable: id,
                    target: triggerable.target().clone(),
                    reason: e.to_string(),
                });
                return Vec::new();
            }
        };
        log::trace!("evaluating {id} {triggerable} over {} target(s)", targets.len());

        let mut changed = Vec::new();
        for target in targets {
            let outcome = cx
                .evaluator
                .evaluate(triggerable.expr(), &EvaluationContext::new(&*instance, &target));
            match self.apply(id, triggerable, instance, &target, outcome, cx, report, &mut changed) {
                Ok(()) => {}
                Err(reason) => {
                    log::warn!("{id} {triggerable} at {target}: {reason}");
                    report.failures.push(Failure {
                        triggerable: id,
                        target,
                        reason,
                    });
                }
            }
        }
        changed
    }

    /// Apply one evaluation result to `target`, recording what changed in
    /// `changed`.
    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        id: TriggerableId,
        triggerable: &Triggerable,
        instance: &mut FormInstance,
        target: &TreeReference,
        outcome: Result<Value, EvaluationError>,
        cx: &EngineContext<'_>,
        report: &mut RecalcReport,
        changed: &mut Vec<Touched>,
    ) -> Result<(), String> {
        let node = instance
            .resolve_mut(target)
            .ok_or_else(|| format!("target {target} vanished"))?;

        let change = match triggerable.kind() {
            TriggerableKind::Calculate | TriggerableKind::SetValueAction { .. } => {
                let raw = outcome.map_err(|e| e.to_string())?;
                let current = if raw.is_blank() {
                    None
                } else {
                    Some(raw.cast(node.data_type()).map_err(|e| e.to_string())?)
                };
                if node.value() == current.as_ref() {
                    return Ok(());
                }
                let previous = node.set_value(current.clone());
                cx.notifier
                    .publish_event(&Event::recalculate(target, current.as_ref().map(|_| &raw)));
                changed.push(Touched::Value(target.clone()));
                Change::Value { previous, current }
            }
            TriggerableKind::Relevant => {
                let relevant = outcome.map_err(|e| e.to_string())?.as_bool();
                if !node.set_relevant(relevant) {
                    return Ok(());
                }
                changed.push(Touched::State(target.clone()));
                if !relevant && self.config.non_relevant == NonRelevantPolicy::Clear {
                    for cleared in instance.clear_values(target) {
                        cx.notifier.publish_event(&Event::cleared(&cleared));
                        changed.push(Touched::Value(cleared.clone()));
                        report.updates.push(AppliedUpdate {
                            triggerable: Some(id),
                            target: cleared,
                            change: Change::Cleared,
                        });
                    }
                }
                Change::Relevance(relevant)
            }
            TriggerableKind::Required => {
                let required = outcome.map_err(|e| e.to_string())?.as_bool();
                if !node.set_required(required) {
                    return Ok(());
                }
                changed.push(Touched::State(target.clone()));
                Change::Required(required)
            }
            TriggerableKind::Constraint { message } => {
                let state = if node.value().is_none() {
                    ConstraintState::Unchecked
                } else {
                    match &outcome {
                        Ok(v) if v.as_bool() => ConstraintState::Valid,
                        Ok(_) => ConstraintState::Invalid {
                            message: message.clone(),
                        },
                        Err(e) => ConstraintState::Error {
                            message: e.to_string(),
                        },
                    }
                };
                if !node.set_constraint(state.clone()) {
                    return Ok(());
                }
                changed.push(Touched::State(target.clone()));
                Change::Constraint(state)
            }
        };

        report.updates.push(AppliedUpdate {
            triggerable: Some(id),
            target: target.clone(),
            change,
        });
        Ok(())
    }

    /// Re-expand every triggerable's target against the current tree.
    fn refresh_targets(&mut self, instance: &FormInstance) {
        let targets: Vec<(TriggerableId, Vec<TreeReference>)> = self
            .registry
            .all()
            .map(|(id, t)| (id, instance.expand(t.target(), None).unwrap_or_default()))
            .collect();
        for (id, concrete) in targets {
            self.graph.set_concrete_targets(id, concrete);
        }
    }
}

/// A node changed by an edit or a sweep step.
#[derive(Debug, Clone)]
enum Touched {
    /// Its answer was written or cleared.
    Value(TreeReference),
    /// Its flags, position or existence changed; its answer did not.
    State(TreeReference),
}

impl Touched {
    fn states(references: Vec<TreeReference>) -> Vec<Touched> {
        references.into_iter().map(Touched::State).collect()
    }

    fn reference(&self) -> &TreeReference {
        match self {
            Touched::Value(reference) | Touched::State(reference) => reference,
        }
    }

    fn is_value(&self) -> bool {
        matches!(self, Touched::Value(_))
    }
}

/// Edits and insertions address live nodes, never a repeat's template.
fn reject_template(reference: &TreeReference) -> Result<(), DagError> {
    if reference
        .steps()
        .iter()
        .any(|step| step.multiplicity == Multiplicity::Template)
    {
        return Err(DagError::TemplateReference(reference.clone()));
    }
    Ok(())
}
