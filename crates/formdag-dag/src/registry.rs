//! Storage for a form's triggerables.

use std::collections::BTreeMap;

use formdag_core::TreeReference;

use crate::triggerable::{Triggerable, TriggerableId};

/// Arena of triggerables, indexed by target and by trigger.
#[derive(Debug, Clone, Default)]
pub struct TriggerableRegistry {
    triggerables: Vec<Triggerable>,
    by_target: BTreeMap<TreeReference, Vec<TriggerableId>>,
    by_trigger: BTreeMap<TreeReference, Vec<TriggerableId>>,
}

impl TriggerableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a triggerable. Registering an identical binding again returns
    /// the existing id.
    pub fn register(&mut self, triggerable: Triggerable) -> TriggerableId {
        if let Some(existing) = self.triggerables.iter().position(|t| *t == triggerable) {
            return TriggerableId(existing);
        }
        let id = TriggerableId(self.triggerables.len());
        self.by_target
            .entry(triggerable.target().clone())
            .or_default()
            .push(id);
        for trigger in triggerable.triggers() {
            self.by_trigger.entry(trigger.clone()).or_default().push(id);
        }
        self.triggerables.push(triggerable);
        id
    }

    /// Triggerables whose target is the generic form of `reference`.
    pub fn triggerables_targeting(&self, reference: &TreeReference) -> &[TriggerableId] {
        self.by_target
            .get(&reference.genericize())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Triggerables reading a node `reference` can denote, in registration
    /// order.
    pub fn triggered_by(&self, reference: &TreeReference) -> Vec<TriggerableId> {
        let mut ids: Vec<TriggerableId> = self
            .by_trigger
            .iter()
            .filter(|(trigger, _)| trigger.intersects(reference))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn get(&self, id: TriggerableId) -> Option<&Triggerable> {
        self.triggerables.get(id.0)
    }

    /// Every triggerable with its id, in registration order.
    pub fn all(&self) -> impl Iterator<Item = (TriggerableId, &Triggerable)> {
        self.triggerables
            .iter()
            .enumerate()
            .map(|(i, t)| (TriggerableId(i), t))
    }

    pub fn triggerables(&self) -> &[Triggerable] {
        &self.triggerables
    }

    pub fn len(&self) -> usize {
        self.triggerables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggerables.is_empty()
    }
}

impl FromIterator<Triggerable> for TriggerableRegistry {
    fn from_iter<I: IntoIterator<Item = Triggerable>>(iter: I) -> Self {
        let mut registry = Self::new();
        for triggerable in iter {
            registry.register(triggerable);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formdag_core::Expr;

    fn r(s: &str) -> TreeReference {
        TreeReference::parse(s).unwrap()
    }

    #[test]
    fn register_deduplicates() {
        let mut registry = TriggerableRegistry::new();
        let t = Triggerable::calculate(Expr::Ref(r("/data/a")), r("/data/b")).unwrap();
        let first = registry.register(t.clone());
        let second = registry.register(t);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_by_target_and_trigger() {
        let registry: TriggerableRegistry = [
            Triggerable::calculate(Expr::Ref(r("../a")), r("/data/item/b")).unwrap(),
            Triggerable::relevant(Expr::Ref(r("/data/item/a")), r("/data/item/c")).unwrap(),
            Triggerable::calculate(Expr::Sum(r("/data/item/b")), r("/data/total")).unwrap(),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            registry.triggerables_targeting(&r("/data[0]/item[3]/b[0]")),
            &[TriggerableId(0)]
        );
        assert_eq!(
            registry.triggered_by(&r("/data[0]/item[1]/a[0]")),
            vec![TriggerableId(0), TriggerableId(1)]
        );
        assert_eq!(
            registry.triggered_by(&r("/data[0]/item[1]/b[0]")),
            vec![TriggerableId(2)]
        );
        assert!(registry.triggered_by(&r("/data[0]/total[0]")).is_empty());
        assert_eq!(registry.all().count(), 3);
    }
}
