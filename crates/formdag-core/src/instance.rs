//! The data instance and the reference resolver.

use crate::error::CoreError;
use crate::reference::{Multiplicity, RefStep, TreeReference};
use crate::tree::TreeElement;

/// A form's data instance: a single tree rooted at one element.
#[derive(Debug, Clone, PartialEq)]
pub struct FormInstance {
    root: TreeElement,
}

impl FormInstance {
    /// Wrap `root`, which is pinned to multiplicity 0.
    pub fn new(mut root: TreeElement) -> Self {
        root.set_multiplicity(Multiplicity::Index(0));
        Self { root }
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &TreeElement {
        &self.root
    }

    /// Concrete reference of the root, e.g. `/data[0]`.
    pub fn root_ref(&self) -> TreeReference {
        TreeReference::root(self.root.name())
    }

    /// Copy the answers of `saved`, an instance of the same form, onto this
    /// one. Repeat instances this instance lacks are created from its
    /// templates.
    pub fn populate(&mut self, saved: &FormInstance) -> Result<(), CoreError> {
        if saved.name() != self.name() {
            return Err(CoreError::NodeNotFound(saved.root_ref()));
        }
        self.root.populate(&saved.root);
        Ok(())
    }

    /// Look up the node at a concrete absolute reference.
    pub fn resolve(&self, reference: &TreeReference) -> Option<&TreeElement> {
        let (first, rest) = Self::split_concrete(reference)?;
        if first.name != self.root.name() {
            return None;
        }
        let mut node = &self.root;
        for step in rest {
            node = node.child(&step.name, step.multiplicity)?;
        }
        Some(node)
    }

    pub fn resolve_mut(&mut self, reference: &TreeReference) -> Option<&mut TreeElement> {
        let (first, rest) = Self::split_concrete(reference)?;
        if first.name != self.root.name() {
            return None;
        }
        let mut node = &mut self.root;
        for step in rest {
            node = node.child_mut(&step.name, step.multiplicity)?;
        }
        Some(node)
    }

    fn split_concrete(reference: &TreeReference) -> Option<(&RefStep, &[RefStep])> {
        if !reference.is_absolute() || reference.is_generic() {
            return None;
        }
        let (first, rest) = reference.steps().split_first()?;
        matches!(first.multiplicity, Multiplicity::Index(0)).then_some((first, rest))
    }

    /// Resolve a reference to the concrete references of every node it
    /// denotes, in document order.
    ///
    /// Relative references are anchored at `context` first. Unbound steps
    /// match every instance of a series but never its template. A step that
    /// names no child at all under a matched prefix is an error unless it is
    /// the final step, in which case it simply matches nothing.
    pub fn expand(
        &self,
        reference: &TreeReference,
        context: Option<&TreeReference>,
    ) -> Result<Vec<TreeReference>, CoreError> {
        let absolute = if reference.is_absolute() {
            reference.clone()
        } else {
            let context = context.ok_or_else(|| CoreError::NeedsContext {
                reference: reference.to_string(),
                context: "none".to_string(),
            })?;
            reference.contextualize(context)?
        };

        let Some((first, rest)) = absolute.steps().split_first() else {
            return Ok(Vec::new());
        };
        let root_matches = first.name == self.root.name()
            && first.multiplicity.overlaps(Multiplicity::Index(0));
        if !root_matches {
            return Err(CoreError::NodeNotFound(absolute));
        }

        let mut frontier: Vec<(TreeReference, &TreeElement)> = vec![(self.root_ref(), &self.root)];
        for (depth, step) in rest.iter().enumerate() {
            let is_last = depth + 1 == rest.len();
            let mut next = Vec::new();
            for (prefix, node) in &frontier {
                if !node.has_child_named(&step.name) {
                    if is_last {
                        continue;
                    }
                    return Err(CoreError::Unresolvable {
                        reference: absolute.clone(),
                        step: step.name.clone(),
                        prefix: prefix.clone(),
                    });
                }
                match step.multiplicity {
                    Multiplicity::Unbound => {
                        for child in node.children_named(&step.name) {
                            next.push((prefix.child_at(&step.name, child.multiplicity()), child));
                        }
                    }
                    bound => {
                        if let Some(child) = node.child(&step.name, bound) {
                            next.push((prefix.child_at(&step.name, bound), child));
                        }
                    }
                }
            }
            frontier = next;
        }

        Ok(frontier.into_iter().map(|(reference, _)| reference).collect())
    }

    /// Concrete references of the node at `reference` and every
    /// non-template descendant, in document order.
    pub fn subtree_refs(&self, reference: &TreeReference) -> Vec<TreeReference> {
        self.resolve(reference)
            .map(|node| node.subtree_refs(reference))
            .unwrap_or_default()
    }

    /// Every concrete node in the instance, in document order.
    pub fn all_refs(&self) -> Vec<TreeReference> {
        self.subtree_refs(&self.root_ref())
    }

    /// The template of the series `name` under the concrete `parent`.
    pub fn template_for(&self, parent: &TreeReference, name: &str) -> Result<&TreeElement, CoreError> {
        let node = self
            .resolve(parent)
            .ok_or_else(|| CoreError::NodeNotFound(parent.clone()))?;
        node.template_child(name).ok_or_else(|| CoreError::NoTemplate {
            parent: parent.clone(),
            name: name.to_string(),
        })
    }

    /// Create a new instance of the series `name` under `parent` from its
    /// template, at `position` (clamped to the series length). Later
    /// siblings move up by one. Returns the new instance's reference.
    pub fn insert_repeat(
        &mut self,
        parent: &TreeReference,
        name: &str,
        position: usize,
    ) -> Result<TreeReference, CoreError> {
        let fresh = self
            .template_for(parent, name)?
            .deep_copy(Multiplicity::Index(position));
        let node = self
            .resolve_mut(parent)
            .ok_or_else(|| CoreError::NodeNotFound(parent.clone()))?;
        let multiplicity = node.insert_instance(fresh, position);
        Ok(parent.child_at(name, multiplicity))
    }

    /// Detach the repeat instance at `reference` and renumber the siblings
    /// after it.
    pub fn remove_repeat(&mut self, reference: &TreeReference) -> Result<TreeElement, CoreError> {
        let not_repeat = || CoreError::NotRepeatInstance(reference.clone());
        let index = reference
            .multiplicity_last()
            .and_then(Multiplicity::index)
            .ok_or_else(not_repeat)?;
        let name = reference.name_last().ok_or_else(not_repeat)?;
        let parent = reference.parent().ok_or_else(not_repeat)?;
        let node = self
            .resolve_mut(&parent)
            .ok_or_else(|| CoreError::NodeNotFound(parent.clone()))?;
        if node.template_child(name).is_none() {
            return Err(not_repeat());
        }
        node.remove_instance(name, index)
            .ok_or_else(|| CoreError::NodeNotFound(reference.clone()))
    }

    /// Clear the value of the node at `reference` and of its descendants.
    /// Returns the references whose values were removed.
    pub fn clear_values(&mut self, reference: &TreeReference) -> Vec<TreeReference> {
        let holding: Vec<TreeReference> = self
            .subtree_refs(reference)
            .into_iter()
            .filter(|r| self.resolve(r).is_some_and(|n| n.value().is_some()))
            .collect();
        if let Some(node) = self.resolve_mut(reference) {
            node.clear_values();
        }
        holding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, Value};

    fn r(s: &str) -> TreeReference {
        TreeReference::parse(s).unwrap()
    }

    /// `/data` with a `houseM` series of three instances, each holding `no`.
    fn household() -> FormInstance {
        let template = TreeElement::template("houseM")
            .with_child(TreeElement::new("no").with_type(DataType::Int));
        let mut root = TreeElement::new("data")
            .with_child(template)
            .with_child(TreeElement::new("total"));
        for i in 0..3 {
            root.add_child(
                TreeElement::new("houseM")
                    .with_child(TreeElement::new("no").with_value(Value::Int(i + 1))),
            );
        }
        FormInstance::new(root)
    }

    #[test]
    fn populate_fills_a_blank_skeleton() {
        let template = TreeElement::template("houseM")
            .with_child(TreeElement::new("no").with_type(DataType::Int));
        let mut blank = FormInstance::new(
            TreeElement::new("data")
                .with_child(template)
                .with_child(TreeElement::new("total")),
        );

        blank.populate(&household()).unwrap();
        assert_eq!(blank.expand(&r("/data/houseM"), None).unwrap().len(), 3);
        let no = blank.resolve(&r("/data[0]/houseM[2]/no[0]")).unwrap();
        assert_eq!(no.value(), Some(&Value::Int(3)));
        assert!(blank.resolve(&r("/data[0]/total[0]")).unwrap().value().is_none());

        let other = FormInstance::new(TreeElement::new("survey"));
        assert!(matches!(
            blank.populate(&other),
            Err(CoreError::NodeNotFound(_))
        ));
    }

    #[test]
    fn resolve_concrete_reference() {
        let instance = household();
        let node = instance.resolve(&r("/data[0]/houseM[2]/no[0]")).unwrap();
        assert_eq!(node.value(), Some(&Value::Int(3)));
        assert!(instance.resolve(&r("/data[0]/houseM[3]/no[0]")).is_none());
        // Generic references are not concrete.
        assert!(instance.resolve(&r("/data/houseM/no")).is_none());
    }

    #[test]
    fn expand_generic_in_document_order_without_template() {
        let instance = household();
        let refs = instance.expand(&r("/data/houseM/no"), None).unwrap();
        assert_eq!(
            refs,
            vec![
                r("/data[0]/houseM[0]/no[0]"),
                r("/data[0]/houseM[1]/no[0]"),
                r("/data[0]/houseM[2]/no[0]"),
            ]
        );
    }

    #[test]
    fn expand_template_explicitly() {
        let instance = household();
        let refs = instance.expand(&r("/data/houseM[@template]/no"), None).unwrap();
        assert_eq!(refs, vec![r("/data[0]/houseM[@template]/no[0]")]);
    }

    #[test]
    fn expand_relative_against_context() {
        let instance = household();
        let refs = instance
            .expand(&r("../no"), Some(&r("/data[0]/houseM[1]/no[0]")))
            .unwrap();
        assert_eq!(refs, vec![r("/data[0]/houseM[1]/no[0]")]);
        assert!(matches!(
            instance.expand(&r("../no"), None),
            Err(CoreError::NeedsContext { .. })
        ));
    }

    #[test]
    fn missing_final_step_is_empty() {
        let instance = household();
        assert!(instance.expand(&r("/data/houseM/age"), None).unwrap().is_empty());
    }

    #[test]
    fn missing_intermediate_step_is_unresolvable() {
        let instance = household();
        let err = instance.expand(&r("/data/person/age"), None).unwrap_err();
        assert!(matches!(err, CoreError::Unresolvable { ref step, .. } if step == "person"));
    }

    #[test]
    fn empty_series_with_template_is_empty() {
        let mut instance = household();
        for _ in 0..3 {
            instance.remove_repeat(&r("/data[0]/houseM[0]")).unwrap();
        }
        assert!(instance.expand(&r("/data/houseM/no"), None).unwrap().is_empty());
    }

    #[test]
    fn insert_and_remove_repeat() {
        let mut instance = household();
        let inserted = instance.insert_repeat(&r("/data[0]"), "houseM", 1).unwrap();
        assert_eq!(inserted, r("/data[0]/houseM[1]"));
        assert!(instance
            .resolve(&r("/data[0]/houseM[1]/no[0]"))
            .unwrap()
            .value()
            .is_none());
        assert_eq!(
            instance.resolve(&r("/data[0]/houseM[3]/no[0]")).unwrap().value(),
            Some(&Value::Int(3))
        );

        let removed = instance.remove_repeat(&r("/data[0]/houseM[1]")).unwrap();
        assert_eq!(removed.multiplicity(), Multiplicity::Index(1));
        assert_eq!(instance.root().series_count("houseM"), 3);
        assert_eq!(
            instance.resolve(&r("/data[0]/houseM[1]/no[0]")).unwrap().value(),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn remove_non_repeat_is_rejected() {
        let mut instance = household();
        assert!(matches!(
            instance.remove_repeat(&r("/data[0]/total[0]")),
            Err(CoreError::NotRepeatInstance(_))
        ));
        assert!(matches!(
            instance.insert_repeat(&r("/data[0]"), "total", 0),
            Err(CoreError::NoTemplate { .. })
        ));
    }

    #[test]
    fn clear_values_reports_cleared_nodes() {
        let mut instance = household();
        let cleared = instance.clear_values(&r("/data[0]/houseM[1]"));
        assert_eq!(cleared, vec![r("/data[0]/houseM[1]/no[0]")]);
        assert!(instance
            .resolve(&r("/data[0]/houseM[1]/no[0]"))
            .unwrap()
            .value()
            .is_none());
    }

    #[test]
    fn all_refs_skips_templates() {
        let instance = household();
        let refs = instance.all_refs();
        assert_eq!(refs.len(), 8);
        assert!(refs.iter().all(|r| !r.to_string().contains("@template")));
    }
}
